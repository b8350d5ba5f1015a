use anyhow::Result;
use clap::{Parser, Subcommand};
use devfleet_session::TmuxBackend;
use devfleet_store::schedule::CrontabScheduler;
use devfleet_store::DesiredStateStore;
use tracing_subscriber::EnvFilter;

mod actions;
mod config;
mod prompt;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "devfleet")]
#[command(about = "Keep lab device workers running in detached tmux sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add devices to or remove them from the supervised set
    Install,
    /// View live output of, start, or stop a device session
    Manage,
    /// Start every installed device that is not already running
    Reconcile,
    /// Show installed devices and their session state
    Status,
    /// Check that the host tools devfleet relies on are available
    Doctor,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("devfleet: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(
        devices_dir = %config.devices_dir.display(),
        state_dir = %config.state_dir.display(),
        "configuration resolved"
    );
    let store = DesiredStateStore::new(config.state_dir.clone(), CrontabScheduler);
    let backend = TmuxBackend;

    match cli.command {
        Commands::Install => actions::install(&config, &store),
        Commands::Manage => actions::manage(&store, &backend),
        Commands::Reconcile => actions::reconcile_pass(&store, &backend),
        Commands::Status => actions::status(&store, &backend),
        Commands::Doctor => actions::doctor(&config),
    }
}

// Keep stderr quiet during interactive prompts unless RUST_LOG asks for more.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
