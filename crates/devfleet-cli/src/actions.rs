use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use devfleet_core::{resolve_multi, resolve_single, DeviceDescriptor};
use devfleet_session::reconcile::{failure_count, run_pass};
use devfleet_session::{Ensure, SessionBackend};
use devfleet_store::discovery::scan_devices;
use devfleet_store::schedule::Scheduler;
use devfleet_store::DesiredStateStore;

use crate::config::{find_in_path, Config};
use crate::prompt;

/// `install` entry point: add devices to or remove them from the
/// supervised set. The store arms or disarms the schedule itself.
pub fn install<S: Scheduler>(config: &Config, store: &DesiredStateStore<S>) -> Result<()> {
    match prompt::read_line("Add or remove devices? [add/remove]: ")?
        .to_lowercase()
        .as_str()
    {
        "add" | "a" => add_devices(config, store),
        "remove" | "r" => remove_installed(store),
        other => bail!("unknown mode '{other}' (expected add or remove)"),
    }
}

/// `manage` entry point: view live output of, start, or stop devices.
pub fn manage<S: Scheduler>(
    store: &DesiredStateStore<S>,
    backend: &dyn SessionBackend,
) -> Result<()> {
    match prompt::read_line("View, start, or stop a device? [view/start/stop]: ")?
        .to_lowercase()
        .as_str()
    {
        "view" | "v" => view_session(backend),
        "start" => start_devices(store, backend),
        "stop" => stop_session(backend),
        other => bail!("unknown mode '{other}' (expected view, start, or stop)"),
    }
}

fn add_devices<S: Scheduler>(config: &Config, store: &DesiredStateStore<S>) -> Result<()> {
    let interpreter = config.resolved_interpreter()?;
    let available = scan_devices(&config.devices_dir, &interpreter)
        .with_context(|| format!("failed to scan {}", config.devices_dir.display()))?;
    let installed: BTreeSet<String> = store
        .list()?
        .into_iter()
        .map(|device| device.id)
        .collect();
    let candidates: Vec<DeviceDescriptor> = available
        .into_iter()
        .filter(|device| !installed.contains(&device.id))
        .collect();
    if candidates.is_empty() {
        bail!(
            "no installable device scripts in {}",
            config.devices_dir.display()
        );
    }

    println!("Installable devices:");
    let labels: Vec<String> = candidates.iter().map(|device| device.id.clone()).collect();
    prompt::present_choices(&labels);
    let input = prompt::read_line("Devices to install (e.g. 1,3): ")?;
    let picks = resolve_multi(&input, candidates.len())?;
    let chosen: Vec<String> = picks
        .iter()
        .map(|&pick| candidates[pick - 1].id.clone())
        .collect();

    println!("Selected: {}", chosen.join(", "));
    if !prompt::confirm("Install and keep these running? [y/N]: ")? {
        println!("Install cancelled.");
        return Ok(());
    }

    let devices = store.install(&chosen, &candidates)?;
    println!(
        "Installed. {} device(s) are now kept running across reboots.",
        devices.len()
    );
    Ok(())
}

fn remove_installed<S: Scheduler>(store: &DesiredStateStore<S>) -> Result<()> {
    let installed = store.list()?;
    if installed.is_empty() {
        bail!("no devices installed");
    }

    println!("Installed devices:");
    let labels: Vec<String> = installed.iter().map(|device| device.id.clone()).collect();
    prompt::present_choices(&labels);
    let input = prompt::read_line("Devices to remove (e.g. 1,3): ")?;
    let picks = resolve_multi(&input, installed.len())?;
    let chosen: Vec<String> = picks
        .iter()
        .map(|&pick| installed[pick - 1].id.clone())
        .collect();

    let remaining = store.uninstall(&chosen)?;
    if remaining.is_empty() {
        println!("All devices removed; scheduled restarts disarmed.");
    } else {
        println!("Removed. {} device(s) remain installed.", remaining.len());
    }
    Ok(())
}

// Ad hoc start from the installed set, bypassing the schedule. Failures are
// per-device; siblings are still attempted.
fn start_devices<S: Scheduler>(
    store: &DesiredStateStore<S>,
    backend: &dyn SessionBackend,
) -> Result<()> {
    let installed = store.list()?;
    if installed.is_empty() {
        bail!("no devices installed");
    }

    println!("Installed devices:");
    let labels: Vec<String> = installed.iter().map(|device| device.id.clone()).collect();
    prompt::present_choices(&labels);
    let input = prompt::read_line("Devices to start (e.g. 1,3): ")?;
    let picks = resolve_multi(&input, installed.len())?;
    let chosen: Vec<DeviceDescriptor> = picks
        .iter()
        .map(|&pick| installed[pick - 1].clone())
        .collect();

    report_pass(backend, &chosen)
}

fn view_session(backend: &dyn SessionBackend) -> Result<()> {
    let id = pick_running_session(backend)?;
    println!("Attaching to '{id}'. Detach with Ctrl-b d; the device keeps running.");
    backend.attach(&id)?;
    Ok(())
}

fn stop_session(backend: &dyn SessionBackend) -> Result<()> {
    let id = pick_running_session(backend)?;
    backend.kill(&id)?;
    println!("Stopped '{id}'.");
    Ok(())
}

fn pick_running_session(backend: &dyn SessionBackend) -> Result<String> {
    let sessions: Vec<String> = backend.list_sessions()?.into_iter().collect();
    if sessions.is_empty() {
        bail!("no device sessions are running");
    }
    println!("Running sessions:");
    prompt::present_choices(&sessions);
    let input = prompt::read_line("Select one: ")?;
    let pick = resolve_single(&input, sessions.len())?;
    Ok(sessions[pick - 1].clone())
}

/// `reconcile` entry point: one pass over the whole installed set. This is
/// what each schedule trigger does, runnable by hand.
pub fn reconcile_pass<S: Scheduler>(
    store: &DesiredStateStore<S>,
    backend: &dyn SessionBackend,
) -> Result<()> {
    let devices = store.list()?;
    if devices.is_empty() {
        println!("No devices installed; nothing to reconcile.");
        return Ok(());
    }
    report_pass(backend, &devices)
}

fn report_pass(backend: &dyn SessionBackend, devices: &[DeviceDescriptor]) -> Result<()> {
    let outcomes = run_pass(backend, devices);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(Ensure::Created) => println!("{}: started", outcome.id),
            Ok(Ensure::AlreadyRunning) => println!("{}: already running", outcome.id),
            Err(err) => println!("{}: failed ({err})", outcome.id),
        }
    }
    let failed = failure_count(&outcomes);
    if failed > 0 {
        bail!("{failed} of {} device(s) failed to start", outcomes.len());
    }
    Ok(())
}

/// `status` entry point: installed devices and their session state, plus
/// sessions running without a descriptor.
pub fn status<S: Scheduler>(
    store: &DesiredStateStore<S>,
    backend: &dyn SessionBackend,
) -> Result<()> {
    let devices = store.list()?;
    let sessions = backend.list_sessions()?;
    if devices.is_empty() && sessions.is_empty() {
        println!("No devices installed and no sessions running.");
        return Ok(());
    }

    let installed: BTreeSet<&str> = devices.iter().map(|device| device.id.as_str()).collect();
    for device in &devices {
        let state = if sessions.contains(&device.id) {
            "running"
        } else {
            "stopped"
        };
        println!("{:<24} {:<9} {}", device.id, state, device.launch_command);
    }
    for session in &sessions {
        if !installed.contains(session.as_str()) {
            println!("{session:<24} {:<9} (session only, not installed)", "running");
        }
    }
    Ok(())
}

/// `doctor` entry point: verify the host tools the supervisor shells out to.
pub fn doctor(config: &Config) -> Result<()> {
    let mut missing = 0;
    for tool in ["tmux", "crontab"] {
        match find_in_path(tool) {
            Some(path) => println!("- {tool}: ok ({})", path.display()),
            None => {
                println!("- {tool}: missing from PATH");
                missing += 1;
            }
        }
    }
    match config.resolved_interpreter() {
        Ok(path) => println!("- interpreter: ok ({})", path.display()),
        Err(err) => {
            println!("- interpreter: {err}");
            missing += 1;
        }
    }
    if config.devices_dir.is_dir() {
        println!("- devices dir: ok ({})", config.devices_dir.display());
    } else {
        println!(
            "- devices dir: {} does not exist",
            config.devices_dir.display()
        );
        missing += 1;
    }

    if missing > 0 {
        bail!("{missing} check(s) failed");
    }
    println!("All checks passed.");
    Ok(())
}
