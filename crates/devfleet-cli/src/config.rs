use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Where the supervisor looks for things on this host. File values come from
/// `~/.config/devfleet/config.toml`; each field can be overridden with a
/// `DEVFLEET_*` environment variable, and env beats file beats default.
#[derive(Debug, Clone)]
pub struct Config {
    pub devices_dir: PathBuf,
    pub state_dir: PathBuf,
    pub interpreter: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    devices_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    interpreter: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Overrides {
    devices_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    interpreter: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self::from_parts(read_config_file()?, Overrides::from_env()))
    }

    fn from_parts(file: ConfigFile, overrides: Overrides) -> Self {
        Self {
            devices_dir: overrides
                .devices_dir
                .or(file.devices_dir)
                .unwrap_or_else(default_devices_dir),
            state_dir: overrides
                .state_dir
                .or(file.state_dir)
                .unwrap_or_else(default_state_dir),
            interpreter: overrides
                .interpreter
                .or(file.interpreter)
                .unwrap_or_else(|| PathBuf::from("python3")),
        }
    }

    /// The configured interpreter as an absolute path. A bare name is
    /// resolved through PATH; launch commands must be fully qualified
    /// because cron runs the launcher with a minimal environment.
    pub fn resolved_interpreter(&self) -> Result<PathBuf> {
        if self.interpreter.is_absolute() {
            if !self.interpreter.is_file() {
                bail!("interpreter {} does not exist", self.interpreter.display());
            }
            return Ok(self.interpreter.clone());
        }
        let name = self.interpreter.display().to_string();
        find_in_path(&name).with_context(|| format!("interpreter '{name}' not found in PATH"))
    }
}

impl Overrides {
    fn from_env() -> Self {
        Self {
            devices_dir: env_path("DEVFLEET_DEVICES_DIR"),
            state_dir: env_path("DEVFLEET_STATE_DIR"),
            interpreter: env_path("DEVFLEET_INTERPRETER"),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

fn read_config_file() -> Result<ConfigFile> {
    let Some(path) = config_file_path() else {
        return Ok(ConfigFile::default());
    };
    if !path.is_file() {
        return Ok(ConfigFile::default());
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devfleet").join("config.toml"))
}

fn default_devices_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("devices"))
        .unwrap_or_else(|| PathBuf::from("devices"))
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("devfleet"))
        .unwrap_or_else(|| PathBuf::from(".devfleet"))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
