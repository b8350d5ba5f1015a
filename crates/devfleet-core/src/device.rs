use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One installable worker: a unique id and the command that starts it.
///
/// The id doubles as the multiplexer session name, so it must stay free of
/// path separators and of the characters tmux target syntax reserves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    #[serde(rename = "launchCommand")]
    pub launch_command: String,
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("device id pattern"))
}

pub fn is_valid_device_id(id: &str) -> bool {
    id_pattern().is_match(id)
}

/// Union of `existing` and `additions`, deduplicated by id. New ids are
/// appended after existing ones so file order survives repeated installs.
pub fn merge_devices(
    existing: Vec<DeviceDescriptor>,
    additions: Vec<DeviceDescriptor>,
) -> Vec<DeviceDescriptor> {
    let mut merged = existing;
    for device in additions {
        if !merged.iter().any(|present| present.id == device.id) {
            merged.push(device);
        }
    }
    merged
}

pub fn remove_devices(existing: Vec<DeviceDescriptor>, ids: &[String]) -> Vec<DeviceDescriptor> {
    existing
        .into_iter()
        .filter(|device| !ids.contains(&device.id))
        .collect()
}
