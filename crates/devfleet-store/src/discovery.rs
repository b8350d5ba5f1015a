use std::fs;
use std::io;
use std::path::Path;

use devfleet_core::{is_valid_device_id, DeviceDescriptor};
use tracing::debug;

// Packaging entry points that live next to the device scripts.
const EXCLUDED_SCRIPTS: &[&str] = &["setup.py"];

/// Scan a directory (non-recursive) for candidate worker scripts.
///
/// A candidate is an executable regular `.py` file whose stem is a usable
/// session name. The returned launch commands are fully qualified:
/// absolute interpreter plus absolute script path. Sorted by id so menus
/// render in a stable order.
pub fn scan_devices(dir: &Path, interpreter: &Path) -> io::Result<Vec<DeviceDescriptor>> {
    let dir = fs::canonicalize(dir)?;
    let mut devices = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.ends_with(".py") || EXCLUDED_SCRIPTS.contains(&name) {
            continue;
        }
        if !is_executable(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if !is_valid_device_id(stem) {
            debug!(script = name, "skipping script with unusable name");
            continue;
        }
        devices.push(DeviceDescriptor {
            id: stem.to_string(),
            launch_command: format!("{} {}", interpreter.display(), path.display()),
        });
    }
    devices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(devices)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
