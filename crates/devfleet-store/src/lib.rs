use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use devfleet_core::{merge_devices, remove_devices, DeviceDescriptor};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub mod discovery;
pub mod launcher;
pub mod schedule;

use launcher::{render_launcher, LAUNCHER_FILE};
use schedule::{ScheduleError, Scheduler};

pub const STATE_FILE: &str = "devices.json";
const LOCK_FILE: &str = ".devfleet.lock";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    devices: Vec<DeviceDescriptor>,
}

/// The operator-declared set of devices that should always be running.
///
/// The data lives in `devices.json`; the launcher form (`ensure-devices.sh`)
/// is regenerated from it wholesale on every mutation and never parsed back.
/// Mutations keep two invariants without caller help: the launcher exists
/// iff the set is non-empty, and the schedule is armed iff the launcher
/// exists.
pub struct DesiredStateStore<S: Scheduler> {
    state_dir: PathBuf,
    scheduler: S,
}

impl<S: Scheduler> DesiredStateStore<S> {
    pub fn new(state_dir: PathBuf, scheduler: S) -> Self {
        Self {
            state_dir,
            scheduler,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    pub fn launcher_path(&self) -> PathBuf {
        self.state_dir.join(LAUNCHER_FILE)
    }

    /// Install the requested ids, resolved against the discovered scripts.
    /// Unknown ids are dropped, not errors. Returns the resulting set.
    pub fn install(
        &self,
        ids: &[String],
        available: &[DeviceDescriptor],
    ) -> Result<Vec<DeviceDescriptor>, StoreError> {
        let _lock = self.lock()?;
        let current = self.read_state()?;
        let mut additions = Vec::new();
        for id in ids {
            match available.iter().find(|device| &device.id == id) {
                Some(device) => additions.push(device.clone()),
                None => debug!(id = %id, "dropping id with no matching device script"),
            }
        }
        let merged = merge_devices(current, additions);
        self.write_state(&merged)?;
        Ok(merged)
    }

    /// Remove the named ids (no-op for absent ones). Returns the remainder.
    pub fn uninstall(&self, ids: &[String]) -> Result<Vec<DeviceDescriptor>, StoreError> {
        let _lock = self.lock()?;
        let remaining = remove_devices(self.read_state()?, ids);
        self.write_state(&remaining)?;
        Ok(remaining)
    }

    /// Descriptors in file order. A missing state file is an empty store.
    pub fn list(&self) -> Result<Vec<DeviceDescriptor>, StoreError> {
        self.read_state()
    }

    fn read_state(&self) -> Result<Vec<DeviceDescriptor>, StoreError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let state: StateFile =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse { path, source })?;
        Ok(state.devices)
    }

    fn write_state(&self, devices: &[DeviceDescriptor]) -> Result<(), StoreError> {
        if devices.is_empty() {
            remove_if_present(&self.state_path())?;
            remove_if_present(&self.launcher_path())?;
            self.scheduler.disarm(&self.launcher_path())?;
            info!("desired set empty; artifacts removed and schedule disarmed");
            return Ok(());
        }

        let state = StateFile {
            devices: devices.to_vec(),
        };
        let payload = serde_json::to_string_pretty(&state).map_err(|source| StoreError::Parse {
            path: self.state_path(),
            source,
        })?;
        write_atomic(&self.state_path(), &payload)?;
        write_atomic(&self.launcher_path(), &render_launcher(devices))?;
        mark_executable(&self.launcher_path())?;
        self.scheduler.arm(&self.launcher_path())?;
        info!(devices = devices.len(), "desired state rewritten");
        Ok(())
    }

    fn lock(&self) -> Result<fs::File, StoreError> {
        fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;
        let path = self.state_dir.join(LOCK_FILE);
        let file = fs::File::create(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        file.lock_exclusive()
            .map_err(|source| StoreError::Io { path, source })?;
        Ok(file)
    }
}

// Crash mid-write must never leave a truncated artifact, so every rewrite
// goes through a sibling temp file and a rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::schedule::{ScheduleError, Scheduler};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RecordingScheduler {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingScheduler {
        fn events(&self) -> Vec<String> {
            self.events.borrow().clone()
        }
    }

    impl Scheduler for RecordingScheduler {
        fn arm(&self, _artifact: &Path) -> Result<(), ScheduleError> {
            self.events.borrow_mut().push("arm".to_string());
            Ok(())
        }

        fn disarm(&self, _artifact: &Path) -> Result<(), ScheduleError> {
            self.events.borrow_mut().push("disarm".to_string());
            Ok(())
        }
    }

    fn store(dir: &Path) -> (DesiredStateStore<RecordingScheduler>, RecordingScheduler) {
        let scheduler = RecordingScheduler::default();
        (
            DesiredStateStore::new(dir.to_path_buf(), scheduler.clone()),
            scheduler,
        )
    }

    fn device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            launch_command: format!("/usr/bin/python3 /opt/devices/{id}.py"),
        }
    }

    fn ids(devices: &[DeviceDescriptor]) -> Vec<&str> {
        devices.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn install_then_list_preserves_selection_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());
        let available = [device("alpha"), device("beta"), device("gamma")];

        store
            .install(&["beta".to_string(), "alpha".to_string()], &available)
            .expect("install");
        assert_eq!(ids(&store.list().expect("list")), ["beta", "alpha"]);

        store
            .install(&["gamma".to_string()], &available)
            .expect("install");
        assert_eq!(ids(&store.list().expect("list")), ["beta", "alpha", "gamma"]);
    }

    #[test]
    fn install_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());
        let available = [device("alpha"), device("beta")];
        let all = vec!["alpha".to_string(), "beta".to_string()];

        let first = store.install(&all, &available).expect("install");
        let state_bytes = fs::read(store.state_path()).expect("state");
        let launcher_bytes = fs::read(store.launcher_path()).expect("launcher");

        let second = store
            .install(&["alpha".to_string()], &available)
            .expect("install");
        assert_eq!(first, second);
        assert_eq!(fs::read(store.state_path()).expect("state"), state_bytes);
        assert_eq!(
            fs::read(store.launcher_path()).expect("launcher"),
            launcher_bytes
        );
    }

    #[test]
    fn unknown_ids_are_silently_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());
        let available = [device("alpha")];

        let installed = store
            .install(&["alpha".to_string(), "ghost".to_string()], &available)
            .expect("install");
        assert_eq!(ids(&installed), ["alpha"]);
    }

    #[test]
    fn mutation_arms_schedule_and_writes_executable_launcher() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, scheduler) = store(dir.path());

        store
            .install(&["alpha".to_string()], &[device("alpha")])
            .expect("install");
        assert_eq!(scheduler.events(), ["arm"]);

        let script = fs::read_to_string(store.launcher_path()).expect("launcher");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("new-session -d -s alpha"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.launcher_path())
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn fresh_install_writes_directives_in_selection_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, scheduler) = store(dir.path());
        let available = [device("alpha"), device("beta")];

        store
            .install(&["alpha".to_string(), "beta".to_string()], &available)
            .expect("install");

        let script = fs::read_to_string(store.launcher_path()).expect("launcher");
        let directives: Vec<&str> = script
            .lines()
            .filter(|line| line.starts_with("tmux"))
            .collect();
        assert_eq!(directives.len(), 2);
        assert!(directives[0].contains("-s alpha"));
        assert!(directives[1].contains("-s beta"));
        assert_eq!(scheduler.events(), ["arm"]);
    }

    #[test]
    fn uninstall_of_last_device_drains_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, scheduler) = store(dir.path());
        let available = [device("alpha"), device("beta")];

        store
            .install(&["alpha".to_string(), "beta".to_string()], &available)
            .expect("install");
        store.uninstall(&["alpha".to_string()]).expect("uninstall");
        assert_eq!(ids(&store.list().expect("list")), ["beta"]);

        store.uninstall(&["beta".to_string()]).expect("uninstall");
        assert!(store.list().expect("list").is_empty());
        assert!(!store.state_path().exists());
        assert!(!store.launcher_path().exists());
        assert_eq!(scheduler.events(), ["arm", "arm", "disarm"]);
    }

    #[test]
    fn uninstall_of_absent_id_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());

        store
            .install(&["alpha".to_string()], &[device("alpha")])
            .expect("install");
        let remaining = store.uninstall(&["ghost".to_string()]).expect("uninstall");
        assert_eq!(ids(&remaining), ["alpha"]);
    }

    #[test]
    fn rewrites_leave_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());

        store
            .install(&["alpha".to_string()], &[device("alpha")])
            .expect("install");
        let leftovers: Vec<String> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[test]
    fn list_on_fresh_store_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, scheduler) = store(dir.path());
        assert!(store.list().expect("list").is_empty());
        assert!(scheduler.events().is_empty());
    }
}
