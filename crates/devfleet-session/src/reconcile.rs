use devfleet_core::DeviceDescriptor;
use tracing::warn;

use crate::{Ensure, SessionBackend, SessionError};

#[derive(Debug)]
pub struct DeviceOutcome {
    pub id: String,
    pub result: Result<Ensure, SessionError>,
}

impl DeviceOutcome {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

/// One reconciliation pass: ensure every descriptor has a running session.
///
/// A failing device never aborts its siblings; each outcome is returned so
/// the caller can report partial success.
pub fn run_pass(backend: &dyn SessionBackend, devices: &[DeviceDescriptor]) -> Vec<DeviceOutcome> {
    let mut outcomes = Vec::with_capacity(devices.len());
    for device in devices {
        let result = backend.ensure_running(&device.id, &device.launch_command);
        if let Err(err) = &result {
            warn!(id = %device.id, %err, "failed to ensure device session");
        }
        outcomes.push(DeviceOutcome {
            id: device.id.clone(),
            result,
        });
    }
    outcomes
}

pub fn failure_count(outcomes: &[DeviceOutcome]) -> usize {
    outcomes.iter().filter(|outcome| outcome.failed()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct FakeBackend {
        running: RefCell<BTreeSet<String>>,
        failing: BTreeSet<String>,
    }

    impl SessionBackend for FakeBackend {
        fn list_sessions(&self) -> Result<BTreeSet<String>, SessionError> {
            Ok(self.running.borrow().clone())
        }

        fn ensure_running(&self, id: &str, _launch_command: &str) -> Result<Ensure, SessionError> {
            if self.failing.contains(id) {
                return Err(SessionError::Backend(format!("cannot start {id}")));
            }
            if self.running.borrow_mut().insert(id.to_string()) {
                Ok(Ensure::Created)
            } else {
                Ok(Ensure::AlreadyRunning)
            }
        }

        fn attach(&self, id: &str) -> Result<(), SessionError> {
            if self.running.borrow().contains(id) {
                Ok(())
            } else {
                Err(SessionError::NotFound(id.to_string()))
            }
        }

        fn kill(&self, id: &str) -> Result<(), SessionError> {
            if self.running.borrow_mut().remove(id) {
                Ok(())
            } else {
                Err(SessionError::NotFound(id.to_string()))
            }
        }
    }

    fn device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            launch_command: format!("/usr/bin/python3 /opt/devices/{id}.py"),
        }
    }

    #[test]
    fn one_failing_device_does_not_abort_the_pass() {
        let backend = FakeBackend {
            failing: BTreeSet::from(["beta".to_string()]),
            ..FakeBackend::default()
        };
        let outcomes = run_pass(&backend, &[device("alpha"), device("beta"), device("gamma")]);

        assert_eq!(failure_count(&outcomes), 1);
        assert!(outcomes[1].failed());
        let running = backend.list_sessions().unwrap();
        assert!(running.contains("alpha"));
        assert!(running.contains("gamma"));
        assert!(!running.contains("beta"));
    }

    #[test]
    fn second_pass_is_a_noop_per_device() {
        let backend = FakeBackend::default();
        let devices = [device("alpha"), device("beta")];

        let first = run_pass(&backend, &devices);
        assert!(first
            .iter()
            .all(|outcome| matches!(outcome.result, Ok(Ensure::Created))));

        let second = run_pass(&backend, &devices);
        assert!(second
            .iter()
            .all(|outcome| matches!(outcome.result, Ok(Ensure::AlreadyRunning))));
        assert_eq!(backend.list_sessions().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_ensures_create_at_most_one_session() {
        // The backend contract: create-if-absent is a single atomic attempt,
        // so N callers racing on one id yield exactly one Created.
        let backend = FakeBackend::default();
        let devices = [device("alpha")];

        let created = (0..4)
            .flat_map(|_| run_pass(&backend, &devices))
            .filter(|outcome| matches!(outcome.result, Ok(Ensure::Created)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(backend.list_sessions().unwrap().len(), 1);
    }
}
