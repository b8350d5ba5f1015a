use devfleet_core::DeviceDescriptor;

pub const LAUNCHER_FILE: &str = "ensure-devices.sh";

const HEADER: &str = "#!/bin/sh\n\
# Regenerated in full by devfleet on every install/uninstall. Do not edit.\n\
# Each line is an atomic create-if-absent: a duplicate session is a no-op.\n";

/// Map the device list to its executable launcher form. Deterministic: an
/// unchanged input set renders byte-identical output.
pub fn render_launcher(devices: &[DeviceDescriptor]) -> String {
    let mut script = String::from(HEADER);
    for device in devices {
        script.push_str(&format!(
            "tmux new-session -d -s {} {} 2>/dev/null || true\n",
            shell_words::quote(&device.id),
            shell_words::quote(&device.launch_command),
        ));
    }
    script
}
