pub mod device;
pub mod select;

pub use device::{is_valid_device_id, merge_devices, remove_devices, DeviceDescriptor};
pub use select::{resolve_multi, resolve_single, SelectError};
