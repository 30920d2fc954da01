//! OS backends for the storage property surface.

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::{physical_drive_paths, DeviceHandle};

#[cfg(not(windows))]
mod unsupported;
#[cfg(not(windows))]
pub use self::unsupported::{physical_drive_paths, DeviceHandle};
