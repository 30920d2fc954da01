//! # gce-disk-name
//! Resolves the name a cloud platform assigned to an attached persistent disk,
//! starting from nothing but the OS device path (e.g. `\\.\PhysicalDrive1`).
//!
//! ## How it works
//! *   **Property queries**: every lookup goes through `IOCTL_STORAGE_QUERY_PROPERTY`.
//!     Variable-length answers are sized with a header probe first ([`query`]).
//! *   **NVMe disks**: the namespace id comes from the device identifier list and the
//!     name from the vendor specific region of Identify Namespace ([`nvme`]).
//! *   **SCSI disks**: the name follows the `"Google  "` prefix of the vendor id
//!     designator ([`resolver`]).
//!
//! Only Windows has the query surface; elsewhere every open fails with
//! [`OpenFailure::Other`].

pub mod error;
pub mod layout;
pub mod nvme;
mod platform;
pub mod query;
pub mod resolver;

pub use error::{DiskError, OpenFailure, Result};
pub use platform::{physical_drive_paths, DeviceHandle};
pub use query::{BusType, PropertyChannel, StorageSurface};
pub use resolver::DeviceNameResolver;

use tracing::{info, warn};

/// The outcome of resolving one device path.
#[derive(Debug)]
pub struct DeviceReport {
    /// The OS device path that was resolved.
    pub path: String,
    /// The device name (empty for a disk that is not a Google persistent disk), or why
    /// it could not be resolved.
    pub outcome: std::result::Result<String, DiskError>,
}

impl DeviceReport {
    pub fn name(&self) -> Option<&str> {
        self.outcome.as_deref().ok().filter(|name| !name.is_empty())
    }

    /// True when resolution failed for a reason other than the device itself
    /// (unsupported bus, not a Google disk).
    pub fn is_failure(&self) -> bool {
        matches!(&self.outcome, Err(e) if !e.is_expected())
    }
}

/// Resolves every path in order, opening each with `open`.
///
/// Devices are independent: each gets its own handle, dropped before the next path is
/// opened, and a failure on one path is recorded in its report without stopping the
/// others.
pub fn resolve_all<I, P, S, F>(paths: I, mut open: F) -> Vec<DeviceReport>
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
    S: StorageSurface,
    F: FnMut(&str) -> Result<S>,
{
    paths
        .into_iter()
        .map(|path| {
            let path = path.as_ref().to_string();
            let outcome = open(&path).and_then(|surface| DeviceNameResolver::new(surface).get_device_name());
            match &outcome {
                Ok(name) => info!(path = %path, name = %name, "resolved device name"),
                Err(e) if e.is_expected() => info!(path = %path, kind = e.kind(), "{}", e),
                Err(e) => warn!(path = %path, kind = e.kind(), os_code = ?e.os_code(), "{}", e),
            }
            DeviceReport { path, outcome }
        })
        .collect()
}

/// Resolves the names of all physical drives on this host.
///
/// # Permissions
/// Opening a drive for query requires administrator privileges; without them every
/// report carries [`OpenFailure::PermissionDenied`].
pub fn discover() -> Vec<DeviceReport> {
    resolve_all(physical_drive_paths(), DeviceHandle::open)
}
