use std::fmt;

use crate::nvme::NvmeVersion;
use crate::query::{BusType, PropertyId};

/// Windows `ERROR_ACCESS_DENIED`.
pub const ERROR_ACCESS_DENIED: i32 = 5;
/// Windows `ERROR_FILE_NOT_FOUND`.
pub const ERROR_FILE_NOT_FOUND: i32 = 2;
/// Windows `ERROR_NOT_SUPPORTED`, reported by the open path on other targets.
pub const ERROR_NOT_SUPPORTED: i32 = 50;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Why a device path could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    PermissionDenied,
    Other(i32),
}

impl OpenFailure {
    pub fn from_os_code(code: i32) -> Self {
        if code == ERROR_ACCESS_DENIED {
            OpenFailure::PermissionDenied
        } else {
            OpenFailure::Other(code)
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return OpenFailure::PermissionDenied;
        }
        Self::from_os_code(err.raw_os_error().unwrap_or(ERROR_NOT_SUPPORTED))
    }
}

impl fmt::Display for OpenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenFailure::PermissionDenied => write!(f, "permission denied"),
            OpenFailure::Other(code) => write!(f, "os error {}", code),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: OpenFailure },

    #[error("failed to allocate a {size} byte query buffer")]
    AllocationFailed { size: usize },

    #[error("{property:?} query failed with os error {code}")]
    QueryFailed { property: PropertyId, code: i32 },

    #[error("unsupported bus type {0:?}, device must be attached as NVMe or SCSI")]
    UnsupportedBusType(BusType),

    #[error("device is not a Google persistent disk")]
    NotAGoogleDisk,

    #[error("vendor specific namespace data carries no device_name field")]
    MalformedVendorData,

    #[error("NVMe version {0} is not supported, at least 1.0 is required")]
    UnsupportedNvmeVersion(NvmeVersion),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl DiskError {
    /// The OS error code behind this failure, where there is one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            DiskError::OpenFailed { reason: OpenFailure::PermissionDenied, .. } => Some(ERROR_ACCESS_DENIED),
            DiskError::OpenFailed { reason: OpenFailure::Other(code), .. } => Some(*code),
            DiskError::QueryFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Outcomes that describe the device rather than a failure to inspect it.
    pub fn is_expected(&self) -> bool {
        matches!(self, DiskError::UnsupportedBusType(_) | DiskError::NotAGoogleDisk)
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DiskError::OpenFailed { reason: OpenFailure::PermissionDenied, .. } => "open_permission_denied",
            DiskError::OpenFailed { .. } => "open_failed",
            DiskError::AllocationFailed { .. } => "allocation_failed",
            DiskError::QueryFailed { .. } => "query_failed",
            DiskError::UnsupportedBusType(_) => "unsupported_bus_type",
            DiskError::NotAGoogleDisk => "not_a_google_disk",
            DiskError::MalformedVendorData => "malformed_vendor_data",
            DiskError::UnsupportedNvmeVersion(_) => "unsupported_nvme_version",
            DiskError::MalformedResponse(_) => "malformed_response",
        }
    }
}
