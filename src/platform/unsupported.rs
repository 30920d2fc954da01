// src/platform/unsupported.rs

use crate::error::{DiskError, OpenFailure, Result, ERROR_NOT_SUPPORTED};
use crate::query::StorageSurface;
use std::io;

enum Never {}

/// Stands in for a device handle where the storage query surface does not exist.
/// It cannot be constructed: every open fails.
pub struct DeviceHandle(Never);

impl DeviceHandle {
    pub fn open(path: &str) -> Result<Self> {
        Err(DiskError::OpenFailed { path: path.to_string(), reason: OpenFailure::Other(ERROR_NOT_SUPPORTED) })
    }

    pub fn path(&self) -> &str {
        match self.0 {}
    }
}

impl StorageSurface for DeviceHandle {
    fn query_property(&mut self, _buffer: &mut [u8]) -> io::Result<usize> {
        match self.0 {}
    }
}

pub fn physical_drive_paths() -> Vec<String> {
    Vec::new()
}
