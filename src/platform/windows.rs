// src/platform/windows.rs

use crate::error::{DiskError, OpenFailure, Result, ERROR_FILE_NOT_FOUND};
use crate::layout;
use crate::query::{StorageSurface, PROPERTY_QUERY_LEN};
use std::ffi::c_void;
use std::io;
use std::mem::{offset_of, size_of};
use std::ptr::{null, null_mut};
use tracing::debug;

use windows_sys::Win32::{
    Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING},
    System::IO::DeviceIoControl,
    System::Ioctl::{
        IOCTL_STORAGE_QUERY_PROPERTY, STORAGE_DEVICE_DESCRIPTOR, STORAGE_PROPERTY_QUERY,
        STORAGE_PROTOCOL_DATA_DESCRIPTOR, STORAGE_PROTOCOL_SPECIFIC_DATA,
    },
};

// The decoders work on byte offsets; keep them in step with the SDK structures.
const _: () = {
    assert!(offset_of!(STORAGE_PROPERTY_QUERY, AdditionalParameters) == layout::QUERY_ADDITIONAL_PARAMETERS);
    assert!(size_of::<STORAGE_PROPERTY_QUERY>() == PROPERTY_QUERY_LEN);
    assert!(offset_of!(STORAGE_DEVICE_DESCRIPTOR, BusType) == layout::DEVICE_BUS_TYPE);
    assert!(offset_of!(STORAGE_PROTOCOL_DATA_DESCRIPTOR, ProtocolSpecificData) == layout::PROTOCOL_DESCRIPTOR_SPECIFIC_DATA);
    assert!(offset_of!(STORAGE_PROTOCOL_SPECIFIC_DATA, ProtocolDataOffset) == layout::PROTOCOL_DATA_OFFSET);
};

const MAX_PHYSICAL_DRIVES: u32 = 64;

/// An open device handle, closed exactly once on drop.
pub struct DeviceHandle {
    handle: HANDLE,
    path: String,
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.handle) };
            debug!(path = %self.path, "closed device handle");
        }
    }
}

impl DeviceHandle {
    /// Opens `path` for read/write with shared read.
    pub fn open(path: &str) -> Result<Self> {
        let handle = create_file(path, GENERIC_READ | GENERIC_WRITE, FILE_SHARE_READ).map_err(|e| {
            DiskError::OpenFailed { path: path.to_string(), reason: OpenFailure::from_io(&e) }
        })?;
        debug!(path, "opened device handle");
        Ok(DeviceHandle { handle, path: path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl StorageSurface for DeviceHandle {
    fn query_property(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let len = u32::try_from(buffer.len()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let data = buffer.as_mut_ptr() as *mut c_void;
        let mut bytes_returned: u32 = 0;

        let result = unsafe {
            DeviceIoControl(
                self.handle,
                IOCTL_STORAGE_QUERY_PROPERTY,
                data as *const c_void,
                len,
                data,
                len,
                &mut bytes_returned,
                null_mut(),
            )
        };

        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(bytes_returned as usize)
    }
}

fn create_file(path: &str, access: u32, share: u32) -> io::Result<HANDLE> {
    let wide_path: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
    let handle = unsafe { CreateFileW(wide_path.as_ptr(), access, share, null(), OPEN_EXISTING, 0, null_mut()) };
    if handle == INVALID_HANDLE_VALUE {
        Err(io::Error::last_os_error())
    } else {
        Ok(handle)
    }
}

/// `\\.\PhysicalDriveN` paths present on this host.
///
/// Each candidate is probed with a zero-access open, which needs no privilege. Only
/// "file not found" drops a candidate; any other failure is left for the resolver to
/// report against that path.
pub fn physical_drive_paths() -> Vec<String> {
    (0..MAX_PHYSICAL_DRIVES)
        .map(|i| format!("\\\\.\\PhysicalDrive{}", i))
        .filter(|path| match create_file(path, 0, FILE_SHARE_READ | FILE_SHARE_WRITE) {
            Ok(handle) => {
                unsafe { CloseHandle(handle) };
                true
            }
            Err(e) => e.raw_os_error() != Some(ERROR_FILE_NOT_FOUND),
        })
        .collect()
}
