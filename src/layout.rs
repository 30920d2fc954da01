//! Byte layouts of the Win32 storage query structures.
//!
//! Requests and responses live in owned `Vec<u8>` buffers and are decoded field by
//! field. Every read validates `offset + size` against the buffer length first, so a
//! short or lying driver response turns into [`DiskError::MalformedResponse`].

use crate::error::{DiskError, Result};

// STORAGE_PROPERTY_QUERY
pub const QUERY_PROPERTY_ID: usize = 0;
pub const QUERY_TYPE: usize = 4;
pub const QUERY_ADDITIONAL_PARAMETERS: usize = 8;

// STORAGE_DESCRIPTOR_HEADER
pub const HEADER_VERSION: usize = 0;
pub const HEADER_SIZE: usize = 4;
pub const DESCRIPTOR_HEADER_LEN: usize = 8;

// STORAGE_DEVICE_DESCRIPTOR
pub const DEVICE_VENDOR_ID_OFFSET: usize = 12;
pub const DEVICE_PRODUCT_ID_OFFSET: usize = 16;
pub const DEVICE_PRODUCT_REVISION_OFFSET: usize = 20;
pub const DEVICE_SERIAL_NUMBER_OFFSET: usize = 24;
pub const DEVICE_BUS_TYPE: usize = 28;

// STORAGE_DEVICE_ID_DESCRIPTOR
pub const ID_NUMBER_OF_IDENTIFIERS: usize = 8;
pub const ID_IDENTIFIERS: usize = 12;

// STORAGE_IDENTIFIER, relative to the record start
pub const IDENTIFIER_CODE_SET: usize = 0;
pub const IDENTIFIER_TYPE: usize = 4;
pub const IDENTIFIER_SIZE: usize = 8;
pub const IDENTIFIER_NEXT_OFFSET: usize = 10;
pub const IDENTIFIER_ASSOCIATION: usize = 12;
pub const IDENTIFIER_DATA: usize = 16;

// STORAGE_PROTOCOL_SPECIFIC_DATA, relative to the start of the protocol section
pub const PROTOCOL_TYPE: usize = 0;
pub const PROTOCOL_DATA_TYPE: usize = 4;
pub const PROTOCOL_REQUEST_VALUE: usize = 8;
pub const PROTOCOL_REQUEST_SUB_VALUE: usize = 12;
pub const PROTOCOL_DATA_OFFSET: usize = 16;
pub const PROTOCOL_DATA_LENGTH: usize = 20;
pub const PROTOCOL_SPECIFIC_DATA_LEN: usize = 40;

// STORAGE_PROTOCOL_DATA_DESCRIPTOR
pub const PROTOCOL_DESCRIPTOR_SPECIFIC_DATA: usize = 8;
pub const PROTOCOL_DATA_DESCRIPTOR_LEN: usize = PROTOCOL_DESCRIPTOR_SPECIFIC_DATA + PROTOCOL_SPECIFIC_DATA_LEN;

/// Borrows `len` bytes at `offset`.
pub fn bytes(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            DiskError::MalformedResponse(format!(
                "need {} bytes at offset {}, buffer holds {}",
                len,
                offset,
                buf.len()
            ))
        })
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(bytes(buf, offset, 2)?);
    Ok(u16::from_le_bytes(raw))
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes(buf, offset, 4)?);
    Ok(u32::from_le_bytes(raw))
}

pub fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes(buf, offset, 8)?);
    Ok(u64::from_le_bytes(raw))
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    write_bytes(buf, offset, &value.to_le_bytes())
}

pub fn write_bytes(buf: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
    let len = buf.len();
    offset
        .checked_add(data.len())
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| {
            DiskError::MalformedResponse(format!(
                "cannot place {} bytes at offset {} in a {} byte buffer",
                data.len(),
                offset,
                len
            ))
        })?
        .copy_from_slice(data);
    Ok(())
}

/// The bytes before the first NUL, or all of them.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Reads the NUL-terminated string a descriptor offset field points at.
/// An offset of zero means the driver did not report the string.
pub fn offset_string(buf: &[u8], offset_field: usize) -> Result<Option<String>> {
    let offset = read_u32(buf, offset_field)? as usize;
    if offset == 0 {
        return Ok(None);
    }
    let tail = buf.get(offset..).ok_or_else(|| {
        DiskError::MalformedResponse(format!("string offset {} past end of {} byte descriptor", offset, buf.len()))
    })?;
    let s = String::from_utf8_lossy(until_nul(tail)).trim().to_string();
    Ok(if s.is_empty() { None } else { Some(s) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let buf = [0x34, 0x12, 0x78, 0x56, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(read_u16(&buf, 0).unwrap(), 0x1234);
        assert_eq!(read_u32(&buf, 0).unwrap(), 0x5678_1234);
        assert_eq!(read_u64(&buf, 1).unwrap(), 0x0100_0000_0056_7812);
    }

    #[test]
    fn out_of_bounds_read_is_malformed() {
        let buf = [0u8; 6];
        assert!(matches!(read_u32(&buf, 4), Err(DiskError::MalformedResponse(_))));
        assert!(matches!(bytes(&buf, usize::MAX, 2), Err(DiskError::MalformedResponse(_))));
    }

    #[test]
    fn write_is_bounds_checked() {
        let mut buf = [0u8; 8];
        write_u32(&mut buf, 4, 0xAABBCCDD).unwrap();
        assert_eq!(&buf[4..], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert!(write_u32(&mut buf, 6, 1).is_err());
    }

    #[test]
    fn offset_strings() {
        let mut buf = vec![0u8; 16];
        buf[0] = 8;
        buf[8..14].copy_from_slice(b"Google");
        assert_eq!(offset_string(&buf, 0).unwrap().as_deref(), Some("Google"));
        assert_eq!(offset_string(&buf, 4).unwrap(), None);

        buf[0] = 200;
        assert!(offset_string(&buf, 0).is_err());
    }

    #[test]
    fn nul_terminated_view() {
        assert_eq!(until_nul(b"abc\0def"), b"abc");
        assert_eq!(until_nul(b"abc"), b"abc");
    }
}
