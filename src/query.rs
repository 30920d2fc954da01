//! Generic `IOCTL_STORAGE_QUERY_PROPERTY` round trips over one open device.
//!
//! Most storage properties answer with a self-describing header whose `Size` field
//! gives the full response length, which is not known up front (identifier lists,
//! descriptors with trailing strings). [`PropertyChannel::query`] therefore asks for
//! the header first, then allocates exactly that much and asks again. Callers that
//! know the payload is fixed-size pass a size hint and get a single round trip.

use std::io;

use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::debug;

use crate::error::{DiskError, Result};
use crate::layout::{self, *};

/// `sizeof(STORAGE_PROPERTY_QUERY)`: the smallest input buffer drivers accept.
pub const PROPERTY_QUERY_LEN: usize = 12;
/// `PropertyStandardQuery`.
pub const PROPERTY_STANDARD_QUERY: u32 = 0;

/// The OS storage-property control surface of one open device.
///
/// `buffer` holds the encoded request on entry and receives the response; it is
/// passed as both the input and output buffer of the control call. Returns the
/// number of bytes the driver wrote.
pub trait StorageSurface {
    fn query_property(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

impl<S: StorageSurface + ?Sized> StorageSurface for Box<S> {
    fn query_property(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).query_property(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u32)]
pub enum PropertyId {
    StorageDeviceProperty = 0,
    StorageDeviceIdProperty = 2,
    StorageAdapterProtocolSpecificProperty = 49,
    StorageDeviceProtocolSpecificProperty = 50,
}

/// `STORAGE_BUS_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum BusType {
    Scsi = 1,
    Atapi = 2,
    Ata = 3,
    Ieee1394 = 4,
    Ssa = 5,
    Fibre = 6,
    Usb = 7,
    Raid = 8,
    IScsi = 9,
    Sas = 10,
    Sata = 11,
    Sd = 12,
    Mmc = 13,
    Virtual = 14,
    FileBackedVirtual = 15,
    Spaces = 16,
    Nvme = 17,
    Scm = 18,
    Ufs = 19,
    #[num_enum(catch_all)]
    Unknown(u32),
}

/// `STORAGE_IDENTIFIER_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum IdentifierType {
    VendorSpecific = 0,
    VendorId = 1,
    Eui64 = 2,
    FcphName = 3,
    PortRelative = 4,
    TargetPortGroup = 5,
    LogicalUnitGroup = 6,
    Md5LogicalUnitIdentifier = 7,
    ScsiNameString = 8,
    #[num_enum(catch_all)]
    Other(u32),
}

/// `STORAGE_ASSOCIATION_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum Association {
    Device = 0,
    Port = 1,
    Target = 2,
    #[num_enum(catch_all)]
    Other(u32),
}

/// The parts of `STORAGE_DEVICE_DESCRIPTOR` this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bus_type: BusType,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub product_revision: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Ok(DeviceDescriptor {
            bus_type: BusType::from(read_u32(buf, DEVICE_BUS_TYPE)?),
            vendor_id: offset_string(buf, DEVICE_VENDOR_ID_OFFSET)?,
            product_id: offset_string(buf, DEVICE_PRODUCT_ID_OFFSET)?,
            product_revision: offset_string(buf, DEVICE_PRODUCT_REVISION_OFFSET)?,
            serial_number: offset_string(buf, DEVICE_SERIAL_NUMBER_OFFSET)?,
        })
    }
}

/// One `STORAGE_IDENTIFIER` record of a device identifier list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageIdentifier {
    pub code_set: u32,
    pub id_type: IdentifierType,
    pub association: Association,
    pub data: Vec<u8>,
}

impl StorageIdentifier {
    /// The identifier bytes read as a C string.
    pub fn ascii(&self) -> String {
        String::from_utf8_lossy(layout::until_nul(&self.data)).into_owned()
    }
}

/// Decodes a `STORAGE_DEVICE_ID_DESCRIPTOR` into its identifier records, in order.
pub fn parse_identifiers(buf: &[u8]) -> Result<Vec<StorageIdentifier>> {
    let count = read_u32(buf, ID_NUMBER_OF_IDENTIFIERS)? as usize;
    let mut identifiers = Vec::with_capacity(count.min(64));
    let mut offset = ID_IDENTIFIERS;

    for i in 0..count {
        let size = read_u16(buf, offset + IDENTIFIER_SIZE)? as usize;
        let next = read_u16(buf, offset + IDENTIFIER_NEXT_OFFSET)? as usize;
        identifiers.push(StorageIdentifier {
            code_set: read_u32(buf, offset + IDENTIFIER_CODE_SET)?,
            id_type: IdentifierType::from(read_u32(buf, offset + IDENTIFIER_TYPE)?),
            association: Association::from(read_u32(buf, offset + IDENTIFIER_ASSOCIATION)?),
            data: layout::bytes(buf, offset + IDENTIFIER_DATA, size)?.to_vec(),
        });

        if i + 1 < count {
            if next == 0 {
                return Err(DiskError::MalformedResponse(format!(
                    "identifier {} of {} has no next offset",
                    i + 1,
                    count
                )));
            }
            offset += next;
        }
    }
    Ok(identifiers)
}

/// Owns one open device and issues storage property queries against it.
pub struct PropertyChannel<S> {
    surface: S,
}

impl<S: StorageSurface> PropertyChannel<S> {
    pub fn new(surface: S) -> Self {
        PropertyChannel { surface }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_inner(self) -> S {
        self.surface
    }

    /// Queries `property`, embedding `params` as the query's additional parameters.
    ///
    /// With `size_hint` the buffer is `max(request, hint)` bytes and one round trip is
    /// made; the result is cut to the bytes the driver wrote. Without it a header-sized
    /// probe learns the declared size first and the returned buffer is exactly that long.
    pub fn query(&mut self, property: PropertyId, params: Option<&[u8]>, size_hint: Option<usize>) -> Result<Vec<u8>> {
        let request_len = (QUERY_ADDITIONAL_PARAMETERS + params.map_or(0, <[u8]>::len)).max(PROPERTY_QUERY_LEN);

        if let Some(hint) = size_hint {
            let (mut buffer, returned) = self.round_trip(property, params, request_len.max(hint))?;
            buffer.truncate(returned);
            return Ok(buffer);
        }

        let (probe, _) = self.round_trip(property, params, request_len.max(DESCRIPTOR_HEADER_LEN))?;
        let declared = read_u32(&probe, HEADER_SIZE)? as usize;
        drop(probe);
        if declared < DESCRIPTOR_HEADER_LEN {
            return Err(DiskError::MalformedResponse(format!(
                "{:?} declared a {} byte response, smaller than its own header",
                property, declared
            )));
        }

        let (mut buffer, returned) = self.round_trip(property, params, request_len.max(declared))?;
        let reported = read_u32(&buffer, HEADER_SIZE)? as usize;
        if reported != declared || returned < declared {
            return Err(DiskError::MalformedResponse(format!(
                "{:?} declared {} bytes, then reported {} and returned {}",
                property, declared, reported, returned
            )));
        }
        buffer.truncate(declared);
        Ok(buffer)
    }

    pub fn device_descriptor(&mut self) -> Result<DeviceDescriptor> {
        let buffer = self.query(PropertyId::StorageDeviceProperty, None, None)?;
        let descriptor = DeviceDescriptor::parse(&buffer)?;
        debug!(
            bus_type = ?descriptor.bus_type,
            vendor = descriptor.vendor_id.as_deref().unwrap_or(""),
            product = descriptor.product_id.as_deref().unwrap_or(""),
            serial = descriptor.serial_number.as_deref().unwrap_or(""),
            "device descriptor"
        );
        Ok(descriptor)
    }

    pub fn bus_type(&mut self) -> Result<BusType> {
        self.device_descriptor().map(|d| d.bus_type)
    }

    pub fn device_identifiers(&mut self) -> Result<Vec<StorageIdentifier>> {
        let buffer = self.query(PropertyId::StorageDeviceIdProperty, None, None)?;
        let identifiers = parse_identifiers(&buffer)?;
        debug!(count = identifiers.len(), "device identifiers");
        Ok(identifiers)
    }

    fn round_trip(&mut self, property: PropertyId, params: Option<&[u8]>, len: usize) -> Result<(Vec<u8>, usize)> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| DiskError::AllocationFailed { size: len })?;
        buffer.resize(len, 0);

        write_u32(&mut buffer, QUERY_PROPERTY_ID, property.into())?;
        write_u32(&mut buffer, QUERY_TYPE, PROPERTY_STANDARD_QUERY)?;
        if let Some(params) = params {
            write_bytes(&mut buffer, QUERY_ADDITIONAL_PARAMETERS, params)?;
        }

        let returned = self
            .surface
            .query_property(&mut buffer)
            .map_err(|e| DiskError::QueryFailed { property, code: e.raw_os_error().unwrap_or(-1) })?;
        debug!(?property, requested = len, returned, "storage property round trip");

        if returned < DESCRIPTOR_HEADER_LEN {
            return Err(DiskError::MalformedResponse(format!(
                "{:?} returned {} bytes, less than a descriptor header",
                property, returned
            )));
        }
        Ok((buffer, returned))
    }
}
