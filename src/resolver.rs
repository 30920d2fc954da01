//! Cloud-assigned device names for one open disk.
//!
//! The bus type picks an [`Identification`] strategy. NVMe disks carry the name in
//! the vendor specific region of Identify Namespace as a minified JSON object; SCSI
//! disks carry it in their vendor id designator after a fixed `"Google  "` prefix.

use tracing::{debug, info};

use crate::error::{DiskError, Result};
use crate::layout;
use crate::nvme::{NvmeIdentifier, NvmeVersion};
use crate::platform::DeviceHandle;
use crate::query::{Association, BusType, IdentifierType, PropertyChannel, StorageIdentifier, StorageSurface};

/// Vendor id designator prefix of Google persistent disks attached over SCSI.
pub const GOOGLE_SCSI_PREFIX: &str = "Google  ";
/// Key that introduces the device name inside the NVMe vendor specific blob.
pub const DEVICE_NAME_KEY: &str = "\"device_name\":\"";

/// SCSI name string reported as the first device identifier of an NVMe disk
/// under NVMe 1.0 translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmeV1NameRecord {
    pub pci_vendor_id: [u8; 4],
    pub model_number: [u8; 40],
    pub namespace_id: [u8; 4],
    pub serial_number: [u8; 20],
}

impl NvmeV1NameRecord {
    pub const LEN: usize = 68;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let raw = layout::bytes(raw, 0, Self::LEN)?;
        let mut record = NvmeV1NameRecord {
            pci_vendor_id: [0; 4],
            model_number: [0; 40],
            namespace_id: [0; 4],
            serial_number: [0; 20],
        };
        record.pci_vendor_id.copy_from_slice(&raw[0..4]);
        record.model_number.copy_from_slice(&raw[4..44]);
        record.namespace_id.copy_from_slice(&raw[44..48]);
        record.serial_number.copy_from_slice(&raw[48..68]);
        Ok(record)
    }

    /// The namespace id field, ASCII decimal rather than binary.
    pub fn namespace_id(&self) -> u32 {
        parse_ascii_decimal(&self.namespace_id)
    }
}

/// Reads a leading ASCII decimal number the way C `atoi` does: leading blanks are
/// skipped and parsing stops at the first non-digit. A field without leading digits
/// yields 0, which no namespace uses; nothing validates the content beyond that.
pub fn parse_ascii_decimal(field: &[u8]) -> u32 {
    field
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .fold(0u32, |acc, b| acc.wrapping_mul(10).wrapping_add(u32::from(b - b'0')))
}

/// How the namespace id is recovered from the device identifier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceIdDecoder {
    /// First identifier is an [`NvmeV1NameRecord`].
    NvmeV1NameRecord,
}

impl NamespaceIdDecoder {
    pub fn for_version(version: NvmeVersion) -> Result<Self> {
        if version < NvmeVersion::V1_0 {
            return Err(DiskError::UnsupportedNvmeVersion(version));
        }
        if version > NvmeVersion::V1_0 {
            // StorNVMe claims SNTL 1.5 on newer builds but still reports the 1.0 layout.
            debug!(%version, "decoding namespace id with the NVMe 1.0 name record, unverified for this version");
        }
        Ok(NamespaceIdDecoder::NvmeV1NameRecord)
    }

    pub fn namespace_id(&self, identifiers: &[StorageIdentifier]) -> Result<u32> {
        match self {
            NamespaceIdDecoder::NvmeV1NameRecord => {
                let first = identifiers
                    .first()
                    .ok_or_else(|| DiskError::MalformedResponse("device reports no identifiers".into()))?;
                Ok(NvmeV1NameRecord::parse(&first.data)?.namespace_id())
            }
        }
    }
}

/// Extracts the device name from the NVMe vendor specific blob.
///
/// The blob is a NUL-terminated, whitespace-free JSON object scanned by substring.
/// Escaped quotes inside the value are not understood.
pub fn device_name_from_vendor_data(vendor_specific: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(layout::until_nul(vendor_specific));
    let start = text.find(DEVICE_NAME_KEY).ok_or(DiskError::MalformedVendorData)? + DEVICE_NAME_KEY.len();
    let len = text[start..].find('"').ok_or(DiskError::MalformedVendorData)?;
    Ok(text[start..start + len].to_string())
}

/// Picks the first vendor id designator associated with the device and strips the
/// Google prefix from it.
pub fn device_name_from_scsi_identifiers(identifiers: &[StorageIdentifier]) -> Result<String> {
    let vendor_id = identifiers
        .iter()
        .find(|id| id.id_type == IdentifierType::VendorId && id.association == Association::Device)
        .ok_or(DiskError::NotAGoogleDisk)?;
    vendor_id
        .ascii()
        .strip_prefix(GOOGLE_SCSI_PREFIX)
        .map(str::to_string)
        .ok_or(DiskError::NotAGoogleDisk)
}

/// Name recovery strategy, selected by bus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identification {
    Nvme,
    Scsi,
}

impl Identification {
    pub fn for_bus(bus_type: BusType) -> Result<Self> {
        match bus_type {
            BusType::Nvme => Ok(Identification::Nvme),
            BusType::Scsi => Ok(Identification::Scsi),
            other => Err(DiskError::UnsupportedBusType(other)),
        }
    }

    pub fn device_name<S: StorageSurface>(&self, channel: &mut PropertyChannel<S>) -> Result<String> {
        match self {
            Identification::Nvme => {
                let version = NvmeIdentifier::new(channel).identify_controller()?.version();
                let decoder = NamespaceIdDecoder::for_version(version)?;
                let namespace_id = decoder.namespace_id(&channel.device_identifiers()?)?;
                debug!(namespace_id, "resolved NVMe namespace id");
                let namespace = NvmeIdentifier::new(channel).identify_namespace(namespace_id)?;
                device_name_from_vendor_data(namespace.vendor_specific())
            }
            Identification::Scsi => device_name_from_scsi_identifiers(&channel.device_identifiers()?),
        }
    }
}

/// Resolves the cloud-assigned name of one device. Owns the device for its whole
/// lifetime; dropping the resolver releases the handle.
pub struct DeviceNameResolver<S> {
    channel: PropertyChannel<S>,
}

impl DeviceNameResolver<DeviceHandle> {
    pub fn open(path: &str) -> Result<Self> {
        DeviceHandle::open(path).map(Self::new)
    }
}

impl<S: StorageSurface> DeviceNameResolver<S> {
    pub fn new(surface: S) -> Self {
        DeviceNameResolver { channel: PropertyChannel::new(surface) }
    }

    pub fn channel(&mut self) -> &mut PropertyChannel<S> {
        &mut self.channel
    }

    pub fn into_inner(self) -> S {
        self.channel.into_inner()
    }

    /// Device name, or [`DiskError::NotAGoogleDisk`] when the disk carries none.
    pub fn identify(&mut self) -> Result<String> {
        let bus_type = self.channel.bus_type()?;
        Identification::for_bus(bus_type)?.device_name(&mut self.channel)
    }

    /// Device name, or an empty string when the disk is not a Google persistent disk.
    pub fn get_device_name(&mut self) -> Result<String> {
        not_google_as_empty(self.identify())
    }

    pub fn nvme_device_name(&mut self) -> Result<String> {
        Identification::Nvme.device_name(&mut self.channel)
    }

    pub fn scsi_device_name(&mut self) -> Result<String> {
        not_google_as_empty(Identification::Scsi.device_name(&mut self.channel))
    }
}

fn not_google_as_empty(result: Result<String>) -> Result<String> {
    match result {
        Err(DiskError::NotAGoogleDisk) => {
            info!("device is not a Google persistent disk");
            Ok(String::new())
        }
        other => other,
    }
}
