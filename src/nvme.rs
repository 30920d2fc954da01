//! NVMe Identify over the storage protocol-specific property.
//!
//! The request travels as a `STORAGE_PROTOCOL_SPECIFIC_DATA` block in the query's
//! additional parameters. The driver answers with a `STORAGE_PROTOCOL_DATA_DESCRIPTOR`
//! whose `ProtocolDataOffset` says where the identify payload starts, counted from the
//! start of the protocol-specific section. That offset is read from the response and
//! never assumed.

use std::fmt;

use num_enum::IntoPrimitive;
use tracing::debug;

use crate::error::{DiskError, Result};
use crate::layout::{self, *};
use crate::query::{PropertyChannel, PropertyId, StorageSurface};

pub const PROTOCOL_TYPE_NVME: u32 = 3;
pub const NVME_DATA_TYPE_IDENTIFY: u32 = 1;
pub const NVME_MAX_LOG_SIZE: usize = 0x1000;
/// Size of every Identify structure; `NVME_MAX_LOG_SIZE` is the transfer length asked for.
pub const NVME_IDENTIFY_DATA_LEN: usize = 4096;

// NVME_IDENTIFY_CONTROLLER_DATA
const CTRL_VID: usize = 0;
const CTRL_SSVID: usize = 2;
const CTRL_SN: usize = 4;
const CTRL_MN: usize = 24;
const CTRL_FR: usize = 64;
const CTRL_VER: usize = 80;

// NVME_IDENTIFY_NAMESPACE_DATA
const NS_NSZE: usize = 0;
const NS_NCAP: usize = 8;
const NS_NUSE: usize = 16;
const NS_VS: usize = 384;

/// Identify CNS codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u32)]
pub enum Cns {
    SpecificNamespace = 0,
    Controller = 1,
}

/// Parameters of one Identify command, encoded as `STORAGE_PROTOCOL_SPECIFIC_DATA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmeIdentifyRequest {
    pub cns: Cns,
    pub sub_value: u32,
}

impl NvmeIdentifyRequest {
    pub fn controller() -> Self {
        NvmeIdentifyRequest { cns: Cns::Controller, sub_value: 0 }
    }

    pub fn namespace(namespace_id: u32) -> Self {
        NvmeIdentifyRequest { cns: Cns::SpecificNamespace, sub_value: namespace_id }
    }

    /// Controller data is an adapter property, namespace data a device property.
    pub fn property(&self) -> PropertyId {
        match self.cns {
            Cns::Controller => PropertyId::StorageAdapterProtocolSpecificProperty,
            Cns::SpecificNamespace => PropertyId::StorageDeviceProtocolSpecificProperty,
        }
    }

    pub fn encode(&self) -> [u8; PROTOCOL_SPECIFIC_DATA_LEN] {
        let fields = [
            (PROTOCOL_TYPE, PROTOCOL_TYPE_NVME),
            (PROTOCOL_DATA_TYPE, NVME_DATA_TYPE_IDENTIFY),
            (PROTOCOL_REQUEST_VALUE, u32::from(self.cns)),
            (PROTOCOL_REQUEST_SUB_VALUE, self.sub_value),
            (PROTOCOL_DATA_OFFSET, PROTOCOL_SPECIFIC_DATA_LEN as u32),
            (PROTOCOL_DATA_LENGTH, NVME_MAX_LOG_SIZE as u32),
        ];
        let mut block = [0u8; PROTOCOL_SPECIFIC_DATA_LEN];
        for (offset, value) in fields {
            block[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        block
    }
}

/// The controller's `VER` field: major in bits 31:16, minor 15:8, tertiary 7:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NvmeVersion(pub u32);

impl NvmeVersion {
    pub const V1_0: NvmeVersion = NvmeVersion(0x0001_0000);

    pub fn major(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn minor(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn tertiary(&self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for NvmeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())?;
        if self.tertiary() != 0 {
            write!(f, ".{}", self.tertiary())?;
        }
        Ok(())
    }
}

fn ascii_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(layout::until_nul(raw)).trim().to_string()
}

/// Identify Controller data structure.
#[derive(Clone)]
pub struct ControllerIdentifyData {
    raw: Box<[u8]>,
}

impl ControllerIdentifyData {
    pub fn from_bytes(raw: Box<[u8]>) -> Result<Self> {
        check_identify_len(&raw)?;
        Ok(ControllerIdentifyData { raw })
    }

    pub fn pci_vendor_id(&self) -> u16 {
        u16::from_le_bytes([self.raw[CTRL_VID], self.raw[CTRL_VID + 1]])
    }

    pub fn subsystem_vendor_id(&self) -> u16 {
        u16::from_le_bytes([self.raw[CTRL_SSVID], self.raw[CTRL_SSVID + 1]])
    }

    pub fn serial_number(&self) -> String {
        ascii_field(&self.raw[CTRL_SN..CTRL_SN + 20])
    }

    pub fn model_number(&self) -> String {
        ascii_field(&self.raw[CTRL_MN..CTRL_MN + 40])
    }

    pub fn firmware_revision(&self) -> String {
        ascii_field(&self.raw[CTRL_FR..CTRL_FR + 8])
    }

    pub fn version(&self) -> NvmeVersion {
        let mut ver = [0u8; 4];
        ver.copy_from_slice(&self.raw[CTRL_VER..CTRL_VER + 4]);
        NvmeVersion(u32::from_le_bytes(ver))
    }
}

impl fmt::Debug for ControllerIdentifyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerIdentifyData")
            .field("vid", &format_args!("{:#06x}", self.pci_vendor_id()))
            .field("model", &self.model_number())
            .field("serial", &self.serial_number())
            .field("version", &self.version())
            .finish()
    }
}

/// Identify Namespace data structure.
#[derive(Clone)]
pub struct NamespaceIdentifyData {
    raw: Box<[u8]>,
}

impl NamespaceIdentifyData {
    pub fn from_bytes(raw: Box<[u8]>) -> Result<Self> {
        check_identify_len(&raw)?;
        Ok(NamespaceIdentifyData { raw })
    }

    pub fn size_blocks(&self) -> u64 {
        self.u64_at(NS_NSZE)
    }

    pub fn capacity_blocks(&self) -> u64 {
        self.u64_at(NS_NCAP)
    }

    pub fn utilization_blocks(&self) -> u64 {
        self.u64_at(NS_NUSE)
    }

    /// The vendor specific region, bytes 384 to the end of the structure.
    pub fn vendor_specific(&self) -> &[u8] {
        &self.raw[NS_VS..]
    }

    fn u64_at(&self, offset: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.raw[offset..offset + 8]);
        u64::from_le_bytes(raw)
    }
}

impl fmt::Debug for NamespaceIdentifyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceIdentifyData")
            .field("nsze", &self.size_blocks())
            .field("ncap", &self.capacity_blocks())
            .field("nuse", &self.utilization_blocks())
            .finish_non_exhaustive()
    }
}

fn check_identify_len(raw: &[u8]) -> Result<()> {
    if raw.len() != NVME_IDENTIFY_DATA_LEN {
        return Err(DiskError::MalformedResponse(format!(
            "identify data is {} bytes, expected {}",
            raw.len(),
            NVME_IDENTIFY_DATA_LEN
        )));
    }
    Ok(())
}

/// Issues NVMe Identify commands through a property channel.
pub struct NvmeIdentifier<'a, S> {
    channel: &'a mut PropertyChannel<S>,
}

impl<'a, S: StorageSurface> NvmeIdentifier<'a, S> {
    pub fn new(channel: &'a mut PropertyChannel<S>) -> Self {
        NvmeIdentifier { channel }
    }

    pub fn identify_controller(&mut self) -> Result<ControllerIdentifyData> {
        let data = ControllerIdentifyData::from_bytes(self.identify(NvmeIdentifyRequest::controller())?)?;
        debug!(controller = ?data, "identify controller");
        Ok(data)
    }

    pub fn identify_namespace(&mut self, namespace_id: u32) -> Result<NamespaceIdentifyData> {
        let data = NamespaceIdentifyData::from_bytes(self.identify(NvmeIdentifyRequest::namespace(namespace_id))?)?;
        debug!(namespace_id, namespace = ?data, "identify namespace");
        Ok(data)
    }

    fn identify(&mut self, request: NvmeIdentifyRequest) -> Result<Box<[u8]>> {
        let params = request.encode();
        let hint = QUERY_ADDITIONAL_PARAMETERS + PROTOCOL_SPECIFIC_DATA_LEN + NVME_MAX_LOG_SIZE;
        let buffer = self.channel.query(request.property(), Some(&params), Some(hint))?;
        extract_payload(&buffer)
    }
}

/// Copies the identify payload out of a `STORAGE_PROTOCOL_DATA_DESCRIPTOR` response.
pub fn extract_payload(buffer: &[u8]) -> Result<Box<[u8]>> {
    let version = read_u32(buffer, HEADER_VERSION)? as usize;
    let size = read_u32(buffer, HEADER_SIZE)? as usize;
    if version != PROTOCOL_DATA_DESCRIPTOR_LEN || size != PROTOCOL_DATA_DESCRIPTOR_LEN {
        return Err(DiskError::MalformedResponse(format!(
            "protocol data descriptor reports version {} size {}, expected {}",
            version, size, PROTOCOL_DATA_DESCRIPTOR_LEN
        )));
    }

    let section = PROTOCOL_DESCRIPTOR_SPECIFIC_DATA;
    let data_offset = read_u32(buffer, section + PROTOCOL_DATA_OFFSET)? as usize;
    let data_length = read_u32(buffer, section + PROTOCOL_DATA_LENGTH)? as usize;
    if data_length < NVME_IDENTIFY_DATA_LEN {
        return Err(DiskError::MalformedResponse(format!(
            "identify payload is {} bytes, expected {}",
            data_length, NVME_IDENTIFY_DATA_LEN
        )));
    }

    let start = section.saturating_add(data_offset);
    let end = start.saturating_add(NVME_IDENTIFY_DATA_LEN);
    if end > buffer.len() {
        return Err(DiskError::MalformedResponse(format!(
            "identify payload ends at byte {}, driver returned {}",
            end,
            buffer.len()
        )));
    }

    let payload = layout::bytes(buffer, start, NVME_IDENTIFY_DATA_LEN)?;
    Ok(payload.to_vec().into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(data_offset: u32, fill: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 8 + 40 + NVME_MAX_LOG_SIZE + 16];
        buf[0..4].copy_from_slice(&48u32.to_le_bytes());
        buf[4..8].copy_from_slice(&48u32.to_le_bytes());
        buf[8 + 16..8 + 20].copy_from_slice(&data_offset.to_le_bytes());
        buf[8 + 20..8 + 24].copy_from_slice(&(NVME_MAX_LOG_SIZE as u32).to_le_bytes());
        let start = 8 + data_offset as usize;
        buf[start..start + NVME_IDENTIFY_DATA_LEN].fill(fill);
        buf
    }

    #[test]
    fn encodes_namespace_request() {
        let block = NvmeIdentifyRequest::namespace(3).encode();
        assert_eq!(read_u32(&block, PROTOCOL_TYPE).unwrap(), 3);
        assert_eq!(read_u32(&block, PROTOCOL_DATA_TYPE).unwrap(), 1);
        assert_eq!(read_u32(&block, PROTOCOL_REQUEST_VALUE).unwrap(), 0);
        assert_eq!(read_u32(&block, PROTOCOL_REQUEST_SUB_VALUE).unwrap(), 3);
        assert_eq!(read_u32(&block, PROTOCOL_DATA_OFFSET).unwrap(), 40);
        assert_eq!(read_u32(&block, PROTOCOL_DATA_LENGTH).unwrap(), 4096);
    }

    #[test]
    fn controller_request_targets_adapter() {
        let request = NvmeIdentifyRequest::controller();
        assert_eq!(request.property(), PropertyId::StorageAdapterProtocolSpecificProperty);
        assert_eq!(read_u32(&request.encode(), PROTOCOL_REQUEST_VALUE).unwrap(), 1);
    }

    #[test]
    fn payload_offset_is_driver_reported() {
        let payload = extract_payload(&envelope(56, 0xAB)).unwrap();
        assert_eq!(payload.len(), NVME_IDENTIFY_DATA_LEN);
        assert!(payload.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn payload_past_buffer_is_malformed() {
        let mut buf = envelope(40, 0);
        buf[8 + 16..8 + 20].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(extract_payload(&buf), Err(DiskError::MalformedResponse(_))));
    }

    #[test]
    fn descriptor_without_payload_is_malformed() {
        let mut buf = envelope(40, 0xAB);
        buf.truncate(PROTOCOL_DATA_DESCRIPTOR_LEN);
        let err = extract_payload(&buf).unwrap_err();
        assert!(matches!(err, DiskError::MalformedResponse(ref msg) if msg.contains("driver returned 48")));
    }

    #[test]
    fn bad_descriptor_header_is_malformed() {
        let mut buf = envelope(40, 0);
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        assert!(extract_payload(&buf).is_err());
    }

    #[test]
    fn version_fields() {
        let v = NvmeVersion(0x0001_0300);
        assert_eq!((v.major(), v.minor(), v.tertiary()), (1, 3, 0));
        assert_eq!(v.to_string(), "1.3");
        assert_eq!(NvmeVersion(0x0001_0401).to_string(), "1.4.1");
        assert!(NvmeVersion(0) < NvmeVersion::V1_0);
    }

    #[test]
    fn controller_fields() {
        let mut raw = vec![0u8; NVME_IDENTIFY_DATA_LEN];
        raw[0..2].copy_from_slice(&0x1AE0u16.to_le_bytes());
        raw[CTRL_MN..CTRL_MN + 40].copy_from_slice(format!("{:<40}", "nvme_card-pd").as_bytes());
        raw[CTRL_VER..CTRL_VER + 4].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        let data = ControllerIdentifyData::from_bytes(raw.into_boxed_slice()).unwrap();
        assert_eq!(data.pci_vendor_id(), 0x1AE0);
        assert_eq!(data.model_number(), "nvme_card-pd");
        assert_eq!(data.version(), NvmeVersion::V1_0);
    }
}
