//! In-memory stand-in for a disk behind `IOCTL_STORAGE_QUERY_PROPERTY`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;

use gce_disk_name::StorageSurface;

pub const BUS_SCSI: u32 = 1;
pub const BUS_USB: u32 = 7;
pub const BUS_NVME: u32 = 17;

pub const ID_TYPE_VENDOR_SPECIFIC: u32 = 0;
pub const ID_TYPE_VENDOR_ID: u32 = 1;
pub const ID_TYPE_SCSI_NAME_STRING: u32 = 8;
pub const ASSOC_DEVICE: u32 = 0;
pub const ASSOC_PORT: u32 = 1;

const ERROR_INVALID_FUNCTION: i32 = 1;
const ERROR_INVALID_PARAMETER: i32 = 87;

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// `STORAGE_DEVICE_DESCRIPTOR` with vendor and product strings appended.
pub fn device_descriptor(bus_type: u32, vendor: &str, product: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    put_u32(&mut buf, 28, bus_type);
    for (field, text) in [(12, vendor), (16, product)] {
        let offset = buf.len() as u32;
        buf.extend_from_slice(text.as_bytes());
        buf.push(0);
        put_u32(&mut buf, field, offset);
    }
    let size = buf.len() as u32;
    put_u32(&mut buf, 0, 40);
    put_u32(&mut buf, 4, size);
    buf
}

/// `STORAGE_DEVICE_ID_DESCRIPTOR` holding `(type, association, bytes)` records.
pub fn id_descriptor(records: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    put_u32(&mut buf, 8, records.len() as u32);
    for (i, (id_type, association, data)) in records.iter().enumerate() {
        let record_len = (16 + data.len() + 3) & !3;
        let mut record = vec![0u8; record_len];
        put_u32(&mut record, 0, 2);
        put_u32(&mut record, 4, *id_type);
        record[8..10].copy_from_slice(&(data.len() as u16).to_le_bytes());
        let next = if i + 1 < records.len() { record_len as u16 } else { 0 };
        record[10..12].copy_from_slice(&next.to_le_bytes());
        put_u32(&mut record, 12, *association);
        record[16..16 + data.len()].copy_from_slice(data);
        buf.extend_from_slice(&record);
    }
    let size = buf.len() as u32;
    put_u32(&mut buf, 0, 12);
    put_u32(&mut buf, 4, size);
    buf
}

/// `STORAGE_PROTOCOL_DATA_DESCRIPTOR` followed by `payload` at protocol offset 40.
pub fn protocol_envelope(request: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 48];
    put_u32(&mut buf, 0, 48);
    put_u32(&mut buf, 4, 48);
    buf[8..48].copy_from_slice(&request[8..48]);
    put_u32(&mut buf, 8 + 16, 40);
    put_u32(&mut buf, 8 + 20, payload.len() as u32);
    buf.extend_from_slice(payload);
    buf
}

pub fn controller_data(version: u32) -> Vec<u8> {
    let mut data = vec![0u8; 4096];
    data[0..2].copy_from_slice(&0x1AE0u16.to_le_bytes());
    data[4..24].copy_from_slice(format!("{:<20}", "nvme_card").as_bytes());
    data[24..64].copy_from_slice(format!("{:<40}", "nvme_card-pd").as_bytes());
    put_u32(&mut data, 80, version);
    data
}

pub fn namespace_data(vendor_specific: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; 4096];
    data[0..8].copy_from_slice(&20_971_520u64.to_le_bytes());
    data[384..384 + vendor_specific.len()].copy_from_slice(vendor_specific);
    data
}

/// The 68-byte NVMe 1.0 SCSI name string with an ASCII namespace id field.
pub fn nvme_name_record(namespace_id: &[u8; 4]) -> Vec<u8> {
    let mut record = Vec::with_capacity(68);
    record.extend_from_slice(b"1AE0");
    record.extend_from_slice(format!("{:<40}", "nvme_card-pd").as_bytes());
    record.extend_from_slice(namespace_id);
    record.extend_from_slice(format!("{:<20}", "nvme_card-pd").as_bytes());
    record
}

#[derive(Debug, Default)]
pub struct FakeDisk {
    pub device_descriptor: Vec<u8>,
    pub device_ids: Vec<u8>,
    pub controller: Option<Vec<u8>>,
    pub namespaces: HashMap<u32, Vec<u8>>,
    /// Property id that fails, and the OS code it fails with.
    pub failing_property: Option<(u32, i32)>,
    /// `(property id, buffer length)` per round trip.
    pub round_trips: Vec<(u32, usize)>,
}

impl FakeDisk {
    pub fn with_bus(bus_type: u32) -> Self {
        FakeDisk {
            device_descriptor: device_descriptor(bus_type, "Google", "PersistentDisk"),
            device_ids: id_descriptor(&[]),
            ..Default::default()
        }
    }

    pub fn scsi(records: &[(u32, u32, &[u8])]) -> Self {
        FakeDisk { device_ids: id_descriptor(records), ..Self::with_bus(BUS_SCSI) }
    }

    pub fn nvme(version: u32, namespace_id: &[u8; 4], vendor_specific: &[u8]) -> Self {
        let record = nvme_name_record(namespace_id);
        let mut namespaces = HashMap::new();
        let nsid = std::str::from_utf8(namespace_id).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
        namespaces.insert(nsid, namespace_data(vendor_specific));
        FakeDisk {
            device_ids: id_descriptor(&[(ID_TYPE_SCSI_NAME_STRING, ASSOC_DEVICE, record.as_slice())]),
            controller: Some(controller_data(version)),
            namespaces,
            ..Self::with_bus(BUS_NVME)
        }
    }

    pub fn trips_for(&self, property: u32) -> Vec<usize> {
        self.round_trips.iter().filter(|(p, _)| *p == property).map(|(_, len)| *len).collect()
    }

    fn respond(&self, request: &[u8]) -> io::Result<Vec<u8>> {
        let property = get_u32(request, 0);
        match property {
            0 => Ok(self.device_descriptor.clone()),
            2 => Ok(self.device_ids.clone()),
            49 | 50 => {
                let cns = get_u32(request, 8 + 8);
                let sub_value = get_u32(request, 8 + 12);
                let payload = match (property, cns) {
                    (49, 1) => self.controller.as_ref(),
                    (50, 0) => self.namespaces.get(&sub_value),
                    _ => None,
                };
                payload
                    .map(|payload| protocol_envelope(request, payload))
                    .ok_or_else(|| io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER))
            }
            _ => Err(io::Error::from_raw_os_error(ERROR_INVALID_FUNCTION)),
        }
    }
}

impl StorageSurface for FakeDisk {
    fn query_property(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let property = get_u32(buffer, 0);
        self.round_trips.push((property, buffer.len()));
        if let Some((failing, code)) = self.failing_property {
            if failing == property {
                return Err(io::Error::from_raw_os_error(code));
            }
        }

        let response = self.respond(buffer)?;
        let n = buffer.len().min(response.len());
        buffer[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }
}
