//! Extra-field records.
//!
//! The extra field is a run of `(type: u16, size: u16, payload)` triples.
//! Every record is kept raw, keyed by type; the few this crate understands
//! are also decoded into typed values.

use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use super::structures::{MAX_16_BITS, MAX_32_BITS};
use crate::codec::AesStrength;
use crate::codec::crc32;
use crate::error::{ZipError, ZipResult};

pub const EXTRA_ZIP64: u16 = 0x0001;
pub const EXTRA_AES: u16 = 0x9901;
pub const EXTRA_UNICODE_PATH: u16 = 0x7075;
pub const EXTRA_UNICODE_COMMENT: u16 = 0x6375;

/// Splits a raw extra field into records.
///
/// A truncated trailing record is dropped; extra fields are optional, so
/// bad ones never fail the entry.
pub fn parse_extra_fields(raw: &[u8]) -> BTreeMap<u16, Vec<u8>> {
    let mut fields = BTreeMap::new();
    let mut rest = raw;
    while rest.len() >= 4 {
        let kind = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if size > rest.len() {
            warn!(
                "Extra field {:#06x} claims {} bytes but only {} remain",
                kind,
                size,
                rest.len()
            );
            return fields;
        }
        fields.insert(kind, rest[..size].to_vec());
        rest = &rest[size..];
    }
    fields
}

/// Serializes caller-supplied records.
pub fn serialize_extra_fields(fields: &BTreeMap<u16, Vec<u8>>) -> ZipResult<Vec<u8>> {
    let mut out = Vec::new();
    for (kind, data) in fields {
        if data.len() as u64 > MAX_16_BITS {
            return Err(ZipError::InvalidEntry(format!(
                "Extra field {:#06x} data exceeds 64KB",
                kind
            )));
        }
        out.write_u16::<LittleEndian>(*kind)?;
        out.write_u16::<LittleEndian>(data.len() as u16)?;
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// 64-bit sizes and offset for a record whose 32-bit fields hold the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub offset: Option<u64>,
}

impl Zip64Extra {
    /// Payload length the writer always uses: both sizes and the offset
    pub const FULL_SIZE: usize = 24;

    /// Pulls values from `payload` for each field equal to `0xFFFFFFFF`, in
    /// header order: uncompressed size, compressed size, offset.
    pub fn resolve(
        payload: &[u8],
        uncompressed_size: &mut u64,
        compressed_size: &mut u64,
        offset: Option<&mut u64>,
    ) -> ZipResult<Self> {
        let mut cursor = Cursor::new(payload);
        let mut next = |field: &mut u64| -> ZipResult<Option<u64>> {
            if *field != MAX_32_BITS {
                return Ok(None);
            }
            let value = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| ZipError::InvalidArchive("Zip64 extra field not found"))?;
            *field = value;
            Ok(Some(value))
        };
        let uncompressed = next(uncompressed_size)?;
        let compressed = next(compressed_size)?;
        let offset = match offset {
            Some(offset) => next(offset)?,
            None => None,
        };
        Ok(Self {
            uncompressed_size: uncompressed,
            compressed_size: compressed,
            offset,
        })
    }

    /// Complete record (header included) as the writer emits it.
    pub fn full_record(uncompressed_size: u64, compressed_size: u64, offset: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + Self::FULL_SIZE);
        out.extend_from_slice(&EXTRA_ZIP64.to_le_bytes());
        out.extend_from_slice(&(Self::FULL_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&uncompressed_size.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out
    }
}

/// WinZip AES record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtra {
    /// 1 for AE-1 (CRC kept), 2 for AE-2 (CRC zeroed)
    pub vendor_version: u16,
    /// Raw strength byte; 1, 2 or 3 in a well-formed archive
    pub strength: u8,
    /// Compression method of the plaintext
    pub method: u16,
}

impl AesExtra {
    pub const SIZE: usize = 7;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            warn!("AES extra field too short ({} bytes)", payload.len());
            return None;
        }
        let mut cursor = Cursor::new(payload);
        let vendor_version = cursor.read_u16::<LittleEndian>().ok()?;
        let _vendor_id = cursor.read_u16::<LittleEndian>().ok()?;
        let strength = cursor.read_u8().ok()?;
        let method = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self {
            vendor_version,
            strength,
            method,
        })
    }

    pub fn strength(&self) -> Option<AesStrength> {
        AesStrength::from_u8(self.strength)
    }

    /// Complete AE-2 record (header included).
    pub fn record(strength: AesStrength, method: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + Self::SIZE);
        out.extend_from_slice(&EXTRA_AES.to_le_bytes());
        out.extend_from_slice(&(Self::SIZE as u16).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(b"AE");
        out.push(strength as u8);
        out.extend_from_slice(&method.to_le_bytes());
        out
    }
}

/// Info-ZIP Unicode path or comment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodeExtra {
    pub version: u8,
    /// CRC-32 of the legacy-encoded bytes this record replaces
    pub crc32: u32,
    pub value: String,
}

impl UnicodeExtra {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 5 {
            warn!("Unicode extra field too short ({} bytes)", payload.len());
            return None;
        }
        let mut cursor = Cursor::new(payload);
        let version = cursor.read_u8().ok()?;
        let crc32 = cursor.read_u32::<LittleEndian>().ok()?;
        Some(Self {
            version,
            crc32,
            value: String::from_utf8_lossy(&payload[5..]).into_owned(),
        })
    }

    /// The record only applies if it was written for exactly these raw bytes.
    pub fn matches(&self, raw: &[u8]) -> bool {
        self.crc32 == crc32::checksum(raw)
    }
}
