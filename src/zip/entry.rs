use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use log::trace;

use super::extra::{
    AesExtra, EXTRA_AES, EXTRA_UNICODE_COMMENT, EXTRA_UNICODE_PATH, EXTRA_ZIP64, UnicodeExtra,
    Zip64Extra, parse_extra_fields,
};
use super::structures::*;
use crate::config::TextEncoding;
use crate::error::ZipResult;

/// One entry of the central directory.
///
/// Built once while the directory is parsed and never changed afterwards.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub filename: String,
    pub raw_filename: Vec<u8>,
    /// The name came from UTF-8 bytes or a matching Unicode path field
    pub filename_utf8: bool,
    pub comment: String,
    pub raw_comment: Vec<u8>,
    pub comment_utf8: bool,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// `None` when the stored MS-DOS date is not a real date
    pub last_modified: Option<NaiveDateTime>,
    /// Packed MS-DOS date (high 16 bits) and time (low 16 bits)
    pub raw_last_modified: u32,
    pub crc32: u32,
    pub directory: bool,
    pub encrypted: bool,
    pub flags: u16,
    /// Method of the plaintext, taken from the AES record for AES entries
    pub compression_method: CompressionMethod,
    /// Method as stored in the header (99 for AES)
    pub raw_compression_method: u16,
    pub enhanced_deflating: bool,
    pub version: u16,
    pub version_made_by: u16,
    /// Offset of the local header, already shifted by any prepended bytes
    pub offset: u64,
    pub extra_fields: BTreeMap<u16, Vec<u8>>,
    pub zip64: bool,
    pub aes: Option<AesExtra>,
    pub unicode_path: Option<UnicodeExtra>,
    pub unicode_comment: Option<UnicodeExtra>,
}

impl ZipEntry {
    pub(crate) fn from_central(
        header: &CentralDirectoryHeader,
        record: &[u8],
        prepended: u64,
        filename_encoding: TextEncoding,
        comment_encoding: TextEncoding,
    ) -> ZipResult<Self> {
        let name_end = CentralDirectoryHeader::SIZE + header.name_len as usize;
        let extra_end = name_end + header.extra_len as usize;
        let comment_end = extra_end + header.comment_len as usize;
        let raw_filename = record[CentralDirectoryHeader::SIZE..name_end].to_vec();
        let raw_extra = &record[name_end..extra_end];
        let raw_comment = record[extra_end..comment_end].to_vec();

        let utf8 = header.flags & FLAG_LANGUAGE_ENCODING != 0;
        let mut filename = if utf8 {
            TextEncoding::Utf8.decode(&raw_filename)
        } else {
            filename_encoding.decode(&raw_filename)
        };
        let mut comment = if utf8 {
            TextEncoding::Utf8.decode(&raw_comment)
        } else {
            comment_encoding.decode(&raw_comment)
        };

        let extra_fields = parse_extra_fields(raw_extra);

        let mut compressed_size = header.compressed_size as u64;
        let mut uncompressed_size = header.uncompressed_size as u64;
        let mut offset = header.lfh_offset as u64;
        let zip64 = match extra_fields.get(&EXTRA_ZIP64) {
            Some(payload) => {
                Zip64Extra::resolve(
                    payload,
                    &mut uncompressed_size,
                    &mut compressed_size,
                    Some(&mut offset),
                )?;
                true
            }
            None => false,
        };

        // Unicode fields only replace legacy-encoded text they were written for
        let mut filename_utf8 = utf8;
        let unicode_path = extra_fields
            .get(&EXTRA_UNICODE_PATH)
            .and_then(|p| UnicodeExtra::parse(p));
        if let Some(path) = &unicode_path {
            if !utf8 && path.matches(&raw_filename) {
                filename = path.value.clone();
                filename_utf8 = true;
            }
        }
        let mut comment_utf8 = utf8;
        let unicode_comment = extra_fields
            .get(&EXTRA_UNICODE_COMMENT)
            .and_then(|p| UnicodeExtra::parse(p));
        if let Some(unicode) = &unicode_comment {
            if !utf8 && unicode.matches(&raw_comment) {
                comment = unicode.value.clone();
                comment_utf8 = true;
            }
        }

        let aes = extra_fields.get(&EXTRA_AES).and_then(|p| AesExtra::parse(p));
        let compression_method = match &aes {
            Some(aes) => CompressionMethod::from_u16(aes.method),
            None => CompressionMethod::from_u16(header.method),
        };

        let directory = header.external_attr & MSDOS_DIRECTORY != 0 || filename.ends_with('/');

        let entry = Self {
            filename,
            raw_filename,
            filename_utf8,
            comment,
            raw_comment,
            comment_utf8,
            compressed_size,
            uncompressed_size,
            last_modified: parse_msdos(header.last_mod_time, header.last_mod_date),
            raw_last_modified: (header.last_mod_date as u32) << 16 | header.last_mod_time as u32,
            crc32: header.crc32,
            directory,
            encrypted: header.flags & FLAG_ENCRYPTED != 0,
            flags: header.flags,
            enhanced_deflating: compression_method == CompressionMethod::Deflate
                && header.flags & FLAG_ENHANCED_DEFLATING != 0,
            compression_method,
            raw_compression_method: header.method,
            version: header.version_needed,
            version_made_by: header.version_made_by,
            offset: offset + prepended,
            extra_fields,
            zip64,
            aes,
            unicode_path,
            unicode_comment,
        };
        trace!(
            "entry {:?}: {} -> {} bytes at {}",
            entry.filename, entry.compressed_size, entry.uncompressed_size, entry.offset
        );
        Ok(entry)
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Compression level hint from bits 1-2 of the flags (deflate only)
    pub fn level_hint(&self) -> u8 {
        ((self.flags & FLAG_LEVEL) >> 1) as u8
    }

    /// Check byte ZipCrypto stores at the end of its header.
    pub(crate) fn zip_crypto_verification(&self) -> u8 {
        if self.has_data_descriptor() {
            (self.raw_last_modified >> 8) as u8
        } else {
            (self.crc32 >> 24) as u8
        }
    }
}

/// Local header fields, read again right before extraction
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    pub header: LocalFileHeader,
    pub raw_filename: Vec<u8>,
    pub extra_fields: BTreeMap<u16, Vec<u8>>,
    /// Absolute offset of the entry data
    pub data_offset: u64,
}

impl LocalDirectory {
    pub fn encrypted(&self) -> bool {
        self.header.flags & FLAG_ENCRYPTED != 0
    }
}

/// Everything learned from the end records and the central directory
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    pub entries: Vec<ZipEntry>,
    pub comment: String,
    pub raw_comment: Vec<u8>,
    /// Bytes found in front of the archive proper, such as an SFX stub
    pub prepended_bytes: u64,
    pub zip64: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::crc32::checksum;

    fn record(header: &CentralDirectoryHeader, name: &[u8], extra: &[u8], comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        header.write(&mut out).unwrap();
        out.extend_from_slice(name);
        out.extend_from_slice(extra);
        out.extend_from_slice(comment);
        out
    }

    #[test]
    fn zip64_sizes_and_prepended_offset() {
        let extra = Zip64Extra::full_record(6_000_000_000, 5_000_000_000, 4_500_000_000);
        let header = CentralDirectoryHeader {
            compressed_size: 0xFFFF_FFFF,
            uncompressed_size: 0xFFFF_FFFF,
            lfh_offset: 0xFFFF_FFFF,
            name_len: 5,
            extra_len: extra.len() as u16,
            last_mod_time: 0x30e7,
            last_mod_date: 0x5d52,
            flags: FLAG_DATA_DESCRIPTOR,
            ..Default::default()
        };
        let raw = record(&header, b"a.bin", &extra, b"");
        let entry = ZipEntry::from_central(&header, &raw, 100, TextEncoding::Cp437, TextEncoding::Cp437)
            .unwrap();
        assert!(entry.zip64);
        assert_eq!(entry.uncompressed_size, 6_000_000_000);
        assert_eq!(entry.compressed_size, 5_000_000_000);
        assert_eq!(entry.offset, 4_500_000_100);
        assert_eq!(entry.raw_last_modified, 0x5d52_30e7);
        // time high byte, since sizes follow in a data descriptor
        assert_eq!(entry.zip_crypto_verification(), 0x30);
    }

    #[test]
    fn unicode_path_ignored_when_crc_is_stale() {
        let raw_name = b"stale\x82.txt";
        let mut payload = vec![1];
        payload.extend_from_slice(&checksum(b"something else").to_le_bytes());
        payload.extend_from_slice("ignored.txt".as_bytes());
        let mut extra = vec![0x75, 0x70];
        extra.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        extra.extend_from_slice(&payload);

        let header = CentralDirectoryHeader {
            name_len: raw_name.len() as u16,
            extra_len: extra.len() as u16,
            ..Default::default()
        };
        let raw = record(&header, raw_name, &extra, b"");
        let entry = ZipEntry::from_central(&header, &raw, 0, TextEncoding::Cp437, TextEncoding::Cp437)
            .unwrap();
        assert_eq!(entry.filename, "staleé.txt");
        assert!(!entry.filename_utf8);
        assert!(entry.unicode_path.is_some());
        assert_eq!(entry.last_modified, None);
    }

    #[test]
    fn directory_from_attributes_or_slash() {
        let header = CentralDirectoryHeader {
            name_len: 6,
            external_attr: MSDOS_DIRECTORY,
            ..Default::default()
        };
        let raw = record(&header, b"folder", &[], &[]);
        let entry = ZipEntry::from_central(&header, &raw, 0, TextEncoding::Cp437, TextEncoding::Cp437)
            .unwrap();
        assert!(entry.directory);

        let header = CentralDirectoryHeader {
            name_len: 4,
            ..Default::default()
        };
        let raw = record(&header, b"dir/", &[], &[]);
        let entry = ZipEntry::from_central(&header, &raw, 0, TextEncoding::Cp437, TextEncoding::Cp437)
            .unwrap();
        assert!(entry.directory);
    }
}
