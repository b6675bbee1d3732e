//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD through its locator
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Only the tail of the archive and the directory itself are fetched to
//! list its contents, which keeps HTTP Range sources cheap.
//!
//! ## Prepended data
//!
//! Self-extracting archives carry a stub in front of the ZIP data, so the
//! offsets stored in the archive are short by the stub length. When a
//! recorded offset does not point at the expected signature but the
//! position implied by the end record does, the difference is taken as the
//! number of prepended bytes and every later offset is shifted by it. This
//! is a heuristic: a directory that is corrupt rather than shifted can be
//! misread.

use std::sync::Arc;

use log::debug;

use crate::config::TextEncoding;
use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;

use super::entry::{CentralDirectory, LocalDirectory, ZipEntry};
use super::extra::parse_extra_fields;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the EOCD was found, with the comment that follows it
pub struct EocdLocation {
    pub eocd: EndOfCentralDirectory,
    pub offset: u64,
    pub comment: Vec<u8>,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type to support local files, memory
/// buffers and HTTP sources alike.
///
/// ## Usage
///
/// Typically used through [`ZipReader`](super::ZipReader)
/// rather than directly.
pub struct ZipParser<R: ReadAt + ?Sized> {
    /// The underlying data source
    reader: Arc<R>,
}

impl<R: ReadAt + ?Sized> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    fn size(&self) -> u64 {
        self.reader.size()
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The last 22 bytes are tried first. Failing that, the last
    /// 22 + 65535 bytes are scanned backwards and the rightmost signature
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::InvalidArchive`] if no EOCD signature is found,
    /// indicating the data is not a ZIP archive.
    pub async fn find_eocd(&self) -> ZipResult<EocdLocation> {
        let size = self.size();
        let record_size = EndOfCentralDirectory::SIZE as u64;
        if size < record_size {
            return Err(ZipError::InvalidArchive(
                "End of central directory not found",
            ));
        }

        for window in [record_size, (record_size + MAX_COMMENT_SIZE).min(size)] {
            let start = size - window;
            let buf = self.reader.read_range(start, window as usize).await?;
            let last = buf.len() - EndOfCentralDirectory::SIZE;
            for i in (0..=last).rev() {
                if u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
                    != EndOfCentralDirectory::SIGNATURE
                {
                    continue;
                }
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                let comment_start = i + EndOfCentralDirectory::SIZE;
                let comment_end = (comment_start + eocd.comment_len as usize).min(buf.len());
                return Ok(EocdLocation {
                    comment: buf[comment_start..comment_end].to_vec(),
                    offset: start + i as u64,
                    eocd,
                });
            }
        }

        Err(ZipError::InvalidArchive(
            "End of central directory not found",
        ))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD holds sentinel values. The locator sits
    /// right before the EOCD; if the record is not where the locator says
    /// but is right before the locator, the gap is returned as the number
    /// of prepended bytes.
    ///
    /// # Returns
    ///
    /// The parsed ZIP64 EOCD, its actual offset, and the prepended byte count.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> ZipResult<(Zip64EOCD, u64, u64)> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or(ZipError::InvalidArchive(
                "Zip64 end of central directory locator not found",
            ))?;
        let locator_buf = self
            .reader
            .read_range(locator_offset, Zip64EOCDLocator::SIZE)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut record_offset = locator.eocd64_offset;
        let mut record = self.read_if_present(record_offset, Zip64EOCD::MIN_SIZE).await?;
        let mut prepended = 0;
        if let Some(computed) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) {
            if !Zip64EOCD::has_signature(&record) && computed > record_offset {
                prepended = computed - record_offset;
                debug!(
                    "Zip64 end record found {} bytes past its recorded offset",
                    prepended
                );
                record_offset = computed;
                record = self.read_if_present(record_offset, Zip64EOCD::MIN_SIZE).await?;
            }
        }

        let eocd64 = Zip64EOCD::from_bytes(&record)?;
        Ok((eocd64, record_offset, prepended))
    }

    /// Reads `len` bytes at `offset`, or fewer if the source ends first.
    async fn read_if_present(&self, offset: u64, len: usize) -> ZipResult<Vec<u8>> {
        let available = self.size().saturating_sub(offset).min(len as u64) as usize;
        if available == 0 {
            return Ok(Vec::new());
        }
        Ok(self.reader.read_range(offset, available).await?)
    }

    /// Parse the end records and every central directory entry.
    ///
    /// # Arguments
    ///
    /// * `filename_encoding` - Decoding for names without the UTF-8 flag
    /// * `comment_encoding` - Decoding for comments without the UTF-8 flag
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::InvalidArchive`] if an end record or a directory
    /// header is missing or malformed.
    pub async fn read_directory(
        &self,
        filename_encoding: TextEncoding,
        comment_encoding: TextEncoding,
    ) -> ZipResult<CentralDirectory> {
        let size = self.size();
        let location = self.find_eocd().await?;
        let eocd = &location.eocd;

        let (mut cd_offset, cd_size, total_entries, cd_end, mut prepended, zip64) = if eocd.is_zip64()
        {
            let (eocd64, record_offset, prepended) = self.read_zip64_eocd(location.offset).await?;
            (
                eocd64.cd_offset + prepended,
                eocd64.cd_size,
                eocd64.total_entries,
                record_offset,
                prepended,
                true,
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                location.offset,
                0,
                false,
            )
        };

        if let Some(expected) = cd_end.checked_sub(cd_size) {
            let head = self.read_if_present(cd_offset, 4).await?;
            if !CentralDirectoryHeader::has_signature(&head) && cd_offset != expected {
                if expected > cd_offset {
                    let shift = expected - cd_offset;
                    debug!("Central directory found {} bytes past its recorded offset", shift);
                    prepended += shift;
                    cd_offset = expected;
                } else if total_entries > 0 {
                    return Err(ZipError::InvalidArchive("Central directory not found"));
                }
            }
        }
        if cd_offset.checked_add(cd_size).is_none_or(|end| end > size) {
            return Err(ZipError::InvalidArchive("Central directory out of bounds"));
        }

        let cd_data = self.reader.read_range(cd_offset, cd_size as usize).await?;
        let capacity = total_entries.min(cd_size / CentralDirectoryHeader::SIZE as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);
        let mut pos = 0usize;
        for _ in 0..total_entries {
            let rest = &cd_data[pos.min(cd_data.len())..];
            let header = CentralDirectoryHeader::from_bytes(rest)?;
            let record_len = header.record_len();
            if record_len > rest.len() {
                return Err(ZipError::InvalidArchive("Truncated central directory header"));
            }
            entries.push(ZipEntry::from_central(
                &header,
                &rest[..record_len],
                prepended,
                filename_encoding,
                comment_encoding,
            )?);
            pos += record_len;
        }

        debug!(
            "Read {} entries from central directory at {} ({} prepended bytes{})",
            entries.len(),
            cd_offset,
            prepended,
            if zip64 { ", zip64" } else { "" }
        );

        Ok(CentralDirectory {
            entries,
            comment: comment_encoding.decode(&location.comment),
            raw_comment: location.comment,
            prepended_bytes: prepended,
            zip64,
        })
    }

    /// Read the Local File Header of an entry.
    ///
    /// The name and extra field lengths may differ from the central
    /// directory, so the data offset is only known after this read.
    ///
    /// # Errors
    ///
    /// Returns an error if the LFH signature is missing.
    pub async fn read_local(&self, entry: &ZipEntry) -> ZipResult<LocalDirectory> {
        let lfh_buf = self
            .reader
            .read_range(entry.offset, LocalFileHeader::SIZE)
            .await?;
        let header = LocalFileHeader::from_bytes(&lfh_buf)?;

        let variable_len = header.name_len as usize + header.extra_len as usize;
        let variable = self
            .reader
            .read_range(entry.offset + LocalFileHeader::SIZE as u64, variable_len)
            .await?;
        let (raw_filename, raw_extra) = variable.split_at(header.name_len as usize);

        Ok(LocalDirectory {
            raw_filename: raw_filename.to_vec(),
            extra_fields: parse_extra_fields(raw_extra),
            data_offset: entry.offset + LocalFileHeader::SIZE as u64 + variable_len as u64,
            header,
        })
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
