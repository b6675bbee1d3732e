//! High-level archive reading.
//!
//! [`ZipReader`] parses the central directory once and then streams any
//! entry through its codec into a [`WriteSink`], one chunk at a time.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::codec::{Codec, DecodeOptions, Encryption};
use crate::config::{Configuration, ExtractOptions, ReaderOptions, resolve_extract};
use crate::error::{ZipError, ZipResult};
use crate::io::{LocalFileWriter, MemoryWriter, ReadAt, WriteSink};
use crate::stream::process_data;

use super::entry::{CentralDirectory, ZipEntry};
use super::parser::ZipParser;
use super::structures::{CompressionMethod, METHOD_AES};

/// Reads entries out of a ZIP archive held by any [`ReadAt`] source.
pub struct ZipReader<R: ReadAt + ?Sized> {
    parser: ZipParser<R>,
    options: ReaderOptions,
    config: Configuration,
    directory: Option<CentralDirectory>,
}

impl<R: ReadAt + ?Sized> ZipReader<R> {
    pub fn new(reader: Arc<R>, options: ReaderOptions) -> Self {
        Self::with_config(reader, options, Configuration::default())
    }

    pub fn with_config(reader: Arc<R>, options: ReaderOptions, config: Configuration) -> Self {
        Self {
            parser: ZipParser::new(reader),
            options,
            config,
            directory: None,
        }
    }

    /// Parse the central directory, once; later calls return the cached copy.
    pub async fn read_directory(&mut self) -> ZipResult<&CentralDirectory> {
        if self.directory.is_none() {
            self.parser.reader().init().await?;
            let directory = self
                .parser
                .read_directory(self.options.filename_encoding, self.options.comment_encoding)
                .await?;
            self.directory = Some(directory);
        }
        match &self.directory {
            Some(directory) => Ok(directory),
            None => Err(ZipError::InvalidArchive("Central directory not read")),
        }
    }

    /// Entries in central directory order; empty until [`read_directory`](Self::read_directory).
    pub fn entries(&self) -> &[ZipEntry] {
        self.directory
            .as_ref()
            .map(|d| d.entries.as_slice())
            .unwrap_or_default()
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries().iter().find(|e| e.filename == name)
    }

    pub fn comment(&self) -> &str {
        self.directory
            .as_ref()
            .map(|d| d.comment.as_str())
            .unwrap_or_default()
    }

    pub fn prepended_bytes(&self) -> u64 {
        self.directory.as_ref().map_or(0, |d| d.prepended_bytes)
    }

    /// Stream the data of `entry` into `writer`.
    ///
    /// Returns the number of bytes written. Fails with
    /// [`ZipError::InvalidSignature`] if the data does not match its CRC-32
    /// or AES authentication code, and with [`ZipError::InvalidPassword`]
    /// before any bulk decryption when the password is wrong.
    pub async fn extract<W: WriteSink + ?Sized>(
        &self,
        entry: &ZipEntry,
        writer: &mut W,
        options: ExtractOptions,
    ) -> ZipResult<u64> {
        let settings = resolve_extract(&self.config, &self.options, options);
        let local = self.parser.read_local(entry).await?;

        if entry.aes.is_some() && entry.raw_compression_method != METHOD_AES {
            return Err(ZipError::UnsupportedArchive(format!(
                "AES entry {:?} uses compression method {}",
                entry.filename, entry.raw_compression_method
            )));
        }
        let compressed = match entry.compression_method {
            CompressionMethod::Stored => false,
            CompressionMethod::Deflate => true,
            method => {
                return Err(ZipError::UnsupportedArchive(format!(
                    "Compression method {} not supported",
                    method.as_u16()
                )));
            }
        };

        let encrypted = entry.encrypted && local.encrypted();
        let encryption = if !encrypted {
            Encryption::None
        } else {
            let password = settings.password.clone().ok_or(ZipError::PasswordRequired)?;
            match &entry.aes {
                Some(aes) => Encryption::Aes {
                    password,
                    strength: aes.strength().ok_or_else(|| {
                        ZipError::UnsupportedArchive(format!(
                            "AES strength {} not supported",
                            aes.strength
                        ))
                    })?,
                },
                None => Encryption::ZipCrypto {
                    password,
                    verification: entry.zip_crypto_verification(),
                },
            }
        };

        // AE-2 zeroes the CRC-32 and relies on the authentication code alone
        let ae2 = matches!(encryption, Encryption::Aes { .. })
            && entry.aes.is_some_and(|aes| aes.vendor_version != 1);
        let signature = (settings.check_signature && !ae2).then_some(entry.crc32);

        debug!(
            "extracting {:?}: {} bytes at {}, {:?}{}",
            entry.filename,
            entry.compressed_size,
            local.data_offset,
            encryption,
            if compressed { ", deflated" } else { "" }
        );

        writer.init().await?;
        let codec = Codec::decoder(DecodeOptions {
            compressed,
            encryption,
            signature,
        });
        let handle = self.config.pool.start(codec, settings.use_workers).await?;
        let output = process_data(
            handle,
            self.parser.reader().as_ref(),
            writer,
            local.data_offset,
            entry.compressed_size,
            settings.chunk_size,
            settings.progress.as_ref(),
        )
        .await?;
        writer.flush().await?;
        Ok(output.length)
    }

    /// Extract `entry` into memory.
    pub async fn extract_to_vec(&self, entry: &ZipEntry, options: ExtractOptions) -> ZipResult<Vec<u8>> {
        let mut writer = MemoryWriter::new();
        self.extract(entry, &mut writer, options).await?;
        Ok(writer.into_inner())
    }

    /// Extract `entry` to disk, creating parent directories as needed.
    pub async fn extract_to_file(
        &self,
        entry: &ZipEntry,
        output_path: &Path,
        options: ExtractOptions,
    ) -> ZipResult<u64> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut writer = LocalFileWriter::create(output_path).await?;
        self.extract(entry, &mut writer, options).await
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        self.parser.reader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    const HELLO: &[u8] = b"Hello, World!\n";

    fn stored_archive(name: &str, data: &[u8]) -> Vec<u8> {
        use crate::codec::crc32::checksum;
        use crate::zip::structures::*;

        let mut out = Vec::new();
        LocalFileHeader {
            version_needed: VERSION_DEFLATE,
            crc32: checksum(data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name_len: name.len() as u16,
            ..Default::default()
        }
        .write(&mut out)
        .unwrap();
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        let cd_offset = out.len();
        CentralDirectoryHeader {
            version_needed: VERSION_DEFLATE,
            crc32: checksum(data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name_len: name.len() as u16,
            ..Default::default()
        }
        .write(&mut out)
        .unwrap();
        out.extend_from_slice(name.as_bytes());
        let cd_size = out.len() - cd_offset;
        EndOfCentralDirectory {
            disk_entries: 1,
            total_entries: 1,
            cd_size: cd_size as u32,
            cd_offset: cd_offset as u32,
            ..Default::default()
        }
        .write(&mut out)
        .unwrap();
        out
    }

    #[tokio::test]
    async fn reads_stored_entry() {
        let archive = stored_archive("hello.txt", HELLO);
        let mut reader = ZipReader::new(Arc::new(MemoryReader::new(archive)), ReaderOptions::default());
        assert!(reader.entries().is_empty());
        reader.read_directory().await.unwrap();
        let entry = reader.entry("hello.txt").unwrap().clone();
        assert_eq!(
            reader.extract_to_vec(&entry, ExtractOptions::default()).await.unwrap(),
            HELLO
        );
    }

    #[tokio::test]
    async fn crc_mismatch_is_rejected_unless_disabled() {
        let mut archive = stored_archive("hello.txt", HELLO);
        // flip a data byte
        archive[30 + 9] ^= 0x20;
        let mut reader = ZipReader::new(Arc::new(MemoryReader::new(archive)), ReaderOptions::default());
        reader.read_directory().await.unwrap();
        let entry = reader.entries()[0].clone();

        let err = reader
            .extract_to_vec(&entry, ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ZipError::InvalidSignature));

        let data = reader
            .extract_to_vec(
                &entry,
                ExtractOptions {
                    check_signature: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(data, b"hello, World!\n");
    }

    #[tokio::test]
    async fn unknown_method_is_unsupported() {
        let mut archive = stored_archive("a", b"x");
        // method field of the central header (LFH 30 + name 1 + data 1, then offset 10)
        let cd = 32;
        archive[cd + 10] = 12;
        let mut reader = ZipReader::new(Arc::new(MemoryReader::new(archive)), ReaderOptions::default());
        reader.read_directory().await.unwrap();
        let entry = reader.entries()[0].clone();
        let err = reader
            .extract_to_vec(&entry, ExtractOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }
}
