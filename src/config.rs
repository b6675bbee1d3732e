//! Runtime configuration and per-archive / per-call options.
//!
//! Archive-level options are given once to [`ZipReader`](crate::ZipReader) or
//! [`ZipWriter`](crate::ZipWriter). Each call may override them; the
//! `resolve` functions merge the two once into an immutable settings value.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use codepage_437::{BorrowFromCp437, CP437_CONTROL};

use crate::codec::AesStrength;
use crate::error::{ZipError, ZipResult};
use crate::pool::WorkerPool;

pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;
pub const MIN_CHUNK_SIZE: usize = 64;
pub const DEFAULT_LEVEL: u32 = 5;

/// Called with `(bytes consumed so far, total bytes)`.
///
/// Returning an error does not stop the transfer; it is only logged.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) -> anyhow::Result<()> + Send + Sync>;

/// Settings shared by every reader and writer using it
#[derive(Clone)]
pub struct Configuration {
    /// Bytes read from the source per step
    pub chunk_size: usize,
    /// Run codecs on pool workers rather than on the calling task
    pub use_workers: bool,
    pub pool: Arc<WorkerPool>,
}

impl Configuration {
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            pool: Arc::new(WorkerPool::new(max_workers.max(2))),
            ..Self::default()
        }
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(MIN_CHUNK_SIZE)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            use_workers: true,
            pool: Arc::new(WorkerPool::default()),
        }
    }
}

/// How to turn raw name/comment bytes into text when the UTF-8 flag is clear.
#[derive(Clone, Copy, Default)]
pub enum TextEncoding {
    #[default]
    Cp437,
    Utf8,
    Custom(fn(&[u8]) -> String),
}

impl TextEncoding {
    pub fn decode(&self, raw: &[u8]) -> String {
        match self {
            TextEncoding::Cp437 => Cow::borrow_from_cp437(raw, &CP437_CONTROL).into_owned(),
            TextEncoding::Utf8 => String::from_utf8_lossy(raw).into_owned(),
            TextEncoding::Custom(decode) => decode(raw),
        }
    }
}

impl std::fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEncoding::Cp437 => write!(f, "Cp437"),
            TextEncoding::Utf8 => write!(f, "Utf8"),
            TextEncoding::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub password: Option<Vec<u8>>,
    /// Verify CRC-32 signatures while extracting
    pub check_signature: bool,
    pub filename_encoding: TextEncoding,
    pub comment_encoding: TextEncoding,
    /// Overrides [`Configuration::use_workers`]
    pub use_workers: Option<bool>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            password: None,
            check_signature: true,
            filename_encoding: TextEncoding::Cp437,
            comment_encoding: TextEncoding::Cp437,
            use_workers: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct ExtractOptions {
    pub password: Option<Vec<u8>>,
    pub check_signature: Option<bool>,
    pub use_workers: Option<bool>,
    pub progress: Option<ProgressCallback>,
}

/// Options for one extraction after merging.
#[derive(Clone)]
pub(crate) struct ExtractSettings {
    pub password: Option<Vec<u8>>,
    pub check_signature: bool,
    pub use_workers: bool,
    pub chunk_size: usize,
    pub progress: Option<ProgressCallback>,
}

pub(crate) fn resolve_extract(
    config: &Configuration,
    archive: &ReaderOptions,
    call: ExtractOptions,
) -> ExtractSettings {
    ExtractSettings {
        // An empty password counts as none
        password: call
            .password
            .or_else(|| archive.password.clone())
            .filter(|p| !p.is_empty()),
        check_signature: call.check_signature.unwrap_or(archive.check_signature),
        use_workers: call
            .use_workers
            .or(archive.use_workers)
            .unwrap_or(config.use_workers),
        chunk_size: config.effective_chunk_size(),
        progress: call.progress,
    }
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub password: Option<Vec<u8>>,
    /// Deflate level 0-9; 0 stores
    pub level: u32,
    /// AES strength 1-3
    pub encryption_strength: u8,
    /// Use traditional PKWARE encryption instead of AES
    pub zip_crypto: bool,
    /// Always write Zip64 records
    pub zip64: bool,
    /// Version needed to extract, raised as the entry's features require
    pub version: Option<u32>,
    /// Always compress entries into memory before copying them to the sink
    pub buffered_write: bool,
    /// Commit entries to the sink in the order `add` was called
    pub preserve_order: bool,
    pub use_workers: Option<bool>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            password: None,
            level: DEFAULT_LEVEL,
            encryption_strength: 3,
            zip_crypto: false,
            zip64: false,
            version: None,
            buffered_write: false,
            preserve_order: true,
            use_workers: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct EntryOptions {
    pub password: Option<Vec<u8>>,
    pub level: Option<u32>,
    pub encryption_strength: Option<u8>,
    pub zip_crypto: Option<bool>,
    pub zip64: Option<bool>,
    pub version: Option<u32>,
    pub buffered_write: Option<bool>,
    pub preserve_order: Option<bool>,
    pub use_workers: Option<bool>,
    pub comment: Option<String>,
    /// Defaults to the current local time
    pub last_modified: Option<NaiveDateTime>,
    /// Store as a directory; a trailing `/` is added to the name
    pub directory: bool,
    /// Extra-field records copied into the central directory
    pub extra_fields: BTreeMap<u16, Vec<u8>>,
    pub progress: Option<ProgressCallback>,
}

/// Options for one `add` after merging.
#[derive(Clone)]
pub(crate) struct EntrySettings {
    pub password: Option<Vec<u8>>,
    pub level: u32,
    pub strength: AesStrength,
    pub zip_crypto: bool,
    pub zip64: bool,
    pub version: u16,
    pub buffered_write: bool,
    pub preserve_order: bool,
    pub use_workers: bool,
    pub chunk_size: usize,
    pub comment: String,
    pub last_modified: NaiveDateTime,
    pub directory: bool,
    pub extra_fields: BTreeMap<u16, Vec<u8>>,
    pub progress: Option<ProgressCallback>,
}

pub(crate) fn resolve_entry(
    config: &Configuration,
    archive: &WriterOptions,
    call: EntryOptions,
) -> ZipResult<EntrySettings> {
    let password = call
        .password
        .or_else(|| archive.password.clone())
        .filter(|p| !p.is_empty());

    let strength_value = call
        .encryption_strength
        .unwrap_or(archive.encryption_strength);
    let strength = match AesStrength::from_u8(strength_value) {
        Some(strength) => strength,
        None if password.is_some() => {
            return Err(ZipError::InvalidEntry(format!(
                "The strength must equal 1, 2, or 3 (got {})",
                strength_value
            )));
        }
        None => AesStrength::Aes256,
    };

    let version = call.version.or(archive.version).unwrap_or(0);
    if version > u16::MAX as u32 {
        return Err(ZipError::InvalidEntry(format!(
            "Version {} exceeds 65535",
            version
        )));
    }

    Ok(EntrySettings {
        password,
        level: call.level.unwrap_or(archive.level).min(9),
        strength,
        zip_crypto: call.zip_crypto.unwrap_or(archive.zip_crypto),
        zip64: call.zip64.unwrap_or(archive.zip64),
        version: version as u16,
        buffered_write: call.buffered_write.unwrap_or(archive.buffered_write),
        preserve_order: call.preserve_order.unwrap_or(archive.preserve_order),
        use_workers: call
            .use_workers
            .or(archive.use_workers)
            .unwrap_or(config.use_workers),
        chunk_size: config.effective_chunk_size(),
        comment: call.comment.unwrap_or_default(),
        last_modified: call
            .last_modified
            .unwrap_or_else(|| Local::now().naive_local()),
        directory: call.directory,
        extra_fields: call.extra_fields,
        progress: call.progress,
    })
}
