//! Archive creation.
//!
//! Entries are appended to one [`WriteSink`]. An entry is written straight to
//! the sink when the sink is free; otherwise it is compressed into memory
//! and copied over once the sink frees up, so several entries can compress
//! at the same time. With `preserve_order`, each entry waits for the entries
//! added before it to be committed first.
//!
//! Local headers never carry sizes or a Zip64 record: every entry is
//! followed by a data descriptor, and the central directory holds the
//! authoritative sizes and offsets.
//!
//! When the source or codec of a direct write fails, the bytes it already
//! put in the sink stay there as an unreferenced gap and the next entry
//! starts after them. When the sink itself fails, its contents are unknown
//! and every later `add` or `close` fails with [`ZipError::SinkFailed`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::watch;

use crate::codec::{Codec, EncodeOptions, Encryption};
use crate::config::{Configuration, EntryOptions, EntrySettings, WriterOptions, resolve_entry};
use crate::error::{ZipError, ZipResult};
use crate::io::{MemoryReader, MemoryWriter, ReadAt, WriteSink};
use crate::stream::process_data;

use super::extra::{AesExtra, Zip64Extra, serialize_extra_fields};
use super::structures::*;

/// Zip64 is chosen up front when the source, grown by this factor for
/// incompressible data, could overflow a 32-bit field.
const SIZE_ESTIMATE_FACTOR: f64 = 1.05;

/// What [`ZipWriter::add`] reports about a committed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedEntry {
    pub name: String,
    /// Offset of the local header in the sink
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// 0 for AES entries
    pub crc32: u32,
    pub zip64: bool,
    pub encrypted: bool,
    pub directory: bool,
}

/// A sealed entry, waiting for the central directory
struct FileEntry {
    raw_filename: Vec<u8>,
    raw_comment: Vec<u8>,
    version: u16,
    flags: u16,
    method: u16,
    last_mod_time: u16,
    last_mod_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    external_attr: u32,
    offset: u64,
    zip64: bool,
    /// AES and caller-supplied records; the Zip64 record is added when the
    /// directory is written
    extra: Vec<u8>,
}

impl FileEntry {
    fn write_central<Out: std::io::Write>(&self, out: &mut Out) -> ZipResult<()> {
        let mut extra = Vec::new();
        let (compressed_size, uncompressed_size, lfh_offset) = if self.zip64 {
            extra.extend(Zip64Extra::full_record(
                self.uncompressed_size,
                self.compressed_size,
                self.offset,
            ));
            (MAX_32_BITS as u32, MAX_32_BITS as u32, MAX_32_BITS as u32)
        } else {
            (
                self.compressed_size as u32,
                self.uncompressed_size as u32,
                self.offset as u32,
            )
        };
        extra.extend_from_slice(&self.extra);
        let version = if self.zip64 {
            self.version.max(VERSION_ZIP64)
        } else {
            self.version
        };

        CentralDirectoryHeader {
            version_made_by: version,
            version_needed: version,
            flags: self.flags,
            method: self.method,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: self.crc32,
            compressed_size,
            uncompressed_size,
            name_len: self.raw_filename.len() as u16,
            extra_len: extra.len() as u16,
            comment_len: self.raw_comment.len() as u16,
            disk_start: 0,
            internal_attr: 0,
            external_attr: self.external_attr,
            lfh_offset,
        }
        .write(out)?;
        out.write_all(&self.raw_filename)?;
        out.write_all(&extra)?;
        out.write_all(&self.raw_comment)?;
        Ok(())
    }
}

/// Everything about an entry that is known before its data is written
struct EntryPlan {
    name: String,
    raw_comment: Vec<u8>,
    version: u16,
    flags: u16,
    method: u16,
    last_mod_time: u16,
    last_mod_date: u16,
    zip64: bool,
    directory: bool,
    level: Option<u32>,
    encryption: Encryption,
    extra: Vec<u8>,
}

impl EntryPlan {
    fn local_header(&self) -> ZipResult<Vec<u8>> {
        let mut out = Vec::with_capacity(LocalFileHeader::SIZE + self.name.len());
        LocalFileHeader {
            version_needed: self.version,
            flags: self.flags,
            method: self.method,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name_len: self.name.len() as u16,
            extra_len: 0,
        }
        .write(&mut out)?;
        out.extend_from_slice(self.name.as_bytes());
        Ok(out)
    }

    fn aes(&self) -> bool {
        matches!(self.encryption, Encryption::Aes { .. })
    }
}

/// Sizes and checksum of an entry whose bytes have all been written
struct WrittenEntry {
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    /// Header, data and descriptor
    length: u64,
}

/// Hands out tickets in `add` order and tracks which are finished.
///
/// The current turn is the lowest ticket not yet finished.
struct Sequencer {
    state: Mutex<SequencerState>,
    turn: watch::Sender<u64>,
}

#[derive(Default)]
struct SequencerState {
    next: u64,
    turn: u64,
    finished: BTreeSet<u64>,
}

impl Sequencer {
    fn new() -> Self {
        Self {
            state: Mutex::new(SequencerState::default()),
            turn: watch::Sender::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn issue(&self) -> u64 {
        let mut state = self.lock();
        let ticket = state.next;
        state.next += 1;
        ticket
    }

    fn is_turn(&self, ticket: u64) -> bool {
        *self.turn.borrow() == ticket
    }

    async fn wait_turn(&self, ticket: u64) -> ZipResult<()> {
        let mut receiver = self.turn.subscribe();
        receiver
            .wait_for(|turn| *turn >= ticket)
            .await
            .map(|_| ())
            .map_err(|_| ZipError::Worker("entry sequencer closed"))
    }

    fn finish(&self, ticket: u64) {
        let mut state = self.lock();
        state.finished.insert(ticket);
        while state.finished.first() == Some(&state.turn) {
            state.finished.pop_first();
            state.turn += 1;
        }
        self.turn.send_replace(state.turn);
    }
}

struct Bookkeeping {
    names: HashSet<String>,
    /// Sealed entries keyed by ticket, i.e. in `add` order
    files: BTreeMap<u64, FileEntry>,
}

struct SinkState<W> {
    sink: W,
    /// Running offset, covering every byte the sink accepted
    offset: u64,
    /// A write to `sink` failed part way
    failed: bool,
}

impl<W> SinkState<W> {
    fn check(&self) -> ZipResult<()> {
        if self.failed {
            return Err(ZipError::SinkFailed);
        }
        Ok(())
    }
}

/// Counts the bytes that reach the archive sink during one entry.
struct CountingSink<'a, W> {
    inner: &'a mut W,
    written: u64,
    failed: bool,
}

impl<'a, W> CountingSink<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            written: 0,
            failed: false,
        }
    }
}

#[async_trait]
impl<'a, W: WriteSink> WriteSink for CountingSink<'a, W> {
    async fn write_bytes(&mut self, data: &[u8]) -> anyhow::Result<()> {
        match self.inner.write_bytes(data).await {
            Ok(()) => {
                self.written += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

/// Releases the name and the ticket of an `add` that did not commit, and
/// finishes the ticket of one that did.
struct Reservation<'a> {
    sequencer: &'a Sequencer,
    bookkeeping: &'a Mutex<Bookkeeping>,
    name: String,
    ticket: u64,
    committed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("releasing failed entry {:?}", self.name);
            let mut books = self.bookkeeping.lock().unwrap_or_else(|e| e.into_inner());
            books.names.remove(&self.name);
        }
        self.sequencer.finish(self.ticket);
    }
}

/// Writes a ZIP archive into any [`WriteSink`].
///
/// `add` takes `&self`, so several entries may be added concurrently
/// (e.g. with `tokio::join!` or from tasks sharing an `Arc`).
/// [`close`](Self::close) writes the central directory and returns the sink.
pub struct ZipWriter<W: WriteSink> {
    sink: tokio::sync::Mutex<SinkState<W>>,
    /// Copy of the running offset readable without waiting for the sink
    committed: AtomicU64,
    bookkeeping: Mutex<Bookkeeping>,
    sequencer: Sequencer,
    options: WriterOptions,
    config: Configuration,
}

impl<W: WriteSink> ZipWriter<W> {
    /// Start an archive in `sink` with the default [`Configuration`].
    pub async fn new(sink: W, options: WriterOptions) -> ZipResult<Self> {
        Self::with_config(sink, options, Configuration::default()).await
    }

    /// Start an archive in `sink`.
    ///
    /// Bytes already in the sink are kept; the archive starts after them.
    ///
    /// # Arguments
    ///
    /// * `sink` - Destination of the archive bytes, initialised here
    /// * `options` - Defaults for every entry, overridable per `add`
    /// * `config` - Chunk size and the worker pool shared with other users
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::Resource`] if the sink fails to initialise.
    pub async fn with_config(mut sink: W, options: WriterOptions, config: Configuration) -> ZipResult<Self> {
        sink.init().await?;
        let offset = sink.size();
        Ok(Self {
            sink: tokio::sync::Mutex::new(SinkState {
                sink,
                offset,
                failed: false,
            }),
            committed: AtomicU64::new(offset),
            bookkeeping: Mutex::new(Bookkeeping {
                names: HashSet::new(),
                files: BTreeMap::new(),
            }),
            sequencer: Sequencer::new(),
            options,
            config,
        })
    }

    fn books(&self) -> MutexGuard<'_, Bookkeeping> {
        self.bookkeeping.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entries committed so far
    pub fn len(&self) -> usize {
        self.books().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a directory entry; a trailing `/` is appended to `name` if missing.
    pub async fn add_directory(&self, name: &str, options: EntryOptions) -> ZipResult<AddedEntry> {
        let options = EntryOptions {
            directory: true,
            ..options
        };
        self.add(name, &MemoryReader::default(), options).await
    }

    /// Add an entry named `name` holding the bytes of `reader`.
    ///
    /// Everything about the entry is validated before any byte reaches the
    /// sink. A failed `add` leaves the name free for a later call.
    ///
    /// # Returns
    ///
    /// Where the entry landed and its final sizes and checksum.
    ///
    /// # Errors
    ///
    /// * [`ZipError::InvalidEntry`] or [`ZipError::DuplicateEntry`] for a
    ///   rejected name, comment, date or option
    /// * [`ZipError::Resource`] when `reader` or the sink fails
    /// * [`ZipError::SinkFailed`] once an earlier write to the sink failed
    pub async fn add<R: ReadAt + ?Sized>(
        &self,
        name: &str,
        reader: &R,
        options: EntryOptions,
    ) -> ZipResult<AddedEntry> {
        let settings = resolve_entry(&self.config, &self.options, options)?;
        let name = normalize_name(name, settings.directory)?;
        let directory = settings.directory || name.ends_with('/');
        validate(&settings)?;

        let mut reservation = self.reserve(&name)?;

        let size = if directory {
            0
        } else {
            reader.init().await?;
            reader.size()
        };
        let offset = self.committed.load(Ordering::Acquire);
        let plan = plan_entry(name, directory, &settings, offset, size)?;

        let written = self
            .write(&plan, &settings, reservation.ticket, reader, size)
            .await?;
        reservation.committed = true;
        Ok(written)
    }

    fn reserve(&self, name: &str) -> ZipResult<Reservation<'_>> {
        let mut books = self.books();
        if books.names.contains(name) {
            return Err(ZipError::DuplicateEntry(name.to_string()));
        }
        books.names.insert(name.to_string());
        Ok(Reservation {
            sequencer: &self.sequencer,
            bookkeeping: &self.bookkeeping,
            name: name.to_string(),
            ticket: self.sequencer.issue(),
            committed: false,
        })
    }

    async fn write<R: ReadAt + ?Sized>(
        &self,
        plan: &EntryPlan,
        settings: &EntrySettings,
        ticket: u64,
        reader: &R,
        size: u64,
    ) -> ZipResult<AddedEntry> {
        let direct = !settings.buffered_write
            && (!settings.preserve_order || self.sequencer.is_turn(ticket));
        if direct {
            if let Ok(mut state) = self.sink.try_lock() {
                state.check()?;
                debug!("writing {:?} directly at {}", plan.name, state.offset);
                let offset = state.offset;
                let mut counting = CountingSink::new(&mut state.sink);
                let result = write_entry(plan, settings, &self.config, reader, size, &mut counting).await;
                let (emitted, failed) = (counting.written, counting.failed);
                state.offset += emitted;
                self.committed.store(state.offset, Ordering::Release);
                return match result {
                    Ok(written) => Ok(self.seal(plan, ticket, offset, written)),
                    Err(e) => {
                        if failed {
                            state.failed = true;
                        } else if emitted > 0 {
                            warn!(
                                "{:?} failed after {} bytes at {}; leaving them unreferenced",
                                plan.name, emitted, offset
                            );
                        }
                        Err(e)
                    }
                };
            }
        }

        let mut buffer = MemoryWriter::new();
        let written = write_entry(plan, settings, &self.config, reader, size, &mut buffer).await?;
        if settings.preserve_order {
            self.sequencer.wait_turn(ticket).await?;
        }
        let mut state = self.sink.lock().await;
        state.check()?;
        debug!(
            "copying buffered {:?} ({} bytes) at {}",
            plan.name,
            buffer.len(),
            state.offset
        );
        let offset = state.offset;
        if let Err(e) = state.sink.write_bytes(buffer.as_slice()).await {
            state.failed = true;
            return Err(e.into());
        }
        state.offset += written.length;
        self.committed.store(state.offset, Ordering::Release);
        Ok(self.seal(plan, ticket, offset, written))
    }

    fn seal(&self, plan: &EntryPlan, ticket: u64, offset: u64, written: WrittenEntry) -> AddedEntry {
        let zip64 = plan.zip64
            || offset >= MAX_32_BITS
            || written.compressed_size >= MAX_32_BITS
            || written.uncompressed_size >= MAX_32_BITS;
        let file = FileEntry {
            raw_filename: plan.name.as_bytes().to_vec(),
            raw_comment: plan.raw_comment.clone(),
            version: plan.version,
            flags: plan.flags,
            method: plan.method,
            last_mod_time: plan.last_mod_time,
            last_mod_date: plan.last_mod_date,
            crc32: written.crc32,
            compressed_size: written.compressed_size,
            uncompressed_size: written.uncompressed_size,
            external_attr: if plan.directory { MSDOS_DIRECTORY } else { 0 },
            offset,
            zip64,
            extra: plan.extra.clone(),
        };
        self.books().files.insert(ticket, file);
        AddedEntry {
            name: plan.name.clone(),
            offset,
            compressed_size: written.compressed_size,
            uncompressed_size: written.uncompressed_size,
            crc32: written.crc32,
            zip64,
            encrypted: plan.encryption.is_encrypted(),
            directory: plan.directory,
        }
    }

    /// Write the central directory and end records, then hand back the sink.
    ///
    /// Zip64 end records are added when forced or when the entry count,
    /// directory size or directory offset overflow the classic fields.
    pub async fn close(self, comment: Option<&str>) -> ZipResult<W> {
        let comment = comment.unwrap_or_default().as_bytes();
        if comment.len() as u64 > MAX_16_BITS {
            return Err(ZipError::InvalidEntry(
                "Archive comment exceeds 64KB".to_string(),
            ));
        }

        let books = self
            .bookkeeping
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        let state = self.sink.into_inner();
        state.check()?;
        let SinkState {
            mut sink, offset, ..
        } = state;

        let cd_offset = offset;
        let mut out = Vec::new();
        for file in books.files.values() {
            file.write_central(&mut out)?;
        }
        let cd_size = out.len() as u64;
        let count = books.files.len() as u64;

        let zip64 = self.options.zip64
            || cd_offset >= MAX_32_BITS
            || cd_size >= MAX_32_BITS
            || count >= MAX_16_BITS;
        if zip64 {
            debug!("writing zip64 end records for {} entries", count);
            Zip64EOCD {
                eocd64_size: 44,
                version_made_by: VERSION_ZIP64,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count,
                total_entries: count,
                cd_size,
                cd_offset,
            }
            .write(&mut out)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_offset + cd_size,
                total_disks: 1,
            }
            .write(&mut out)?;
        }

        let eocd = if zip64 {
            EndOfCentralDirectory {
                disk_entries: MAX_16_BITS as u16,
                total_entries: MAX_16_BITS as u16,
                cd_size: MAX_32_BITS as u32,
                cd_offset: MAX_32_BITS as u32,
                comment_len: comment.len() as u16,
                ..Default::default()
            }
        } else {
            EndOfCentralDirectory {
                disk_entries: count as u16,
                total_entries: count as u16,
                cd_size: cd_size as u32,
                cd_offset: cd_offset as u32,
                comment_len: comment.len() as u16,
                ..Default::default()
            }
        };
        eocd.write(&mut out)?;
        out.extend_from_slice(comment);

        sink.write_bytes(&out).await?;
        sink.flush().await?;
        debug!(
            "closed archive: {} entries, directory of {} bytes at {}",
            count, cd_size, cd_offset
        );
        Ok(sink)
    }
}

fn normalize_name(name: &str, directory: bool) -> ZipResult<String> {
    let mut name = name.trim().to_string();
    if name.is_empty() {
        return Err(ZipError::InvalidEntry("File name is empty".to_string()));
    }
    if directory && !name.ends_with('/') {
        name.push('/');
    }
    if name.len() as u64 > MAX_16_BITS {
        return Err(ZipError::InvalidEntry(format!(
            "File name exceeds 64KB ({} bytes)",
            name.len()
        )));
    }
    Ok(name)
}

fn validate(settings: &EntrySettings) -> ZipResult<()> {
    if settings.comment.len() as u64 > MAX_16_BITS {
        return Err(ZipError::InvalidEntry(
            "File comment exceeds 64KB".to_string(),
        ));
    }
    let (start, end) = msdos_range();
    if settings.last_modified < start || settings.last_modified > end {
        return Err(ZipError::InvalidEntry(format!(
            "The modification date {} is outside 1980-01-01..2107-12-31",
            settings.last_modified
        )));
    }
    Ok(())
}

fn plan_entry(
    name: String,
    directory: bool,
    settings: &EntrySettings,
    offset: u64,
    size: u64,
) -> ZipResult<EntryPlan> {
    let (last_mod_time, last_mod_date) = to_msdos(&settings.last_modified);

    let estimate = (size as f64 * SIZE_ESTIMATE_FACTOR) as u64;
    let zip64 = settings.zip64
        || offset >= MAX_32_BITS
        || estimate >= MAX_32_BITS
        || offset.saturating_add(estimate) >= MAX_32_BITS;

    let encryption = match &settings.password {
        Some(password) if !directory => {
            if settings.zip_crypto {
                Encryption::ZipCrypto {
                    password: password.clone(),
                    verification: (last_mod_time >> 8) as u8,
                }
            } else {
                Encryption::Aes {
                    password: password.clone(),
                    strength: settings.strength,
                }
            }
        }
        _ => Encryption::None,
    };
    let level = (!directory && settings.level > 0).then_some(settings.level);
    let data_method = if level.is_some() {
        METHOD_DEFLATE
    } else {
        METHOD_STORED
    };

    let mut extra = Vec::new();
    let mut version = settings.version.max(VERSION_DEFLATE);
    let method = if let Encryption::Aes { strength, .. } = &encryption {
        extra.extend(AesExtra::record(*strength, data_method));
        version = version.max(VERSION_AES);
        METHOD_AES
    } else {
        data_method
    };
    if zip64 {
        version = version.max(VERSION_ZIP64);
    }
    extra.extend(serialize_extra_fields(&settings.extra_fields)?);
    // leave room for the Zip64 record added to the central directory
    if (extra.len() + 4 + Zip64Extra::FULL_SIZE) as u64 > MAX_16_BITS {
        return Err(ZipError::InvalidEntry(
            "Extra fields exceed 64KB".to_string(),
        ));
    }

    let mut flags = FLAG_DATA_DESCRIPTOR | FLAG_LANGUAGE_ENCODING;
    if encryption.is_encrypted() {
        flags |= FLAG_ENCRYPTED;
    }

    Ok(EntryPlan {
        name,
        raw_comment: settings.comment.as_bytes().to_vec(),
        version,
        flags,
        method,
        last_mod_time,
        last_mod_date,
        zip64,
        directory,
        level,
        encryption,
        extra,
    })
}

/// Writes header, data and descriptor of one entry into `sink`.
async fn write_entry<R, S>(
    plan: &EntryPlan,
    settings: &EntrySettings,
    config: &Configuration,
    reader: &R,
    size: u64,
    sink: &mut S,
) -> ZipResult<WrittenEntry>
where
    R: ReadAt + ?Sized,
    S: WriteSink + ?Sized,
{
    let header = plan.local_header()?;
    sink.write_bytes(&header).await?;

    let (crc32, compressed_size) = if plan.directory {
        (0, 0)
    } else {
        let codec = Codec::encoder(EncodeOptions {
            level: plan.level,
            encryption: plan.encryption.clone(),
            // AE-2 leaves the CRC-32 at zero
            signed: !plan.aes(),
        })?;
        let handle = config.pool.start(codec, settings.use_workers).await?;
        let output = process_data(
            handle,
            reader,
            sink,
            0,
            size,
            settings.chunk_size,
            settings.progress.as_ref(),
        )
        .await?;
        (output.signature.unwrap_or(0), output.length)
    };

    let descriptor_zip64 =
        plan.zip64 || compressed_size >= MAX_32_BITS || size >= MAX_32_BITS;
    let mut descriptor = Vec::with_capacity(DataDescriptor::len(descriptor_zip64));
    DataDescriptor {
        crc32,
        compressed_size,
        uncompressed_size: size,
    }
    .write(&mut descriptor, descriptor_zip64)?;
    sink.write_bytes(&descriptor).await?;

    Ok(WrittenEntry {
        crc32,
        compressed_size,
        uncompressed_size: size,
        length: (header.len() + descriptor.len()) as u64 + compressed_size,
    })
}
