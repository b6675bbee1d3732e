//! # zipstream
//!
//! Streaming ZIP reader and writer.
//!
//! Archives are read from any random-access byte source ([`ReadAt`]): memory,
//! local files, or HTTP servers through Range requests, so listing or
//! extracting one entry of a large remote archive only downloads the parts
//! that are needed. Archives are written to any append-only [`WriteSink`].
//!
//! Entry data always moves in bounded chunks through a codec (deflate,
//! ZipCrypto or WinZip AES, CRC-32) that runs on a bounded pool of workers.
//!
//! ## Features
//!
//! - STORED and DEFLATE entries
//! - ZipCrypto and AES-128/192/256 (AE-1 and AE-2) encryption
//! - Zip64 archives, entries and offsets
//! - CP437, UTF-8 or custom name decoding, Info-ZIP Unicode extra fields
//! - Archives behind a self-extracting stub
//! - Concurrent `add` with optional insertion-order preservation
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipstream::{
//!     EntryOptions, ExtractOptions, MemoryReader, MemoryWriter, ReaderOptions, WriterOptions,
//!     ZipReader, ZipWriter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let writer = ZipWriter::new(MemoryWriter::new(), WriterOptions::default()).await?;
//!     let data = MemoryReader::new(b"Hello, World!\n".to_vec());
//!     writer.add("hello.txt", &data, EntryOptions::default()).await?;
//!     let archive = writer.close(Some("greetings")).await?.into_inner();
//!
//!     let mut reader = ZipReader::new(Arc::new(MemoryReader::new(archive)), ReaderOptions::default());
//!     reader.read_directory().await?;
//!     for entry in reader.entries() {
//!         let bytes = reader.extract_to_vec(entry, ExtractOptions::default()).await?;
//!         println!("{}: {} bytes", entry.filename, bytes.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod pool;
pub mod stream;
pub mod zip;

pub use cli::Cli;
pub use codec::AesStrength;
pub use config::{
    Configuration, EntryOptions, ExtractOptions, ProgressCallback, ReaderOptions, TextEncoding,
    WriterOptions,
};
pub use error::{ErrorKind, ZipError, ZipResult};
pub use io::{HttpRangeReader, LocalFileReader, LocalFileWriter, MemoryReader, MemoryWriter, ReadAt, WriteSink};
pub use pool::WorkerPool;
pub use zip::{AddedEntry, CompressionMethod, ZipEntry, ZipReader, ZipWriter};
