//! ZIP container format: reading and writing archives.
//!
//! - [`structures`]: fixed-size records (headers, end records, descriptors)
//! - [`extra`]: extra-field records (Zip64, AES, Unicode path/comment)
//! - [`entry`]: directory entries as seen by readers
//! - [`parser`]: locating and parsing the end records and central directory
//! - [`reader`]: extracting entries through their codec
//! - [`writer`]: appending entries and writing the central directory
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD, so entries can be listed without fetching
//! the data in front of the directory.
//!
//! ## Limitations
//!
//! - No multi-disk archive support
//! - Only STORED and DEFLATE compression

pub mod entry;
pub mod extra;
mod parser;
mod reader;
pub mod structures;
mod writer;

pub use entry::{CentralDirectory, LocalDirectory, ZipEntry};
pub use parser::{EocdLocation, ZipParser};
pub use reader::ZipReader;
pub use structures::CompressionMethod;
pub use writer::{AddedEntry, ZipWriter};
