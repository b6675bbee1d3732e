//! Raw DEFLATE stages with an append/flush interface.
//!
//! Both directions write into an in-memory `Vec` owned by the `flate2` writer
//! and hand back whatever it produced so far after every call.

use std::io::Write;

use flate2::Compression;
use flate2::write::{DeflateDecoder, DeflateEncoder};

use crate::error::{ZipError, ZipResult};

pub struct Compressor {
    encoder: DeflateEncoder<Vec<u8>>,
}

impl Compressor {
    /// `level` is clamped to 0..=9
    pub fn new(level: u32) -> Self {
        Self {
            encoder: DeflateEncoder::new(Vec::new(), Compression::new(level.min(9))),
        }
    }

    pub fn append(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        self.encoder.write_all(data)?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    pub fn flush(self) -> ZipResult<Vec<u8>> {
        Ok(self.encoder.finish()?)
    }
}

pub struct Decompressor {
    decoder: DeflateDecoder<Vec<u8>>,
}

impl Decompressor {
    pub fn new() -> Self {
        Self {
            decoder: DeflateDecoder::new(Vec::new()),
        }
    }

    pub fn append(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        self.decoder.write_all(data).map_err(corrupt)?;
        Ok(std::mem::take(self.decoder.get_mut()))
    }

    pub fn flush(self) -> ZipResult<Vec<u8>> {
        self.decoder.finish().map_err(corrupt)
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn corrupt(e: std::io::Error) -> ZipError {
    ZipError::CorruptData(format!("invalid deflate stream: {}", e))
}
