mod http;
mod local;
mod memory;

pub use http::HttpRangeReader;
pub use local::{LocalFileReader, LocalFileWriter};
pub use memory::{MemoryReader, MemoryWriter};

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// One-time setup before the first read (e.g. a metadata probe)
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                bail!(
                    "Unexpected end of data: wanted {} bytes at offset {}, got {}",
                    len,
                    offset,
                    filled
                );
            }
            filled += n;
        }
        Ok(buf)
    }
}

/// Trait for an append-only data sink
#[async_trait]
pub trait WriteSink: Send {
    /// One-time setup before the first write
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Append bytes to the sink
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Push any buffered bytes to their final destination
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of bytes already present in the sink before writing began
    fn size(&self) -> u64 {
        0
    }
}
