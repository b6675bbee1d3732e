use super::{ReadAt, WriteSink};
use anyhow::{Result, bail};
use async_trait::async_trait;

/// Reader over bytes already held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl ReadAt for MemoryReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset > len {
            bail!("Offset {} is past the end of {} bytes", offset, len);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Writer collecting everything into a `Vec<u8>`
#[derive(Debug, Default)]
pub struct MemoryWriter {
    data: Vec<u8>,
    initial: u64,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing bytes; new data is appended after them.
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let data = prefix.into();
        let initial = data.len() as u64;
        Self { data, initial }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl WriteSink for MemoryWriter {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.initial
    }
}
