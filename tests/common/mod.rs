#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use zipstream::{
    ExtractOptions, LocalFileReader, MemoryReader, ReadAt, ReaderOptions, ZipReader,
};

pub const HELLO: &[u8] = b"Hello, World!\n";

/// Contents of every `lorem*.txt` / `-` fixture entry
pub fn lorem() -> Vec<u8> {
    (0..200)
        .map(|i| format!("Lorem ipsum dolor sit amet, consectetur adipiscing elit {i}.\n"))
        .collect::<String>()
        .into_bytes()
}

pub fn fixture(name: &str) -> Arc<LocalFileReader> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name);
    Arc::new(LocalFileReader::new(&path).unwrap())
}

pub async fn open<R: ReadAt + ?Sized>(reader: Arc<R>, options: ReaderOptions) -> ZipReader<R> {
    let mut archive = ZipReader::new(reader, options);
    archive.read_directory().await.unwrap();
    archive
}

pub async fn open_bytes(bytes: Vec<u8>, options: ReaderOptions) -> ZipReader<MemoryReader> {
    open(Arc::new(MemoryReader::new(bytes)), options).await
}

pub async fn read_entry<R: ReadAt + ?Sized>(archive: &ZipReader<R>, name: &str) -> Vec<u8> {
    let entry = archive
        .entry(name)
        .unwrap_or_else(|| panic!("no entry named {name}"))
        .clone();
    archive
        .extract_to_vec(&entry, ExtractOptions::default())
        .await
        .unwrap()
}

pub fn password(password: &str) -> ReaderOptions {
    ReaderOptions {
        password: Some(password.as_bytes().to_vec()),
        ..Default::default()
    }
}

/// A source that sleeps before every read
pub struct SlowReader {
    pub inner: MemoryReader,
    pub delay: Duration,
}

#[async_trait]
impl ReadAt for SlowReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

/// A source of `size` bytes whose reads fail from `fail_from` on
pub struct BrokenReader {
    pub size: u64,
    pub fail_from: u64,
}

#[async_trait]
impl ReadAt for BrokenReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.fail_from {
            anyhow::bail!("source went away at {}", offset);
        }
        let n = buf.len().min((self.fail_from - offset) as usize);
        buf[..n].fill(b'z');
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
