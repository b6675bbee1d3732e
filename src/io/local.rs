use super::{ReadAt, WriteSink};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Local file reader with random access support
pub struct LocalFileReader {
    file: std::fs::File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Local file writer; new bytes are appended to whatever the file already holds
pub struct LocalFileWriter {
    file: BufWriter<tokio::fs::File>,
    size: u64,
}

impl LocalFileWriter {
    /// Create (or truncate) the file at `path`
    pub async fn create(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            file: BufWriter::new(file),
            size: 0,
        })
    }

    /// Open the file at `path` for appending, e.g. behind a self-extracting stub
    pub async fn append(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: BufWriter::new(file),
            size,
        })
    }
}

#[async_trait]
impl WriteSink for LocalFileWriter {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
