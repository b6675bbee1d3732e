//! Chunked transfer of one byte range through a codec.

use log::{trace, warn};

use crate::config::{MIN_CHUNK_SIZE, ProgressCallback};
use crate::error::ZipResult;
use crate::io::{ReadAt, WriteSink};
use crate::pool::CodecHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Bytes written to the sink
    pub length: u64,
    pub signature: Option<u32>,
}

/// Streams `length` bytes at `offset` from `reader` through `codec` into `writer`.
///
/// At most one chunk is held in memory at a time, plus whatever the codec buffers.
pub async fn process_data<R, W>(
    mut codec: CodecHandle,
    reader: &R,
    writer: &mut W,
    offset: u64,
    length: u64,
    chunk_size: usize,
    progress: Option<&ProgressCallback>,
) -> ZipResult<ProcessOutput>
where
    R: ReadAt + ?Sized,
    W: WriteSink + ?Sized,
{
    let chunk_size = chunk_size.max(MIN_CHUNK_SIZE) as u64;
    let mut consumed = 0u64;
    let mut written = 0u64;

    while consumed < length {
        let size = chunk_size.min(length - consumed);
        let input = reader.read_range(offset + consumed, size as usize).await?;
        let output = codec.append(input).await?;
        if !output.is_empty() {
            writer.write_bytes(&output).await?;
            written += output.len() as u64;
        }
        consumed += size;
        report(progress, consumed, length);
    }

    let tail = codec.flush().await?;
    if !tail.data.is_empty() {
        writer.write_bytes(&tail.data).await?;
        written += tail.data.len() as u64;
    }
    trace!(
        "processed {} bytes at {} into {} bytes",
        length, offset, written
    );
    Ok(ProcessOutput {
        length: written,
        signature: tail.signature,
    })
}

fn report(progress: Option<&ProgressCallback>, consumed: u64, total: u64) {
    if let Some(progress) = progress {
        if let Err(e) = progress(consumed, total) {
            warn!("Progress callback failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, DecodeOptions, EncodeOptions};
    use crate::io::{MemoryReader, MemoryWriter};
    use crate::pool::WorkerPool;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn copies_range_in_chunks_and_reports_progress() {
        let pool = Arc::new(WorkerPool::new(2));
        let reader = MemoryReader::new((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let mut writer = MemoryWriter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let progress: ProgressCallback = {
            let calls = Arc::clone(&calls);
            Arc::new(move |done: u64, total: u64| -> anyhow::Result<()> {
                calls.lock().unwrap().push((done, total));
                anyhow::bail!("ignored")
            })
        };

        let codec = pool
            .start(Codec::decoder(DecodeOptions::default()), true)
            .await
            .unwrap();
        let output = process_data(codec, &reader, &mut writer, 100, 200, 64, Some(&progress))
            .await
            .unwrap();

        assert_eq!(output.length, 200);
        assert_eq!(output.signature, None);
        assert_eq!(writer.as_slice(), &reader.clone().into_inner()[100..300]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(64, 200), (128, 200), (192, 200), (200, 200)]
        );
    }

    #[tokio::test]
    async fn empty_range_still_flushes() {
        let pool = Arc::new(WorkerPool::new(2));
        let reader = MemoryReader::default();
        let mut writer = MemoryWriter::new();
        let codec = Codec::encoder(EncodeOptions {
            level: Some(5),
            signed: true,
            ..Default::default()
        })
        .unwrap();
        let codec = pool.start(codec, false).await.unwrap();
        let output = process_data(codec, &reader, &mut writer, 0, 0, 1024, None)
            .await
            .unwrap();
        assert_eq!(output.signature, Some(0));
        assert!(output.length > 0);
        assert_eq!(output.length, writer.len() as u64);
    }
}
