//! Concurrent `add` calls sharing one writer and one worker pool.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use zipstream::{
    Configuration, EntryOptions, MemoryReader, MemoryWriter, ProgressCallback, ReaderOptions,
    WriterOptions, ZipWriter,
};

fn slow(data: Vec<u8>) -> SlowReader {
    SlowReader {
        inner: MemoryReader::new(data),
        delay: Duration::from_millis(20),
    }
}

async fn add_slow_then_fast(preserve_order: bool) -> (u64, u64, Vec<u8>) {
    let config = Configuration {
        chunk_size: 1024,
        ..Default::default()
    };
    let options = WriterOptions {
        buffered_write: true,
        preserve_order,
        ..Default::default()
    };
    let writer = ZipWriter::with_config(MemoryWriter::new(), options, config)
        .await
        .unwrap();

    let slow_source = slow(lorem());
    let fast_source = MemoryReader::new(HELLO.to_vec());
    let (first, second) = tokio::join!(
        writer.add("slow.txt", &slow_source, EntryOptions::default()),
        writer.add("fast.txt", &fast_source, EntryOptions::default()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    let bytes = writer.close(None).await.unwrap().into_inner();
    (first.offset, second.offset, bytes)
}

#[tokio::test]
async fn preserved_order_waits_for_earlier_entries() {
    let (slow_offset, fast_offset, bytes) = add_slow_then_fast(true).await;
    assert_eq!(slow_offset, 0);
    assert!(fast_offset > slow_offset);

    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    let names: Vec<_> = archive.entries().iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["slow.txt", "fast.txt"]);
    assert_eq!(read_entry(&archive, "slow.txt").await, lorem());
    assert_eq!(read_entry(&archive, "fast.txt").await, HELLO);
}

#[tokio::test]
async fn unordered_entries_commit_when_ready() {
    let (slow_offset, fast_offset, bytes) = add_slow_then_fast(false).await;
    assert_eq!(fast_offset, 0);
    assert!(slow_offset > fast_offset);

    // the directory still lists entries in add order
    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    let names: Vec<_> = archive.entries().iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["slow.txt", "fast.txt"]);
    assert_eq!(read_entry(&archive, "slow.txt").await, lorem());
    assert_eq!(read_entry(&archive, "fast.txt").await, HELLO);
}

#[tokio::test]
async fn pool_bounds_concurrent_codecs() {
    let config = Configuration {
        chunk_size: 512,
        ..Configuration::with_max_workers(2)
    };
    let pool = Arc::clone(&config.pool);
    let peak = Arc::new(AtomicUsize::new(0));
    let progress: ProgressCallback = {
        let pool = Arc::clone(&pool);
        let peak = Arc::clone(&peak);
        Arc::new(move |_: u64, _: u64| -> anyhow::Result<()> {
            peak.fetch_max(pool.busy_slots(), Ordering::SeqCst);
            Ok(())
        })
    };

    let writer = Arc::new(
        ZipWriter::with_config(MemoryWriter::new(), WriterOptions::default(), config)
            .await
            .unwrap(),
    );
    let mut tasks = Vec::new();
    for i in 0..8 {
        let writer = Arc::clone(&writer);
        let progress = progress.clone();
        tasks.push(tokio::spawn(async move {
            let mut data = lorem();
            data.extend(format!("entry {i}\n").into_bytes());
            let source = slow(data);
            let options = EntryOptions {
                progress: Some(progress),
                ..Default::default()
            };
            writer.add(&format!("entry-{i}.txt"), &source, options).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.busy_slots(), 0);

    let writer = Arc::try_unwrap(writer).ok().unwrap();
    let bytes = writer.close(None).await.unwrap().into_inner();
    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    assert_eq!(archive.entries().len(), 8);
    let offsets: Vec<_> = archive.entries().iter().map(|e| e.offset).collect();
    // tasks may start in any order, but each commit follows the previous one
    let mut sorted = offsets.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), 8);
    for i in 0..8 {
        let mut expected = lorem();
        expected.extend(format!("entry {i}\n").into_bytes());
        assert_eq!(read_entry(&archive, &format!("entry-{i}.txt")).await, expected);
    }
}
