//! Archives written by `ZipWriter` and read back by `ZipReader`.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use common::*;
use zipstream::{
    AesStrength, CompressionMethod, Configuration, EntryOptions, ErrorKind, ExtractOptions,
    MemoryReader, MemoryWriter, ProgressCallback, ReaderOptions, WriterOptions, ZipError,
    ZipWriter,
};

fn small_chunks() -> Configuration {
    Configuration {
        chunk_size: 64,
        ..Default::default()
    }
}

async fn write_archive(
    options: WriterOptions,
    entries: &[(&str, Vec<u8>)],
    comment: Option<&str>,
) -> Vec<u8> {
    let writer = ZipWriter::with_config(MemoryWriter::new(), options, small_chunks())
        .await
        .unwrap();
    for (name, data) in entries {
        writer
            .add(name, &MemoryReader::new(data.clone()), EntryOptions::default())
            .await
            .unwrap();
    }
    writer.close(comment).await.unwrap().into_inner()
}

#[tokio::test]
async fn sizes_around_the_chunk_boundary() {
    let sizes = [0usize, 1, 63, 64, 65, 64 * 7 + 5];
    for level in [0, 6] {
        let entries: Vec<(String, Vec<u8>)> = sizes
            .iter()
            .map(|&n| {
                let data = (0..n).map(|i| (i * 7 % 251) as u8).collect();
                (format!("file-{n}.bin"), data)
            })
            .collect();
        let borrowed: Vec<(&str, Vec<u8>)> =
            entries.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
        let bytes = write_archive(
            WriterOptions {
                level,
                ..Default::default()
            },
            &borrowed,
            None,
        )
        .await;

        let archive = open_bytes(bytes, ReaderOptions::default()).await;
        assert_eq!(archive.entries().len(), sizes.len());
        for (name, data) in &entries {
            let entry = archive.entry(name).unwrap();
            assert_eq!(entry.uncompressed_size, data.len() as u64);
            let expected = if level == 0 {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflate
            };
            assert_eq!(entry.compression_method, expected);
            assert_eq!(read_entry(&archive, name).await, *data, "{name} at level {level}");
        }
    }
}

#[tokio::test]
async fn offsets_increase_in_add_order() {
    let bytes = write_archive(
        WriterOptions::default(),
        &[("b.txt", lorem()), ("a.txt", HELLO.to_vec()), ("c.txt", Vec::new())],
        None,
    )
    .await;
    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    let names: Vec<_> = archive.entries().iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["b.txt", "a.txt", "c.txt"]);
    let offsets: Vec<_> = archive.entries().iter().map(|e| e.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    assert!(archive.entries().iter().all(|e| e.has_data_descriptor()));
}

#[tokio::test]
async fn zipcrypto_round_trip() {
    let writer = ZipWriter::new(
        MemoryWriter::new(),
        WriterOptions {
            password: Some(b"secret".to_vec()),
            zip_crypto: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let added = writer
        .add("lorem.txt", &MemoryReader::new(lorem()), EntryOptions::default())
        .await
        .unwrap();
    assert!(added.encrypted);
    assert_ne!(added.crc32, 0);
    writer
        .add("empty.txt", &MemoryReader::default(), EntryOptions::default())
        .await
        .unwrap();
    let bytes = writer.close(None).await.unwrap().into_inner();

    let archive = open_bytes(bytes.clone(), password("secret")).await;
    let entry = archive.entry("lorem.txt").unwrap();
    assert!(entry.encrypted);
    assert!(entry.aes.is_none());
    assert_eq!(entry.compression_method, CompressionMethod::Deflate);
    assert_eq!(read_entry(&archive, "lorem.txt").await, lorem());
    // the 12-byte header is there even without data
    let empty = archive.entry("empty.txt").unwrap();
    assert_eq!(empty.uncompressed_size, 0);
    assert!(empty.compressed_size >= 12);
    assert!(read_entry(&archive, "empty.txt").await.is_empty());

    let archive = open_bytes(bytes, password("not it")).await;
    let entry = archive.entry("lorem.txt").unwrap().clone();
    let err = archive
        .extract_to_vec(&entry, ExtractOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
}

#[tokio::test]
async fn aes_round_trip_at_every_strength() {
    for (value, strength) in [
        (1, AesStrength::Aes128),
        (2, AesStrength::Aes192),
        (3, AesStrength::Aes256),
    ] {
        let bytes = write_archive(
            WriterOptions {
                password: Some(b"password".to_vec()),
                encryption_strength: value,
                ..Default::default()
            },
            &[("lorem.txt", lorem()), ("hello.txt", HELLO.to_vec())],
            None,
        )
        .await;

        let archive = open_bytes(bytes, password("password")).await;
        let entry = archive.entry("lorem.txt").unwrap();
        let aes = entry.aes.unwrap();
        assert_eq!(aes.strength(), Some(strength));
        assert_eq!(aes.vendor_version, 2);
        assert_eq!(entry.raw_compression_method, 99);
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert_eq!(entry.crc32, 0);
        assert_eq!(entry.version, 51);
        assert_eq!(read_entry(&archive, "lorem.txt").await, lorem());
        assert_eq!(read_entry(&archive, "hello.txt").await, HELLO);
    }
}

#[tokio::test]
async fn aes_tampering_and_wrong_password() {
    let writer = ZipWriter::new(
        MemoryWriter::new(),
        WriterOptions {
            password: Some(b"password".to_vec()),
            level: 0,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let added = writer
        .add("hello.txt", &MemoryReader::new(HELLO.to_vec()), EntryOptions::default())
        .await
        .unwrap();
    let mut bytes = writer.close(None).await.unwrap().into_inner();

    let archive = open_bytes(bytes.clone(), password("wrong")).await;
    let entry = archive.entry("hello.txt").unwrap().clone();
    let err = archive
        .extract_to_vec(&entry, ExtractOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);

    // header, name, 16-byte salt, 2-byte verifier, then the first ciphertext byte
    let data = added.offset as usize + 30 + "hello.txt".len() + 16 + 2;
    bytes[data] ^= 0x80;
    let archive = open_bytes(bytes, password("password")).await;
    let err = archive
        .extract_to_vec(&entry, ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::InvalidSignature));
}

#[tokio::test]
async fn forced_zip64_reads_back() {
    let bytes = write_archive(
        WriterOptions {
            zip64: true,
            ..Default::default()
        },
        &[("hello.txt", HELLO.to_vec()), ("lorem.txt", lorem())],
        Some("sixty-four"),
    )
    .await;

    // classic end record holds only sentinels
    let eocd = &bytes[bytes.len() - 22 - "sixty-four".len()..];
    assert_eq!(&eocd[..4], b"PK\x05\x06");
    assert_eq!(&eocd[8..12], &[0xFF; 4]);
    assert_eq!(&eocd[12..20], &[0xFF; 8]);

    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    assert_eq!(archive.comment(), "sixty-four");
    for entry in archive.entries() {
        assert!(entry.zip64);
        assert_eq!(entry.version, 45);
    }
    assert_eq!(read_entry(&archive, "hello.txt").await, HELLO);
    assert_eq!(read_entry(&archive, "lorem.txt").await, lorem());
}

#[tokio::test]
async fn many_entries_switch_to_zip64_end_records() {
    let writer = ZipWriter::new(MemoryWriter::new(), WriterOptions::default())
        .await
        .unwrap();
    for i in 0..0xFFFF {
        writer
            .add_directory(&format!("d{i}"), EntryOptions::default())
            .await
            .unwrap();
    }
    let bytes = writer.close(None).await.unwrap().into_inner();

    let mut reader = zipstream::ZipReader::new(
        Arc::new(MemoryReader::new(bytes)),
        ReaderOptions::default(),
    );
    let directory = reader.read_directory().await.unwrap();
    assert!(directory.zip64);
    assert_eq!(directory.entries.len(), 0xFFFF);
    assert_eq!(directory.entries[0xFFFE].filename, "d65534/");
}

#[tokio::test]
async fn rejected_name_writes_nothing() {
    let writer = ZipWriter::new(MemoryWriter::new(), WriterOptions::default())
        .await
        .unwrap();
    let long = "n".repeat(70_000);
    let err = writer
        .add(&long, &MemoryReader::new(HELLO.to_vec()), EntryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = writer
        .add("   ", &MemoryReader::new(HELLO.to_vec()), EntryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(writer.is_empty());

    let bytes = writer.close(None).await.unwrap().into_inner();
    assert_eq!(bytes.len(), 22);
    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    assert!(archive.entries().is_empty());
}

/// Adds a good entry, one whose source fails after two chunks, then another
/// good one; returns the offset of the last and the archive.
async fn add_around_failed_source(buffered_write: bool) -> (u64, Vec<u8>) {
    let options = WriterOptions {
        level: 0,
        buffered_write,
        ..Default::default()
    };
    let writer = ZipWriter::with_config(MemoryWriter::new(), options, small_chunks())
        .await
        .unwrap();
    writer
        .add("first.txt", &MemoryReader::new(HELLO.to_vec()), EntryOptions::default())
        .await
        .unwrap();

    let broken = BrokenReader {
        size: 1000,
        fail_from: 128,
    };
    let err = writer
        .add("bad.txt", &broken, EntryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let good = writer
        .add("good.txt", &MemoryReader::new(lorem()), EntryOptions::default())
        .await
        .unwrap();
    assert_eq!(writer.len(), 2);
    (good.offset, writer.close(None).await.unwrap().into_inner())
}

#[tokio::test]
async fn failed_source_leaves_other_entries_readable() {
    // header, data and descriptor of the stored first.txt
    let first_end = (30 + 9 + HELLO.len() + 16) as u64;

    for buffered in [false, true] {
        let (good_offset, bytes) = add_around_failed_source(buffered).await;
        if buffered {
            assert_eq!(good_offset, first_end);
        } else {
            // the failed entry's header stays behind as a gap
            assert!(good_offset >= first_end + 30 + 7);
        }

        let archive = open_bytes(bytes, ReaderOptions::default()).await;
        assert_eq!(archive.prepended_bytes(), 0);
        let names: Vec<_> = archive.entries().iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, ["first.txt", "good.txt"]);
        assert_eq!(archive.entry("good.txt").unwrap().offset, good_offset);
        assert_eq!(read_entry(&archive, "first.txt").await, HELLO);
        assert_eq!(read_entry(&archive, "good.txt").await, lorem());
    }
}

#[tokio::test]
async fn duplicate_name_and_oversized_comment() {
    let writer = ZipWriter::new(MemoryWriter::new(), WriterOptions::default())
        .await
        .unwrap();
    let reader = MemoryReader::new(HELLO.to_vec());
    writer
        .add("dup.txt", &reader, EntryOptions::default())
        .await
        .unwrap();
    let err = writer
        .add("dup.txt", &reader, EntryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::DuplicateEntry(_)));
    assert_eq!(writer.len(), 1);

    let too_long = "c".repeat(70_000);
    assert!(matches!(
        writer.close(Some(&too_long)).await,
        Err(ZipError::InvalidEntry(_))
    ));
}

#[tokio::test]
async fn entry_metadata_round_trip() {
    let modified = NaiveDate::from_ymd_opt(2021, 6, 15)
        .and_then(|d| d.and_hms_opt(13, 45, 31))
        .unwrap();
    let mut extra_fields = BTreeMap::new();
    extra_fields.insert(0xcafe, b"custom".to_vec());

    let writer = ZipWriter::new(MemoryWriter::new(), WriterOptions::default())
        .await
        .unwrap();
    writer
        .add(
            "日本/ファイル.txt",
            &MemoryReader::new(HELLO.to_vec()),
            EntryOptions {
                comment: Some("entry note".to_string()),
                last_modified: Some(modified),
                extra_fields,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bytes = writer.close(Some("archive note")).await.unwrap().into_inner();

    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    assert_eq!(archive.comment(), "archive note");
    let entry = archive.entry("日本/ファイル.txt").unwrap();
    assert!(entry.filename_utf8);
    assert_eq!(entry.comment, "entry note");
    // MS-DOS time keeps even seconds
    assert_eq!(entry.last_modified.unwrap().to_string(), "2021-06-15 13:45:30");
    assert_eq!(entry.extra_fields[&0xcafe], b"custom");
    assert_eq!(read_entry(&archive, "日本/ファイル.txt").await, HELLO);
}

#[tokio::test]
async fn archive_after_existing_bytes() {
    let stub = b"#!/bin/sh\nexit 0\n".to_vec();
    let writer = ZipWriter::new(MemoryWriter::with_prefix(stub.clone()), WriterOptions::default())
        .await
        .unwrap();
    let added = writer
        .add("hello.txt", &MemoryReader::new(HELLO.to_vec()), EntryOptions::default())
        .await
        .unwrap();
    assert_eq!(added.offset, stub.len() as u64);
    let bytes = writer.close(None).await.unwrap().into_inner();
    assert!(bytes.starts_with(&stub));

    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    assert_eq!(archive.prepended_bytes(), 0);
    assert_eq!(read_entry(&archive, "hello.txt").await, HELLO);
}

#[tokio::test]
async fn progress_reports_every_chunk_and_errors_are_ignored() {
    let bytes = write_archive(WriterOptions::default(), &[("lorem.txt", lorem())], None).await;
    let archive = open_bytes(bytes, ReaderOptions::default()).await;
    let entry = archive.entry("lorem.txt").unwrap().clone();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let progress: ProgressCallback = {
        let calls = Arc::clone(&calls);
        Arc::new(move |done: u64, total: u64| -> anyhow::Result<()> {
            calls.lock().unwrap().push((done, total));
            anyhow::bail!("listener failed")
        })
    };
    let data = archive
        .extract_to_vec(
            &entry,
            ExtractOptions {
                progress: Some(progress),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(data, lorem());

    let calls = calls.lock().unwrap();
    assert!(!calls.is_empty());
    assert_eq!(*calls.last().unwrap(), (entry.compressed_size, entry.compressed_size));
    assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));
}

#[tokio::test]
async fn written_to_disk_and_extracted_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.zip");

    let sink = zipstream::LocalFileWriter::create(&path).await.unwrap();
    let writer = ZipWriter::new(sink, WriterOptions::default()).await.unwrap();
    writer
        .add("nested/lorem.txt", &MemoryReader::new(lorem()), EntryOptions::default())
        .await
        .unwrap();
    writer.close(None).await.unwrap();

    let reader = Arc::new(zipstream::LocalFileReader::new(&path).unwrap());
    let archive = open(reader, ReaderOptions::default()).await;
    let entry = archive.entry("nested/lorem.txt").unwrap().clone();
    let target = dir.path().join("x").join("lorem.txt");
    let written = archive
        .extract_to_file(&entry, &target, ExtractOptions::default())
        .await
        .unwrap();
    assert_eq!(written, lorem().len() as u64);
    assert_eq!(std::fs::read(&target).unwrap(), lorem());
}
