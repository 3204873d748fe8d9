mod common;

use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use arcstream::formats::zip::{
    BackingStoreKind, ParallelScatterZipCreator, ScatterOptions, ScatterRequest, ZipArchiveEntry,
    ZipArchiveReader, ZipArchiveWriter, ZipMethod,
};
use arcstream::{ArchiveEntry, ArchiveReader, ReadOptions};

fn payload(i: usize) -> Vec<u8> {
    // Uneven sizes so workers finish out of order.
    let len = if i % 7 == 0 { 200_000 } else { 100 + i * 37 };
    let mut data = common::sample_text(len);
    data.extend(format!("#{i}").into_bytes());
    data
}

fn entry(i: usize) -> ZipArchiveEntry {
    let method = if i % 3 == 0 { ZipMethod::Stored } else { ZipMethod::Deflated };
    ZipArchiveEntry::new(format!("files/entry-{i:03}.txt"))
        .with_method(method)
        .with_mode(0o100644)
}

fn verify(archive: &[u8], count: usize) -> Result<()> {
    let mut reader = ZipArchiveReader::new(archive, ReadOptions::default())?;
    for i in 0..count {
        let read = reader.next_entry()?.expect("entry present");
        assert_eq!(read.name(), format!("files/entry-{i:03}.txt"));
        let expected = payload(i);
        assert_eq!(read.crc32(), Some(crc32fast::hash(&expected)));
        assert_eq!(read.size(), Some(expected.len() as u64));
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        assert_eq!(content, expected, "content of entry {i}");
    }
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

#[test]
fn eight_workers_keep_submission_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let creator = ParallelScatterZipCreator::new(ScatterOptions {
        threads: 8,
        backing_store: BackingStoreKind::TempFile {
            dir: Some(dir.path().to_path_buf()),
        },
        level: 6,
    })?;
    const COUNT: usize = 64;
    for i in 0..COUNT {
        creator.submit(ScatterRequest::new(entry(i), move || {
            Ok(std::io::Cursor::new(payload(i)))
        }))?;
    }

    let mut writer = ZipArchiveWriter::new(Vec::new());
    let stats = creator.write_to(&mut writer)?;
    assert_eq!(stats.entries, COUNT);
    let archive = writer.finish()?;
    verify(&archive, COUNT)
}

#[test]
fn in_memory_stores() -> Result<()> {
    let creator = ParallelScatterZipCreator::new(ScatterOptions {
        threads: 4,
        backing_store: BackingStoreKind::Memory,
        ..ScatterOptions::default()
    })?;
    for i in 0..10 {
        creator.submit(ScatterRequest::from_bytes(entry(i), payload(i)))?;
    }
    let mut writer = ZipArchiveWriter::new(Vec::new());
    creator.write_to(&mut writer)?;
    verify(&writer.finish()?, 10)
}

#[test]
fn concurrent_callers() -> Result<()> {
    let creator = Arc::new(ParallelScatterZipCreator::new(ScatterOptions {
        threads: 8,
        backing_store: BackingStoreKind::Memory,
        ..ScatterOptions::default()
    })?);
    std::thread::scope(|scope| {
        for t in 0..4 {
            let creator = Arc::clone(&creator);
            scope.spawn(move || {
                for i in 0..8 {
                    let n = t * 8 + i;
                    creator
                        .add_entry(ScatterRequest::from_bytes(entry(n), payload(n)))
                        .expect("add entry");
                }
            });
        }
    });
    let creator = Arc::into_inner(creator).expect("no other owners");

    let mut writer = ZipArchiveWriter::new(Vec::new());
    let stats = creator.write_to(&mut writer)?;
    assert_eq!(stats.entries, 32);
    let archive = writer.finish()?;

    let mut reader = ZipArchiveReader::new(&archive[..], ReadOptions::default())?;
    let mut names = Vec::new();
    while let Some(read) = reader.next_entry()? {
        let n: usize = read.name()[12..15].parse()?;
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        assert_eq!(content, payload(n));
        names.push(n);
    }
    names.sort_unstable();
    assert_eq!(names, (0..32).collect::<Vec<_>>());
    Ok(())
}
