mod common;

use std::io::Read;

use anyhow::Result;
use arcstream::formats::ArjArchiveReader;
use arcstream::{ArchiveEntry, ArchiveError, ArchiveReader, Feature, ReadOptions};

fn two_file_archive() -> Vec<u8> {
    let mut data = common::arj_main_header("test.arj");
    data.extend(common::arj_file("dir\\hello.txt", 0, b"hello, arj"));
    data.extend(common::arj_file("second.bin", 0, &[1, 2, 3]));
    data.extend(common::arj_end());
    data
}

#[test]
fn stored_entries_round_trip() -> Result<()> {
    let data = two_file_archive();
    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    assert_eq!(reader.archive_name(), "test.arj");
    assert_eq!(reader.archive_comment(), "archive comment");

    let entry = reader.next_entry()?.expect("first entry");
    assert_eq!(entry.name(), "dir/hello.txt");
    assert_eq!(entry.size(), Some(10));
    assert_eq!(entry.unix_mode(), 0o644);
    assert!(reader.can_read_entry_data(&entry));
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    assert_eq!(content, "hello, arj");

    // Left unread, skipped by the next call.
    let second = reader.next_entry()?.expect("second entry");
    assert_eq!(second.name(), "second.bin");
    assert!(reader.next_entry()?.is_none());
    assert!(reader.next_entry()?.is_none());
    assert_eq!(reader.bytes_read(), data.len() as u64);
    Ok(())
}

#[test]
fn corrupt_main_header_crc() -> Result<()> {
    let mut data = two_file_archive();
    // Inside the archive name of the main header.
    data[4 + 30] ^= 0x20;
    match ArjArchiveReader::new(&data[..], ReadOptions::default()) {
        Err(ArchiveError::CorruptHeader { offset, reason }) => {
            assert_eq!(offset, 0);
            assert!(reason.contains("CRC"), "{reason}");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("corrupt header accepted"),
    }
    Ok(())
}

#[test]
fn self_extracting_stub_is_skipped() -> Result<()> {
    let mut data = b"MZ\x90\x00 pretend this is an SFX stub \x60 with a stray magic byte".to_vec();
    data.resize(300, 0x90);
    let stub_len = data.len() as u64;
    data.extend(two_file_archive());

    assert!(matches!(
        ArjArchiveReader::new(&data[..], ReadOptions::default()),
        Err(ArchiveError::CorruptHeader { offset: 0, .. })
    ));

    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default().self_extracting(true))?;
    assert_eq!(reader.archive_name(), "test.arj");
    assert!(reader.bytes_read() > stub_len);
    let entry = reader.next_entry()?.expect("entry after stub");
    assert_eq!(entry.name(), "dir/hello.txt");
    Ok(())
}

#[test]
fn corrupted_content_fails_checksum() -> Result<()> {
    let mut data = common::arj_main_header("bad.arj");
    data.extend(common::arj_file("flip.txt", 0, b"0123456789"));
    let last = data.len() - 1;
    data[last] ^= 0x01;
    data.extend(common::arj_end());

    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    reader.next_entry()?.expect("entry");
    let mut content = Vec::new();
    let err = ArchiveError::from(reader.read_to_end(&mut content).unwrap_err());
    match err {
        ArchiveError::ChecksumMismatch { entry, expected, .. } => {
            assert_eq!(entry.as_deref(), Some("flip.txt"));
            assert_eq!(expected, crc32fast::hash(b"0123456789"));
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn truncated_stored_entry() -> Result<()> {
    let mut data = common::arj_main_header("short.arj");
    data.extend(common::arj_file("cut.bin", 0, &[7u8; 100]));
    data.truncate(data.len() - 40);

    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    reader.next_entry()?.expect("entry");
    let mut content = Vec::new();
    let err = ArchiveError::from(reader.read_to_end(&mut content).unwrap_err());
    assert!(matches!(
        err,
        ArchiveError::TruncatedEntry { expected: 100, actual: 60, .. }
    ));
    Ok(())
}

#[test]
fn compressed_entries_are_listed_but_not_decoded() -> Result<()> {
    let mut data = common::arj_main_header("packed.arj");
    data.extend(common::arj_file("packed.bin", 1, b"pretend this is LZ data"));
    data.extend(common::arj_file("plain.txt", 0, b"plain"));
    data.extend(common::arj_end());

    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    let packed = reader.next_entry()?.expect("packed entry");
    assert!(!reader.can_read_entry_data(&packed));
    let mut buf = [0u8; 8];
    let err = ArchiveError::from(reader.read(&mut buf).unwrap_err());
    assert!(matches!(err, ArchiveError::UnsupportedMethod { .. }));

    let plain = reader.next_entry()?.expect("plain entry");
    assert!(reader.can_read_entry_data(&plain));
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    assert_eq!(content, "plain");
    Ok(())
}

#[test]
fn garbled_entry_reports_encryption() -> Result<()> {
    let mut data = common::arj_main_header("garbled.arj");
    data.extend(common::arj_file_with_flags("secret.txt", 0, 0x01, b"scrambled!"));
    data.extend(common::arj_file("open.txt", 0, b"open"));
    data.extend(common::arj_end());

    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    let secret = reader.next_entry()?.expect("garbled entry");
    assert!(secret.is_encrypted());
    assert!(!reader.can_read_entry_data(&secret));
    let err = ArchiveError::from(reader.read(&mut [0u8; 4]).unwrap_err());
    assert!(matches!(
        err,
        ArchiveError::UnsupportedFeature { feature: Feature::Encryption, .. }
    ));

    let open = reader.next_entry()?.expect("plain entry");
    assert_eq!(open.name(), "open.txt");
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    assert_eq!(content, "open");
    Ok(())
}

#[test]
fn read_without_entry() -> Result<()> {
    let data = two_file_archive();
    let mut reader = ArjArchiveReader::new(&data[..], ReadOptions::default())?;
    let err = ArchiveError::from(reader.read(&mut [0u8; 4]).unwrap_err());
    assert!(matches!(err, ArchiveError::NoCurrentEntry));
    Ok(())
}
