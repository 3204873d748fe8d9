mod common;

use std::io::{Cursor, Read};

use anyhow::Result;
use arcstream::formats::{ArArchiveReader, CpioArchiveReader, CpioFormat, TarArchiveReader};
use arcstream::{
    detect_archive_format, open_archive, open_archive_autodetect, ArchiveEntry, ArchiveError,
    ArchiveFormat, ArchiveReader, EntryKind, MemoryLimit, ReadOptions,
};

fn pax_record(key: &str, value: &str) -> String {
    let body = format!(" {key}={value}\n");
    let mut len = body.len() + 1;
    while format!("{len}{body}").len() != len {
        len += 1;
    }
    format!("{len}{body}")
}

#[test]
fn ar_members_and_truncation() -> Result<()> {
    let data = common::ar_archive(&[("one.o", b"odd"), ("two.o", b"even")]);
    let mut reader = ArArchiveReader::new(&data[..], ReadOptions::default())?;
    let names: Vec<String> = reader
        .entries()
        .map(|entry| entry.map(|e| e.name().to_string()))
        .collect::<arcstream::Result<_>>()?;
    assert_eq!(names, ["one.o", "two.o"]);

    let mut short = common::ar_archive(&[("big.o", &[9u8; 100])]);
    short.truncate(short.len() - 60);
    let mut reader = ArArchiveReader::new(&short[..], ReadOptions::default())?;
    reader.next_entry()?.expect("entry");
    let mut content = Vec::new();
    let err = ArchiveError::from(reader.read_to_end(&mut content).unwrap_err());
    match err {
        ArchiveError::TruncatedEntry { entry, expected, actual } => {
            assert_eq!(entry.as_deref(), Some("big.o"));
            assert_eq!((expected, actual), (100, 40));
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn tar_long_names_and_pax() -> Result<()> {
    let long_name = format!("{}/file.txt", "deep".repeat(40));
    let mut long_payload = long_name.clone().into_bytes();
    long_payload.push(0);

    let mut data = common::tar_entry("././@LongLink", b'L', &long_payload);
    data.extend(common::tar_entry("truncated-name", b'0', b"gnu"));
    let pax = pax_record("path", "pax/overrides/the/name.txt") + &pax_record("uname", "paxuser");
    data.extend(common::tar_entry("PaxHeaders/x", b'x', pax.as_bytes()));
    data.extend(common::tar_entry("ignored", b'0', b"pax content"));
    data.extend(common::tar_entry("dir", b'5', b""));
    data.extend(common::tar_end());

    assert_eq!(detect_archive_format(&data[..512]), Some(ArchiveFormat::Tar));
    let mut reader = TarArchiveReader::new(&data[..], ReadOptions::default())?;

    let gnu = reader.next_entry()?.expect("long name entry");
    assert_eq!(gnu.name(), long_name);
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    assert_eq!(content, "gnu");

    let pax = reader.next_entry()?.expect("pax entry");
    assert_eq!(pax.name(), "pax/overrides/the/name.txt");
    let owner = pax.owner().expect("owner");
    assert_eq!(owner.user.as_deref(), Some("paxuser"));
    assert_eq!(owner.group.as_deref(), Some("group"));
    assert_eq!(owner.uid, Some(1000));
    assert_eq!(pax.mode(), Some(0o644));

    let dir = reader.next_entry()?.expect("directory");
    assert_eq!(dir.name(), "dir/");
    assert_eq!(dir.kind(), EntryKind::Directory);
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

#[test]
fn tar_header_checksum_is_verified() -> Result<()> {
    let mut data = common::tar_entry("file", b'0', b"data");
    data[0] = b'F';
    let mut reader = TarArchiveReader::new(&data[..], ReadOptions::default())?;
    assert!(matches!(
        reader.next_entry(),
        Err(ArchiveError::CorruptHeader { offset: 0, .. })
    ));
    Ok(())
}

#[test]
fn cpio_newc_and_crc() -> Result<()> {
    let content = b"cpio payload";
    let sum: u32 = content.iter().map(|&b| b as u32).sum();
    let mut data = common::cpio_newc("070702", "dir", 0o040755, b"", 0);
    data.extend(common::cpio_newc("070702", "dir/file.txt", 0o100644, content, sum));
    data.extend(common::cpio_trailer("070702"));

    let mut reader = CpioArchiveReader::new(&data[..], ReadOptions::default())?;
    let dir = reader.next_entry()?.expect("dir");
    assert_eq!(dir.name(), "dir/");
    assert_eq!(dir.format(), CpioFormat::NewCrc);
    let file = reader.next_entry()?.expect("file");
    assert_eq!(file.checksum(), sum);
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    assert_eq!(out, content);
    assert!(reader.next_entry()?.is_none());

    let mut bad = common::cpio_newc("070702", "bad", 0o100644, content, sum + 1);
    bad.extend(common::cpio_trailer("070702"));
    let mut reader = CpioArchiveReader::new(&bad[..], ReadOptions::default())?;
    reader.next_entry()?.expect("entry");
    let err = ArchiveError::from(reader.read_to_end(&mut out).unwrap_err());
    assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }), "{err}");
    Ok(())
}

#[test]
fn autodetected_archives() -> Result<()> {
    let mut cpio = common::cpio_newc("070701", "a.txt", 0o100644, b"from cpio", 0);
    cpio.extend(common::cpio_trailer("070701"));
    let mut tar = common::tar_entry("a.txt", b'0', b"from tar");
    tar.extend(common::tar_end());
    let ar = common::ar_archive(&[("a.txt", b"from ar")]);
    let mut arj = common::arj_main_header("x.arj");
    arj.extend(common::arj_file("a.txt", 0, b"from arj"));
    arj.extend(common::arj_end());
    let mut zip = common::zip_entry("a.txt", 0, b"from zip", b"from zip");
    zip.extend(common::zip_end());

    for (archive, expected) in [
        (cpio, "from cpio"),
        (tar, "from tar"),
        (ar, "from ar"),
        (arj, "from arj"),
        (zip, "from zip"),
    ] {
        let mut reader = open_archive_autodetect(Cursor::new(archive), ReadOptions::default())?;
        let entry = reader.next_entry_dyn()?.expect("entry");
        assert_eq!(entry.name(), "a.txt");
        assert!(reader.can_read_entry_data_dyn(entry.as_ref()));
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        assert_eq!(content, expected);
        assert!(reader.next_entry_dyn()?.is_none());
    }
    Ok(())
}

#[test]
fn open_by_name() -> Result<()> {
    let data = common::ar_archive(&[("n.o", b"x")]);
    let format: ArchiveFormat = "AR".parse()?;
    let mut reader = open_archive(format, Cursor::new(data), ReadOptions::default())?;
    assert_eq!(reader.next_entry_dyn()?.expect("entry").name(), "n.o");
    assert!(reader.bytes_read_dyn() > 8);
    Ok(())
}

#[test]
fn memory_limit_rejects_one_kib_over() -> Result<()> {
    let limit_kib = 4;
    let mut name = vec![b'n'; (limit_kib as usize + 1) * 1024 - 1];
    name.push(0);
    let mut data = common::tar_entry("././@LongLink", b'L', &name);
    data.extend(common::tar_entry("short", b'0', b""));
    data.extend(common::tar_end());

    let limited = ReadOptions::default().with_memory_limit(MemoryLimit::Kib(limit_kib));
    let mut reader = TarArchiveReader::new(&data[..], limited)?;
    match reader.next_entry() {
        Err(ArchiveError::MemoryLimitExceeded { requested_kib, limit_kib: limit }) => {
            assert_eq!((requested_kib, limit), (limit_kib + 1, limit_kib));
        }
        other => panic!("unexpected result {other:?}"),
    }

    let roomy = ReadOptions::default().with_memory_limit(MemoryLimit::Kib(limit_kib + 1));
    let mut reader = TarArchiveReader::new(&data[..], roomy)?;
    let entry = reader.next_entry()?.expect("entry");
    assert_eq!(entry.name().len(), (limit_kib as usize + 1) * 1024 - 1);
    Ok(())
}
