//! Byte-level fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

pub const ARJ_MAGIC: [u8; 2] = [0x60, 0xEA];

/// `60 EA size basic crc` followed by an empty extended header chain.
pub fn arj_header(basic: &[u8]) -> Vec<u8> {
    let mut out = ARJ_MAGIC.to_vec();
    out.extend_from_slice(&(basic.len() as u16).to_le_bytes());
    out.extend_from_slice(basic);
    out.extend_from_slice(&crc32fast::hash(basic).to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn arj_main_header(archive_name: &str) -> Vec<u8> {
    // size, version, min version, host (Unix), flags, security, file type, reserved
    let mut basic = vec![30, 11, 1, 2, 0, 0, 2, 0];
    basic.extend_from_slice(&1_600_000_000u32.to_le_bytes()); // created
    basic.extend_from_slice(&1_600_000_000u32.to_le_bytes()); // modified
    basic.extend_from_slice(&0u32.to_le_bytes()); // archive size
    basic.extend_from_slice(&0u32.to_le_bytes()); // security envelope position
    basic.extend_from_slice(&0u16.to_le_bytes()); // file spec position
    basic.extend_from_slice(&0u16.to_le_bytes()); // security envelope length
    basic.extend_from_slice(&[0, 0]); // encryption version, last chapter
    basic.extend_from_slice(archive_name.as_bytes());
    basic.push(0);
    basic.extend_from_slice(b"archive comment\0");
    arj_header(&basic)
}

/// Local header plus `data`, stored unless `method` says otherwise.
pub fn arj_file(name: &str, method: u8, data: &[u8]) -> Vec<u8> {
    arj_file_with_flags(name, method, 0, data)
}

pub fn arj_file_with_flags(name: &str, method: u8, flags: u8, data: &[u8]) -> Vec<u8> {
    let mut basic = vec![30, 11, 1, 2, flags, method, 0, 0];
    basic.extend_from_slice(&1_600_000_000u32.to_le_bytes());
    basic.extend_from_slice(&(data.len() as u32).to_le_bytes());
    basic.extend_from_slice(&(data.len() as u32).to_le_bytes());
    basic.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    basic.extend_from_slice(&0u16.to_le_bytes());
    basic.extend_from_slice(&0o644u16.to_le_bytes());
    basic.extend_from_slice(&[0, 0]);
    basic.extend_from_slice(name.as_bytes());
    basic.push(0);
    basic.push(0);
    let mut out = arj_header(&basic);
    out.extend_from_slice(data);
    out
}

pub fn arj_end() -> Vec<u8> {
    let mut out = ARJ_MAGIC.to_vec();
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn ar_member(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
        format!("{name}/"),
        1_600_000_000,
        0,
        0,
        "100644",
        data.len()
    )
    .into_bytes();
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(b'\n');
    }
    out
}

pub fn ar_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, data) in members {
        out.extend(ar_member(name, data));
    }
    out
}

fn octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
}

/// One ustar header block with a valid checksum.
pub fn tar_header(name: &str, size: u64, type_flag: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..name.len()].copy_from_slice(name.as_bytes());
    octal(&mut block[100..108], 0o644);
    octal(&mut block[108..116], 1000);
    octal(&mut block[116..124], 1000);
    octal(&mut block[124..136], size);
    octal(&mut block[136..148], 1_600_000_000);
    block[156] = type_flag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[265..269].copy_from_slice(b"user");
    block[297..302].copy_from_slice(b"group");

    block[148..156].fill(b' ');
    let sum: u32 = block.iter().map(|&b| b as u32).sum();
    let text = format!("{:06o}\0 ", sum);
    block[148..156].copy_from_slice(text.as_bytes());
    block
}

pub fn tar_entry(name: &str, type_flag: u8, data: &[u8]) -> Vec<u8> {
    let mut out = tar_header(name, data.len() as u64, type_flag).to_vec();
    out.extend_from_slice(data);
    out.resize(out.len().div_ceil(512) * 512, 0);
    out
}

pub fn tar_end() -> Vec<u8> {
    vec![0u8; 1024]
}

/// newc (`070701`) or crc (`070702`) member, padded to 4 bytes.
pub fn cpio_newc(magic: &str, name: &str, mode: u32, data: &[u8], check: u32) -> Vec<u8> {
    let mut out = format!(
        "{}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
        magic,
        1,
        mode,
        0,
        0,
        1,
        1_600_000_000u32,
        data.len(),
        0,
        0,
        0,
        0,
        name.len() + 1,
        check
    )
    .into_bytes();
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.resize(out.len().div_ceil(4) * 4, 0);
    out.extend_from_slice(data);
    out.resize(out.len().div_ceil(4) * 4, 0);
    out
}

pub fn cpio_trailer(magic: &str) -> Vec<u8> {
    cpio_newc(magic, "TRAILER!!!", 0, &[], 0)
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub struct ZipLocal<'a> {
    pub name: &'a str,
    pub method: u16,
    pub flags: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub size: u32,
    pub extra: &'a [u8],
}

pub fn zip_local_header(h: &ZipLocal<'_>) -> Vec<u8> {
    let mut out = 0x0403_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&h.flags.to_le_bytes());
    out.extend_from_slice(&h.method.to_le_bytes());
    out.extend_from_slice(&0x6000u16.to_le_bytes()); // 12:00
    out.extend_from_slice(&0x5021u16.to_le_bytes()); // 2020-01-01
    out.extend_from_slice(&h.crc.to_le_bytes());
    out.extend_from_slice(&h.compressed_size.to_le_bytes());
    out.extend_from_slice(&h.size.to_le_bytes());
    out.extend_from_slice(&(h.name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(h.extra.len() as u16).to_le_bytes());
    out.extend_from_slice(h.name.as_bytes());
    out.extend_from_slice(h.extra);
    out
}

/// Complete local entry with sizes in the header.
pub fn zip_entry(name: &str, method: u16, content: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = zip_local_header(&ZipLocal {
        name,
        method,
        flags: 0,
        crc: crc32fast::hash(content),
        compressed_size: payload.len() as u32,
        size: content.len() as u32,
        extra: &[],
    });
    out.extend_from_slice(payload);
    out
}

pub fn data_descriptor(crc: u32, compressed_size: u32, size: u32) -> Vec<u8> {
    let mut out = 0x0807_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&compressed_size.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

/// Empty central directory end record.
pub fn zip_end() -> Vec<u8> {
    let mut out = 0x0605_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&[0u8; 18]);
    out
}

/// Deterministic text-like content.
pub fn sample_text(len: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}
