//! ARJ header codec.
//!
//! Every header starts with `60 EA`, a u16 basic header size and the basic
//! header itself followed by its CRC-32. The basic header opens with the
//! "first header" (fixed fields, its own size in the first byte) followed by
//! the NUL-terminated name and comment. After the CRC comes a chain of
//! extended headers, each `u16 size, bytes, u32 CRC-32`, closed by size 0.

use std::io::{self, Read};

use log::{debug, trace};

use crate::core::bytes::{read_fully, HeaderCursor, LeInt};
use crate::core::charset::Charset;
use crate::core::memory::MemoryLimit;
use crate::error::{ArchiveError, Result};
use crate::formats::arj::constants::*;
use crate::stream::CountingReader;

/// Verified basic header bytes and where they started.
#[derive(Debug)]
pub(crate) struct BasicHeader {
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MainHeader {
    pub archiver_version: u8,
    pub min_version_to_extract: u8,
    pub host_os: HostOs,
    pub flags: u8,
    pub security_version: u8,
    pub file_type: FileType,
    pub created: u32,
    pub modified: u32,
    pub archive_size: u64,
    pub security_envelope_position: u32,
    pub file_spec_position: u16,
    pub security_envelope_length: u16,
    pub encryption_version: u8,
    pub last_chapter: u8,
    pub protection_factor: Option<u8>,
    pub flags2: Option<u8>,
    pub name: String,
    pub comment: String,
    pub extended_headers: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub archiver_version: u8,
    pub min_version_to_extract: u8,
    pub host_os: HostOs,
    pub flags: u8,
    pub method: Method,
    pub file_type: FileType,
    pub modified: u32,
    pub compressed_size: u64,
    pub original_size: u64,
    pub original_crc32: u32,
    pub file_spec_position: u16,
    pub file_access_mode: u16,
    pub first_chapter: u8,
    pub last_chapter: u8,
    pub extended_file_position: Option<u32>,
    pub accessed: Option<u32>,
    pub created: Option<u32>,
    pub original_size_even_for_volumes: Option<u64>,
    pub name: String,
    pub comment: String,
    pub extended_headers: Vec<Vec<u8>>,
}

fn read_field<T: LeInt, R: Read>(src: &mut CountingReader<R>, what: &str) -> Result<T> {
    let offset = src.count();
    T::read_le(src).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            ArchiveError::corrupt_header(offset, format!("archive ends inside {}", what))
        }
        _ => e.into(),
    })
}

fn read_block<R: Read>(src: &mut CountingReader<R>, buf: &mut [u8], what: &str) -> Result<()> {
    let offset = src.count();
    if read_fully(src, buf)? < buf.len() {
        return Err(ArchiveError::corrupt_header(
            offset,
            format!("archive ends inside {}", what),
        ));
    }
    Ok(())
}

/// Read the header at the current position. `None` marks the end-of-archive
/// header (size 0) or a source that ends cleanly on a header boundary.
pub(crate) fn read_basic_header<R: Read>(src: &mut CountingReader<R>) -> Result<Option<BasicHeader>> {
    let offset = src.count();
    let mut magic = [0u8; 2];
    match read_fully(src, &mut magic)? {
        0 => {
            debug!("ARJ source ended at offset {} without an end-of-archive header", offset);
            return Ok(None);
        }
        2 if magic == ARJ_MAGIC => {}
        _ => {
            return Err(ArchiveError::corrupt_header(
                offset,
                format!("expected ARJ signature, found {:02x?}", magic),
            ))
        }
    }

    let size: u16 = read_field(src, "a basic header size")?;
    if size == 0 {
        trace!("ARJ end-of-archive header at offset {}", offset);
        return Ok(None);
    }
    if size > MAX_BASIC_HEADER_SIZE {
        return Err(ArchiveError::corrupt_header(
            offset + 2,
            format!("basic header size {} exceeds {}", size, MAX_BASIC_HEADER_SIZE),
        ));
    }

    let mut data = vec![0u8; size as usize];
    read_block(src, &mut data, "a basic header")?;
    let expected: u32 = read_field(src, "a basic header CRC")?;
    let actual = crc32fast::hash(&data);
    if expected != actual {
        return Err(ArchiveError::corrupt_header(
            offset,
            format!(
                "basic header CRC mismatch: stored {:#010x}, computed {:#010x}",
                expected, actual
            ),
        ));
    }
    Ok(Some(BasicHeader { offset, data }))
}

/// Scan forward for the first plausible header, skipping an SFX stub.
///
/// A candidate whose size is out of range or whose CRC does not match is
/// skipped and the scan resumes after the bytes it consumed; the scan never
/// backtracks, so a real header overlapping a rejected candidate is missed.
pub(crate) fn scan_basic_header<R: Read>(src: &mut CountingReader<R>) -> Result<Option<BasicHeader>> {
    let mut prev: Option<u8> = None;
    let mut byte = [0u8; 1];
    loop {
        if read_fully(src, &mut byte)? == 0 {
            return Ok(None);
        }
        if prev != Some(ARJ_MAGIC[0]) || byte[0] != ARJ_MAGIC[1] {
            prev = Some(byte[0]);
            continue;
        }
        prev = None;

        let offset = src.count() - 2;
        let mut size = [0u8; 2];
        if read_fully(src, &mut size)? < 2 {
            return Ok(None);
        }
        let size = u16::from_le_bytes(size);
        if size == 0 || size > MAX_BASIC_HEADER_SIZE {
            debug!("Skipping ARJ header candidate at offset {}: size {}", offset, size);
            continue;
        }

        let mut data = vec![0u8; size as usize];
        let mut crc = [0u8; 4];
        if read_fully(src, &mut data)? < data.len() || read_fully(src, &mut crc)? < 4 {
            return Ok(None);
        }
        if crc32fast::hash(&data) == u32::from_le_bytes(crc) {
            debug!("Found ARJ main header at offset {}", offset);
            return Ok(Some(BasicHeader { offset, data }));
        }
        debug!("Skipping ARJ header candidate at offset {}: CRC mismatch", offset);
    }
}

/// Read the extended header chain that follows every basic header.
pub(crate) fn read_extended_headers<R: Read>(
    src: &mut CountingReader<R>,
    limit: MemoryLimit,
) -> Result<Vec<Vec<u8>>> {
    let mut headers = Vec::new();
    loop {
        let offset = src.count();
        let size: u16 = read_field(src, "an extended header size")?;
        if size == 0 {
            return Ok(headers);
        }
        let mut data = limit.allocate(size as u64)?;
        read_block(src, &mut data, "an extended header")?;
        let expected: u32 = read_field(src, "an extended header CRC")?;
        if crc32fast::hash(&data) != expected {
            return Err(ArchiveError::corrupt_header(
                offset,
                "extended header CRC32 verification failure",
            ));
        }
        headers.push(data);
    }
}

/// Split a basic header into its first-header cursor and the cursor over
/// the trailing name and comment.
fn first_header<'a>(
    basic: &'a BasicHeader,
    min_size: u8,
) -> Result<(u8, HeaderCursor<'a>, HeaderCursor<'a>)> {
    // Basic header bytes start after the magic and the size field.
    let base = basic.offset + 4;
    let mut outer = HeaderCursor::new(&basic.data, base);
    let first_size = outer.u8()?;
    if first_size < min_size {
        return Err(ArchiveError::corrupt_header(
            base,
            format!("first header size {} is below the minimum {}", first_size, min_size),
        ));
    }
    let first = HeaderCursor::new(outer.take(first_size as usize - 1)?, base + 1);
    Ok((first_size, first, outer))
}

impl MainHeader {
    pub(crate) fn parse(basic: &BasicHeader, charset: Charset) -> Result<Self> {
        let (first_size, mut h, mut rest) = first_header(basic, MAIN_FIRST_HEADER_BASE)?;

        let archiver_version = h.u8()?;
        let min_version_to_extract = h.u8()?;
        let host_os = HostOs::from(h.u8()?);
        let flags = h.u8()?;
        let security_version = h.u8()?;
        let file_type = FileType::from(h.u8()?);
        let _reserved = h.u8()?;
        let created = h.u32()?;
        let modified = h.u32()?;
        let archive_size = h.u32()? as u64;
        let security_envelope_position = h.u32()?;
        let file_spec_position = h.u16()?;
        let security_envelope_length = h.u16()?;
        let encryption_version = h.u8()?;
        let last_chapter = h.u8()?;

        let (protection_factor, flags2) = if first_size >= MAIN_FIRST_HEADER_WITH_PROTECTION {
            let protection = h.u8()?;
            let flags2 = h.u8()?;
            (Some(protection), Some(flags2))
        } else {
            (None, None)
        };

        let name = rest.cstr(charset);
        let comment = rest.cstr(charset);

        Ok(MainHeader {
            archiver_version,
            min_version_to_extract,
            host_os,
            flags,
            security_version,
            file_type,
            created,
            modified,
            archive_size,
            security_envelope_position,
            file_spec_position,
            security_envelope_length,
            encryption_version,
            last_chapter,
            protection_factor,
            flags2,
            name,
            comment,
            extended_headers: Vec::new(),
        })
    }
}

impl LocalFileHeader {
    pub(crate) fn parse(basic: &BasicHeader, charset: Charset) -> Result<Self> {
        let (first_size, mut h, mut rest) = first_header(basic, LOCAL_FIRST_HEADER_BASE)?;

        let archiver_version = h.u8()?;
        let min_version_to_extract = h.u8()?;
        let host_os = HostOs::from(h.u8()?);
        let flags = h.u8()?;
        let method = Method::from(h.u8()?);
        let file_type = FileType::from(h.u8()?);
        let _reserved = h.u8()?;
        let modified = h.u32()?;
        let compressed_size = h.u32()? as u64;
        let original_size = h.u32()? as u64;
        let original_crc32 = h.u32()?;
        let file_spec_position = h.u16()?;
        let file_access_mode = h.u16()?;
        let first_chapter = h.u8()?;
        let last_chapter = h.u8()?;

        let mut extended_file_position = None;
        let mut accessed = None;
        let mut created = None;
        let mut original_size_even_for_volumes = None;
        if first_size >= LOCAL_FIRST_HEADER_WITH_EXT_POSITION {
            extended_file_position = Some(h.u32()?);
            if first_size >= LOCAL_FIRST_HEADER_WITH_TIMES {
                accessed = Some(h.u32()?);
                created = Some(h.u32()?);
                original_size_even_for_volumes = Some(h.u32()? as u64);
            }
        }

        let name = rest.cstr(charset);
        let comment = rest.cstr(charset);

        Ok(LocalFileHeader {
            archiver_version,
            min_version_to_extract,
            host_os,
            flags,
            method,
            file_type,
            modified,
            compressed_size,
            original_size,
            original_crc32,
            file_spec_position,
            file_access_mode,
            first_chapter,
            last_chapter,
            extended_file_position,
            accessed,
            created,
            original_size_even_for_volumes,
            name,
            comment,
            extended_headers: Vec::new(),
        })
    }
}
