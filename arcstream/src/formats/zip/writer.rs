//! Minimal ZIP writer taking already compressed entries.
//!
//! Each entry is written as a local header followed by its raw compressed
//! bytes; `finish` appends the central directory and the end record. Sizes
//! and CRC must be known up front, so no data descriptors are written.

use std::io::{self, Read, Write};

use log::debug;

use crate::core::charset::Charset;
use crate::error::{ArchiveError, Feature, Result};
use crate::formats::zip::constants::*;
use crate::formats::zip::entry::ZipArchiveEntry;

const MAX_ENTRIES: usize = 0xffff;
const DIRECTORY_ATTRIBUTE: u32 = 0x10;

struct CentralRecord {
    entry: ZipArchiveEntry,
    name: Vec<u8>,
    local_header_offset: u64,
}

pub struct ZipArchiveWriter<W: Write> {
    writer: W,
    offset: u64,
    records: Vec<CentralRecord>,
}

fn invalid_entry(reason: String) -> ArchiveError {
    ArchiveError::Io(io::Error::new(io::ErrorKind::InvalidInput, reason))
}

fn fits_u32(value: u64, entry: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v != ZIP64_MAGIC)
        .ok_or_else(|| ArchiveError::unsupported_feature(Some(entry), Feature::Zip64Output))
}

fn version_needed(method: ZipMethod) -> u16 {
    match method {
        ZipMethod::Stored => VERSION_STORED,
        _ => VERSION_DEFLATED,
    }
}

impl<W: Write> ZipArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        ZipArchiveWriter {
            writer,
            offset: 0,
            records: Vec::new(),
        }
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Write `entry` with its compressed content taken from `raw`. The entry
    /// must carry CRC and both sizes; exactly `compressed_size` bytes are
    /// copied.
    pub fn add_raw_entry(&mut self, entry: &ZipArchiveEntry, raw: &mut dyn Read) -> Result<()> {
        let (Some(crc), Some(compressed_size), Some(size)) = (entry.crc, entry.compressed_size, entry.size)
        else {
            return Err(invalid_entry(format!(
                "entry '{}' needs CRC and sizes before it can be written raw",
                entry.name
            )));
        };
        if self.records.len() >= MAX_ENTRIES {
            return Err(ArchiveError::unsupported_feature(Some(&entry.name), Feature::Zip64Output));
        }
        let compressed32 = fits_u32(compressed_size, &entry.name)?;
        let size32 = fits_u32(size, &entry.name)?;
        fits_u32(self.offset, &entry.name)?;

        let name = Charset::Utf8.encode(&entry.name);
        let name_len = u16::try_from(name.len())
            .map_err(|_| invalid_entry(format!("entry name of {} bytes is too long", name.len())))?;

        let mut header = Vec::with_capacity(30 + name.len());
        header.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&version_needed(entry.method).to_le_bytes());
        header.extend_from_slice(&flags::UTF8_NAMES.to_le_bytes());
        header.extend_from_slice(&entry.method.code().to_le_bytes());
        header.extend_from_slice(&entry.dos_time.time().to_le_bytes());
        header.extend_from_slice(&entry.dos_time.date().to_le_bytes());
        header.extend_from_slice(&crc.to_le_bytes());
        header.extend_from_slice(&compressed32.to_le_bytes());
        header.extend_from_slice(&size32.to_le_bytes());
        header.extend_from_slice(&name_len.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&name);

        let local_header_offset = self.offset;
        self.write(&header)?;

        let copied = io::copy(&mut raw.take(compressed_size), &mut self.writer)?;
        self.offset += copied;
        if copied != compressed_size {
            return Err(ArchiveError::TruncatedEntry {
                entry: Some(entry.name.clone()),
                expected: compressed_size,
                actual: copied,
            });
        }

        self.records.push(CentralRecord {
            entry: entry.clone(),
            name,
            local_header_offset,
        });
        Ok(())
    }

    /// Write the central directory and end record, returns the sink.
    pub fn finish(mut self) -> Result<W> {
        let directory_offset = self.offset;
        let records = std::mem::take(&mut self.records);
        for record in &records {
            let entry = &record.entry;
            let version_made_by = if entry.mode.is_some() {
                (PLATFORM_UNIX << 8) | VERSION_DEFLATED
            } else {
                VERSION_DEFLATED
            };
            let mut external = entry.mode.map_or(0, |mode| mode << 16);
            if entry.name.ends_with('/') {
                external |= DIRECTORY_ATTRIBUTE;
            }

            let mut header = Vec::with_capacity(46 + record.name.len());
            header.extend_from_slice(&CENTRAL_FILE_HEADER_SIG.to_le_bytes());
            header.extend_from_slice(&version_made_by.to_le_bytes());
            header.extend_from_slice(&version_needed(entry.method).to_le_bytes());
            header.extend_from_slice(&flags::UTF8_NAMES.to_le_bytes());
            header.extend_from_slice(&entry.method.code().to_le_bytes());
            header.extend_from_slice(&entry.dos_time.time().to_le_bytes());
            header.extend_from_slice(&entry.dos_time.date().to_le_bytes());
            header.extend_from_slice(&entry.crc.unwrap_or(0).to_le_bytes());
            header.extend_from_slice(&(entry.compressed_size.unwrap_or(0) as u32).to_le_bytes());
            header.extend_from_slice(&(entry.size.unwrap_or(0) as u32).to_le_bytes());
            header.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes()); // extra
            header.extend_from_slice(&0u16.to_le_bytes()); // comment
            header.extend_from_slice(&0u16.to_le_bytes()); // disk
            header.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
            header.extend_from_slice(&external.to_le_bytes());
            header.extend_from_slice(&(record.local_header_offset as u32).to_le_bytes());
            header.extend_from_slice(&record.name);
            self.write(&header)?;
        }

        let directory_size = self.offset - directory_offset;
        let directory_offset32 = fits_u32(directory_offset, "central directory")?;
        let directory_size32 = fits_u32(directory_size, "central directory")?;
        let count = records.len() as u16;

        let mut end = Vec::with_capacity(22);
        end.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        end.extend_from_slice(&0u16.to_le_bytes());
        end.extend_from_slice(&0u16.to_le_bytes());
        end.extend_from_slice(&count.to_le_bytes());
        end.extend_from_slice(&count.to_le_bytes());
        end.extend_from_slice(&directory_size32.to_le_bytes());
        end.extend_from_slice(&directory_offset32.to_le_bytes());
        end.extend_from_slice(&0u16.to_le_bytes());
        self.write(&end)?;
        self.writer.flush()?;

        debug!("ZIP archive finished: {} entries, {} bytes", count, self.offset);
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::{ArchiveEntry, ArchiveReader};
    use crate::core::options::ReadOptions;
    use crate::formats::zip::reader::ZipArchiveReader;

    #[test]
    fn written_archive_reads_back() {
        let content = b"stored content";
        let mut entry = ZipArchiveEntry::new("dir/file.txt")
            .with_method(ZipMethod::Stored)
            .with_mode(0o100644);
        entry.set_sizes(crc32fast::hash(content), content.len() as u64, content.len() as u64);

        let mut writer = ZipArchiveWriter::new(Vec::new());
        writer.add_raw_entry(&entry, &mut &content[..]).unwrap();
        let archive = writer.finish().unwrap();

        let mut reader = ZipArchiveReader::new(&archive[..], ReadOptions::default()).unwrap();
        let read = reader.next_entry().unwrap().unwrap();
        assert_eq!(read.name(), "dir/file.txt");
        assert!(read.has_utf8_name());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, content);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn raw_entry_needs_sizes() {
        let mut writer = ZipArchiveWriter::new(Vec::new());
        let entry = ZipArchiveEntry::new("x");
        assert!(writer.add_raw_entry(&entry, &mut io::empty()).is_err());
    }

    #[test]
    fn short_raw_content() {
        let mut entry = ZipArchiveEntry::new("x").with_method(ZipMethod::Stored);
        entry.set_sizes(0, 10, 10);
        let mut writer = ZipArchiveWriter::new(Vec::new());
        assert!(matches!(
            writer.add_raw_entry(&entry, &mut &b"12345"[..]),
            Err(ArchiveError::TruncatedEntry { expected: 10, actual: 5, .. })
        ));
    }
}
