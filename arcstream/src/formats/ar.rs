//! Unix `ar` archives, including the BSD and GNU long name variants.
//!
//! Layout: the global signature `!<arch>\n`, then per entry a 60-byte ASCII
//! header (name 16, mtime 12, uid 6, gid 6, mode 8 octal, size 10, "`\n")
//! followed by the data padded to an even offset.
//!
//! - BSD stores long names as `#1/<len>`; the name is the first `len` bytes
//!   of the data and is not part of the entry size.
//! - GNU collects long names in a `//` entry and refers to them as
//!   `/<offset>`. Short GNU names end with `/`.

use std::any::Any;
use std::io::{self, Read};
use std::time::SystemTime;

use log::{debug, trace};

use crate::core::archive::{ArchiveEntry, ArchiveReader, EntryKind, Owner};
use crate::core::bytes::{parse_ascii_number, read_fully, skip};
use crate::core::charset::Charset;
use crate::core::dostime::unix_to_system_time;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};
use crate::stream::{BoundedReader, CountingReader, EntrySlot, EntryStream};

pub const AR_SIGNATURE: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;
const HEADER_TRAILER: &[u8; 2] = b"`\n";
const BSD_LONG_NAME_PREFIX: &str = "#1/";
const GNU_STRING_TABLE: &str = "//";

#[derive(Debug, Clone)]
pub struct ArArchiveEntry {
    name: String,
    size: u64,
    uid: u64,
    gid: u64,
    mode: u32,
    mtime: i64,
}

impl ArArchiveEntry {
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    /// Modification time in seconds since the epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }
}

impl ArchiveEntry for ArArchiveEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn kind(&self) -> EntryKind {
        EntryKind::File
    }

    fn last_modified(&self) -> Option<SystemTime> {
        unix_to_system_time(self.mtime)
    }

    fn mode(&self) -> Option<u32> {
        Some(self.mode)
    }

    fn owner(&self) -> Option<Owner> {
        Some(Owner {
            uid: Some(self.uid),
            gid: Some(self.gid),
            ..Owner::default()
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ArArchiveReader<R: Read> {
    slot: EntrySlot<CountingReader<R>>,
    /// Content of the GNU `//` entry.
    gnu_names: Option<Vec<u8>>,
    charset: Charset,
    memory_limit: MemoryLimit,
    finished: bool,
}

impl<R: Read> ArArchiveReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        let mut src = CountingReader::new(source);
        let mut signature = [0u8; 8];
        if read_fully(&mut src, &mut signature)? < signature.len() || &signature != AR_SIGNATURE {
            return Err(ArchiveError::corrupt_header(0, "missing ar signature"));
        }
        Ok(ArArchiveReader {
            slot: EntrySlot::new(src),
            gnu_names: None,
            charset: options.charset_or(Charset::Utf8),
            memory_limit: options.effective_memory_limit(),
            finished: false,
        })
    }

    pub fn matches(signature: &[u8]) -> bool {
        signature.starts_with(AR_SIGNATURE)
    }

    /// Resolve `/<offset>` against the GNU name table.
    fn gnu_long_name(&self, offset_field: &str, header_offset: u64) -> Result<String> {
        let table = self.gnu_names.as_deref().ok_or_else(|| {
            ArchiveError::corrupt_header(header_offset, "GNU long name without a name table")
        })?;
        let start = offset_field
            .parse::<usize>()
            .ok()
            .filter(|&start| start < table.len())
            .ok_or_else(|| {
                ArchiveError::corrupt_header(
                    header_offset,
                    format!("GNU long name offset {} outside the name table", offset_field),
                )
            })?;
        let rest = &table[start..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let name = &rest[..end];
        let name = name.strip_suffix(b"/").unwrap_or(name);
        Ok(self.charset.decode(name))
    }
}

struct RawHeader {
    offset: u64,
    name: String,
    mtime: i64,
    uid: u64,
    gid: u64,
    mode: u32,
    size: u64,
}

fn number(field: &[u8], radix: u32, what: &str, offset: u64) -> Result<u64> {
    parse_ascii_number(field, radix)
        .ok_or_else(|| ArchiveError::corrupt_header(offset, format!("invalid {} field", what)))
}

/// Read one 60-byte header, `None` at a clean end of the archive.
fn read_header<R: Read>(src: &mut CountingReader<R>) -> Result<Option<RawHeader>> {
    // Entries start at even offsets.
    if src.count() % 2 == 1 {
        skip(src, 1)?;
    }
    let offset = src.count();
    let mut header = [0u8; HEADER_LEN];
    match read_fully(src, &mut header)? {
        0 => return Ok(None),
        HEADER_LEN => {}
        n => {
            return Err(ArchiveError::corrupt_header(
                offset,
                format!("truncated ar header: {} of {} bytes", n, HEADER_LEN),
            ))
        }
    }
    if &header[58..60] != HEADER_TRAILER {
        return Err(ArchiveError::corrupt_header(offset + 58, "invalid ar header trailer"));
    }

    Ok(Some(RawHeader {
        offset,
        name: String::from_utf8_lossy(&header[0..16]).trim_end().to_string(),
        mtime: number(&header[16..28], 10, "mtime", offset + 16)? as i64,
        uid: number(&header[28..34], 10, "uid", offset + 28)?,
        gid: number(&header[34..40], 10, "gid", offset + 34)?,
        mode: number(&header[40..48], 8, "mode", offset + 40)? as u32,
        size: number(&header[48..58], 10, "size", offset + 48)?,
    }))
}

impl<R: Read> ArchiveReader for ArArchiveReader<R> {
    type Entry = ArArchiveEntry;

    fn next_entry(&mut self) -> Result<Option<ArArchiveEntry>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let src = self.slot.source()?;
            let Some(raw) = read_header(src)? else {
                self.finished = true;
                return Ok(None);
            };

            if raw.name == GNU_STRING_TABLE {
                let mut table = self.memory_limit.allocate(raw.size)?;
                if read_fully(src, &mut table)? < table.len() {
                    return Err(ArchiveError::TruncatedEntry {
                        entry: Some(GNU_STRING_TABLE.into()),
                        expected: raw.size,
                        actual: src.count() - raw.offset - HEADER_LEN as u64,
                    });
                }
                debug!("Read GNU ar name table ({} bytes)", table.len());
                self.gnu_names = Some(table);
                continue;
            }
            if raw.name == "/" || raw.name == "/SYM64/" {
                debug!("Skipping ar symbol table ({} bytes)", raw.size);
                skip(src, raw.size)?;
                continue;
            }

            let mut size = raw.size;
            let name = if let Some(len) = raw.name.strip_prefix(BSD_LONG_NAME_PREFIX) {
                let len = number(len.as_bytes(), 10, "BSD name length", raw.offset)?;
                if len > size {
                    return Err(ArchiveError::corrupt_header(
                        raw.offset,
                        format!("BSD name length {} exceeds entry size {}", len, size),
                    ));
                }
                let mut name = self.memory_limit.allocate(len)?;
                if read_fully(src, &mut name)? < name.len() {
                    return Err(ArchiveError::corrupt_header(
                        raw.offset + HEADER_LEN as u64,
                        "archive ends inside a BSD long name",
                    ));
                }
                size -= len;
                let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
                self.charset.decode(&name[..end])
            } else if let Some(offset) = raw.name.strip_prefix('/').filter(|s| !s.is_empty()) {
                self.gnu_long_name(offset, raw.offset)?
            } else {
                raw.name.strip_suffix('/').unwrap_or(&raw.name).to_string()
            };

            trace!("ar entry '{}' ({} bytes)", name, size);
            let guard_name = name.clone();
            self.slot.open(|src| {
                EntryStream::Plain(BoundedReader::new(src, size).truncation_guard(Some(guard_name)))
            })?;

            return Ok(Some(ArArchiveEntry {
                name,
                size,
                uid: raw.uid,
                gid: raw.gid,
                mode: raw.mode,
                mtime: raw.mtime,
            }));
        }
    }

    fn can_read_entry_data(&self, _entry: &ArArchiveEntry) -> bool {
        true
    }

    fn bytes_read(&self) -> u64 {
        self.slot.get_ref().map_or(0, CountingReader::count)
    }
}

impl<R: Read> Read for ArArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(name: &str, size: usize) -> Vec<u8> {
        let h = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            name, 1_600_000_000, 1000, 100, "100644", size
        );
        assert_eq!(h.len(), HEADER_LEN);
        h.into_bytes()
    }

    #[test]
    fn reads_plain_and_padded_entries() {
        let mut data = AR_SIGNATURE.to_vec();
        data.extend(header("odd.txt/", 3));
        data.extend(b"abc\n");
        data.extend(header("even.txt/", 2));
        data.extend(b"xy");

        let mut reader = ArArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name(), "odd.txt");
        assert_eq!(first.mode(), Some(0o100644));
        assert_eq!(first.uid(), 1000);
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name(), "even.txt");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn bsd_long_name() {
        let mut data = AR_SIGNATURE.to_vec();
        data.extend(header("#1/20", 24));
        data.extend(b"a_rather_long_name.o");
        data.extend(b"DATA");
        let mut reader = ArArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name(), "a_rather_long_name.o");
        assert_eq!(entry.size(), Some(4));
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"DATA");
    }

    #[test]
    fn gnu_long_names() {
        let table = b"first_long_file_name.o/\nsecond_long_file_name.o/\n";
        let mut data = AR_SIGNATURE.to_vec();
        data.extend(header("//", table.len()));
        data.extend(table);
        data.push(b'\n'); // table length is odd
        data.extend(header("/24", 1));
        data.extend(b"Z\n");
        let mut reader = ArArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name(), "second_long_file_name.o");
    }

    #[test]
    fn bad_trailer_is_corrupt() {
        let mut data = AR_SIGNATURE.to_vec();
        let mut h = header("x", 0);
        h[59] = b'!';
        data.extend(h);
        let mut reader = ArArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(ArchiveError::CorruptHeader { offset: 66, .. })
        ));
    }
}
