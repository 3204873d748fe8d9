//! cpio archives in all four header flavours.
//!
//! | magic | format | header | numbers | alignment |
//! |---|---|---|---|---|
//! | `070701` | new ASCII | 110 bytes | hex | 4 |
//! | `070702` | new ASCII + checksum | 110 bytes | hex | 4 |
//! | `070707` | old ASCII (odc) | 76 bytes | octal | 1 |
//! | `0x71C7` | old binary | 26 bytes | u16, either byte order | 2 |
//!
//! The archive ends at the entry named `TRAILER!!!`.

use std::any::Any;
use std::io::{self, Read};
use std::time::SystemTime;

use log::trace;

use crate::core::archive::{directory_name, ArchiveEntry, ArchiveReader, EntryKind, Owner};
use crate::core::bytes::{parse_ascii_number, read_fully, skip};
use crate::core::charset::Charset;
use crate::core::dostime::unix_to_system_time;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};
use crate::stream::{BoundedReader, ByteSum, ChecksumVerifier, CountingReader, EntrySlot, EntryStream};

pub const MAGIC_NEW: &[u8; 6] = b"070701";
pub const MAGIC_NEW_CRC: &[u8; 6] = b"070702";
pub const MAGIC_OLD_ASCII: &[u8; 6] = b"070707";
pub const MAGIC_OLD_BINARY: u16 = 0o070707;
pub const TRAILER: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpioFormat {
    New,
    NewCrc,
    OldAscii,
    OldBinary { big_endian: bool },
}

impl CpioFormat {
    fn alignment(self) -> u64 {
        match self {
            CpioFormat::New | CpioFormat::NewCrc => 4,
            CpioFormat::OldAscii => 1,
            CpioFormat::OldBinary { .. } => 2,
        }
    }

    fn detect(magic: &[u8]) -> Option<Self> {
        if magic.len() >= 6 {
            match &magic[..6] {
                m if m == MAGIC_NEW => return Some(CpioFormat::New),
                m if m == MAGIC_NEW_CRC => return Some(CpioFormat::NewCrc),
                m if m == MAGIC_OLD_ASCII => return Some(CpioFormat::OldAscii),
                _ => {}
            }
        }
        if magic.len() >= 2 {
            if u16::from_le_bytes([magic[0], magic[1]]) == MAGIC_OLD_BINARY {
                return Some(CpioFormat::OldBinary { big_endian: false });
            }
            if u16::from_be_bytes([magic[0], magic[1]]) == MAGIC_OLD_BINARY {
                return Some(CpioFormat::OldBinary { big_endian: true });
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct CpioArchiveEntry {
    format: CpioFormat,
    name: String,
    size: u64,
    mode: u32,
    uid: u64,
    gid: u64,
    nlink: u64,
    mtime: i64,
    inode: u64,
    device: (u64, u64),
    rdev: (u64, u64),
    checksum: u32,
}

impl CpioArchiveEntry {
    pub fn format(&self) -> CpioFormat {
        self.format
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn nlink(&self) -> u64 {
        self.nlink
    }

    /// Device (major, minor) holding the original file. Old formats only
    /// record a combined number, returned as the major part.
    pub fn device(&self) -> (u64, u64) {
        self.device
    }

    pub fn rdev(&self) -> (u64, u64) {
        self.rdev
    }

    /// Byte-sum checksum, only meaningful for the `070702` format.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

impl ArchiveEntry for CpioArchiveEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn kind(&self) -> EntryKind {
        match self.mode & S_IFMT {
            S_IFDIR => EntryKind::Directory,
            S_IFLNK => EntryKind::Symlink,
            S_IFCHR => EntryKind::CharDevice,
            S_IFBLK => EntryKind::BlockDevice,
            S_IFIFO => EntryKind::Fifo,
            S_IFREG => EntryKind::File,
            S_IFSOCK => EntryKind::Other,
            _ => EntryKind::Other,
        }
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

pub struct CpioArchiveReader<R: Read> {
    slot: EntrySlot<CountingReader<R>>,
    charset: Charset,
    memory_limit: MemoryLimit,
    /// Bytes of padding owed after the current entry's data.
    pending_padding: u64,
    finished: bool,
}

impl<R: Read> CpioArchiveReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        Ok(CpioArchiveReader {
            slot: EntrySlot::new(CountingReader::new(source)),
            charset: options.charset_or(Charset::Utf8),
            memory_limit: options.effective_memory_limit(),
            pending_padding: 0,
            finished: false,
        })
    }

    pub fn matches(signature: &[u8]) -> bool {
        CpioFormat::detect(signature).is_some()
    }
}

struct RawHeader {
    format: CpioFormat,
    mode: u32,
    uid: u64,
    gid: u64,
    nlink: u64,
    mtime: i64,
    inode: u64,
    device: (u64, u64),
    rdev: (u64, u64),
    name_size: u64,
    size: u64,
    checksum: u32,
}

fn padding(position: u64, alignment: u64) -> u64 {
    (alignment - position % alignment) % alignment
}

fn read_exact_or_corrupt<R: Read>(src: &mut CountingReader<R>, buf: &mut [u8], what: &str) -> Result<()> {
    let offset = src.count();
    if read_fully(src, buf)? < buf.len() {
        return Err(ArchiveError::corrupt_header(offset, format!("archive ends inside {}", what)));
    }
    Ok(())
}

fn ascii_fields(fields: &[u8], widths: &[usize], radix: u32, offset: u64) -> Result<Vec<u64>> {
    let mut values = Vec::with_capacity(widths.len());
    let mut pos = 0;
    for &width in widths {
        let field = &fields[pos..pos + width];
        let value = parse_ascii_number(field, radix).ok_or_else(|| {
            ArchiveError::corrupt_header(
                offset + pos as u64,
                format!("invalid cpio number {:?}", String::from_utf8_lossy(field)),
            )
        })?;
        values.push(value);
        pos += width;
    }
    Ok(values)
}

fn read_header<R: Read>(src: &mut CountingReader<R>) -> Result<RawHeader> {
    let offset = src.count();
    let mut magic = [0u8; 6];
    read_exact_or_corrupt(src, &mut magic[..2], "a cpio magic")?;
    let binary = CpioFormat::detect(&magic[..2]);
    let format = match binary {
        Some(format) => format,
        None => {
            read_exact_or_corrupt(src, &mut magic[2..], "a cpio magic")?;
            CpioFormat::detect(&magic).ok_or_else(|| {
                ArchiveError::corrupt_header(
                    offset,
                    format!("unknown cpio magic {:?}", String::from_utf8_lossy(&magic)),
                )
            })?
        }
    };

    match format {
        CpioFormat::New | CpioFormat::NewCrc => {
            let mut fields = [0u8; 104];
            read_exact_or_corrupt(src, &mut fields, "a cpio header")?;
            let v = ascii_fields(&fields, &[8; 13], 16, offset + 6)?;
            Ok(RawHeader {
                format,
                inode: v[0],
                mode: v[1] as u32,
                uid: v[2],
                gid: v[3],
                nlink: v[4],
                mtime: v[5] as i64,
                size: v[6],
                device: (v[7], v[8]),
                rdev: (v[9], v[10]),
                name_size: v[11],
                checksum: v[12] as u32,
            })
        }
        CpioFormat::OldAscii => {
            let mut fields = [0u8; 70];
            read_exact_or_corrupt(src, &mut fields, "a cpio header")?;
            let v = ascii_fields(&fields, &[6, 6, 6, 6, 6, 6, 6, 11, 6, 11], 8, offset + 6)?;
            Ok(RawHeader {
                format,
                device: (v[0], 0),
                inode: v[1],
                mode: v[2] as u32,
                uid: v[3],
                gid: v[4],
                nlink: v[5],
                rdev: (v[6], 0),
                mtime: v[7] as i64,
                name_size: v[8],
                size: v[9],
                checksum: 0,
            })
        }
        CpioFormat::OldBinary { big_endian } => {
            let mut fields = [0u8; 24];
            read_exact_or_corrupt(src, &mut fields, "a cpio header")?;
            let word = |i: usize| -> u64 {
                let pair = [fields[i * 2], fields[i * 2 + 1]];
                if big_endian {
                    u16::from_be_bytes(pair) as u64
                } else {
                    u16::from_le_bytes(pair) as u64
                }
            };
            // 32-bit values are stored as two words, most significant first.
            let long = |i: usize| (word(i) << 16) | word(i + 1);
            Ok(RawHeader {
                format,
                device: (word(0), 0),
                inode: word(1),
                mode: word(2) as u32,
                uid: word(3),
                gid: word(4),
                nlink: word(5),
                rdev: (word(6), 0),
                mtime: long(7) as i64,
                name_size: word(9),
                size: long(10),
                checksum: 0,
            })
        }
    }
}

impl<R: Read> ArchiveReader for CpioArchiveReader<R> {
    type Entry = CpioArchiveEntry;

    fn next_entry(&mut self) -> Result<Option<CpioArchiveEntry>> {
        if self.finished {
            return Ok(None);
        }
        let src = self.slot.source()?;
        skip(src, self.pending_padding)?;
        self.pending_padding = 0;

        let header = read_header(src)?;
        let alignment = header.format.alignment();
        if header.name_size == 0 {
            return Err(ArchiveError::corrupt_header(src.count(), "cpio entry without a name"));
        }
        let mut name = self.memory_limit.allocate(header.name_size)?;
        read_exact_or_corrupt(src, &mut name, "a cpio name")?;
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = self.charset.decode(&name[..end]);
        skip(src, padding(src.count(), alignment))?;

        if name == TRAILER {
            trace!("cpio trailer at offset {}", src.count());
            self.finished = true;
            return Ok(None);
        }

        let size = header.size;
        self.pending_padding = padding(src.count() + size, alignment);
        let entry = CpioArchiveEntry {
            format: header.format,
            name: directory_name(name, header.mode & S_IFMT == S_IFDIR),
            size,
            mode: header.mode,
            uid: header.uid,
            gid: header.gid,
            nlink: header.nlink,
            mtime: header.mtime,
            inode: header.inode,
            device: header.device,
            rdev: header.rdev,
            checksum: header.checksum,
        };
        trace!("cpio entry '{}' ({:?}, {} bytes)", entry.name, entry.format, size);

        let entry_name = entry.name.clone();
        let checksum = entry.checksum;
        let verify = entry.format == CpioFormat::NewCrc;
        self.slot.open(|src| {
            let bounded = BoundedReader::new(src, size).truncation_guard(Some(entry_name.clone()));
            if verify {
                EntryStream::Verified(
                    ChecksumVerifier::new(bounded, ByteSum::new(), size, checksum).for_entry(entry_name),
                )
            } else {
                EntryStream::Plain(bounded)
            }
        })?;
        Ok(Some(entry))
    }

    fn can_read_entry_data(&self, _entry: &CpioArchiveEntry) -> bool {
        true
    }

    fn bytes_read(&self) -> u64 {
        self.slot.get_ref().map_or(0, CountingReader::count)
    }
}

impl<R: Read> Read for CpioArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn newc(magic: &[u8; 6], name: &str, mode: u32, data: &[u8], check: u32) -> Vec<u8> {
        let mut out = magic.to_vec();
        let fields = [1, mode, 0, 0, 1, 1_600_000_000, data.len() as u32, 0, 0, 0, 0, name.len() as u32 + 1, check];
        for f in fields {
            out.extend(format!("{:08X}", f).into_bytes());
        }
        out.extend(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn newc_entries_and_trailer() {
        let mut data = newc(MAGIC_NEW, "dir", 0o040755, b"", 0);
        data.extend(newc(MAGIC_NEW, "dir/file.txt", 0o100644, b"hello", 0));
        data.extend(newc(MAGIC_NEW, TRAILER, 0, b"", 0));

        let mut reader = CpioArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        let dir = reader.next_entry().unwrap().unwrap();
        assert_eq!(dir.name(), "dir/");
        assert!(dir.is_directory());

        let file = reader.next_entry().unwrap().unwrap();
        assert_eq!(file.name(), "dir/file.txt");
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn crc_format_verifies_byte_sum() {
        let body = b"checked";
        let sum: u32 = body.iter().map(|&b| b as u32).sum();
        let mut data = newc(MAGIC_NEW_CRC, "a", 0o100644, body, sum);
        data.extend(newc(MAGIC_NEW_CRC, "b", 0o100644, body, sum + 1));
        data.extend(newc(MAGIC_NEW_CRC, TRAILER, 0, b"", 0));

        let mut reader = CpioArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        reader.next_entry().unwrap().unwrap();
        reader.read_to_end(&mut Vec::new()).unwrap();

        reader.next_entry().unwrap().unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(ArchiveError::from(err), ArchiveError::ChecksumMismatch { .. }));
    }

    #[test]
    fn old_binary_both_byte_orders() {
        for big_endian in [false, true] {
            let words: [u16; 13] = [MAGIC_OLD_BINARY, 0, 7, 0o100600, 0, 0, 1, 0, 0x5F5E, 0x1000, 2, 0, 3];
            let mut data = Vec::new();
            for w in words {
                data.extend(if big_endian { w.to_be_bytes() } else { w.to_le_bytes() });
            }
            data.extend(b"x\0abc\0");
            let mut reader = CpioArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
            let entry = reader.next_entry().unwrap().unwrap();
            assert_eq!(entry.format(), CpioFormat::OldBinary { big_endian });
            assert_eq!(entry.name(), "x");
            assert_eq!(entry.inode(), 7);
            assert_eq!(entry.mtime, 0x5F5E_1000);
            let mut content = Vec::new();
            reader.read_to_end(&mut content).unwrap();
            assert_eq!(content, b"abc");
        }
    }

    #[test]
    fn odc_header() {
        let mut data = MAGIC_OLD_ASCII.to_vec();
        data.extend(b"0000000000111006440000000000000000010000001372741000000000400000000002");
        data.extend(b"a.b\0hi");
        let mut reader = CpioArchiveReader::new(Cursor::new(data), ReadOptions::default()).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name(), "a.b");
        assert_eq!(entry.mode(), Some(0o100644));
        assert_eq!(entry.size(), Some(2));
    }
}
