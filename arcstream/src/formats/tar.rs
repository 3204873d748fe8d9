//! tar archives: v7, ustar, GNU and POSIX (PAX).
//!
//! # Invariants
//! - Every header block is checksum-verified before any field is trusted.
//! - Entry data is bounded by the stored size and padded to 512 bytes.
//! - GNU `L`/`K` and PAX `x` headers apply to the next entry only; PAX `g`
//!   headers apply to every later entry unless a per-file record overrides
//!   them.
//! - Sparse entries are listed but their data is refused.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::time::SystemTime;

use log::{debug, trace};

use crate::core::archive::{directory_name, ArchiveEntry, ArchiveReader, EntryKind, Owner};
use crate::core::bytes::{read_fully, skip};
use crate::core::charset::Charset;
use crate::core::dostime::unix_to_system_time;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Feature, Result};
use crate::stream::{BoundedReader, CountingReader, EntrySlot, EntryStream};

pub const BLOCK_LEN: usize = 512;
const MAGIC_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
const GNU_MAGIC: &[u8; 8] = b"ustar  \0";
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

#[derive(Debug, Clone)]
pub struct TarArchiveEntry {
    name: String,
    link_name: Option<String>,
    kind: EntryKind,
    type_flag: u8,
    size: u64,
    stored_size: u64,
    mode: u32,
    owner: Owner,
    mtime: i64,
    device: (u64, u64),
    sparse: bool,
    pax_headers: BTreeMap<String, String>,
}

impl TarArchiveEntry {
    pub fn link_name(&self) -> Option<&str> {
        self.link_name.as_deref()
    }

    pub fn type_flag(&self) -> u8 {
        self.type_flag
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Seconds since the epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn device(&self) -> (u64, u64) {
        self.device
    }

    /// Bytes occupied in the archive, which differs from the size for
    /// sparse entries.
    pub fn stored_size(&self) -> u64 {
        self.stored_size
    }

    /// PAX records that applied to this entry, global ones included.
    pub fn pax_headers(&self) -> &BTreeMap<String, String> {
        &self.pax_headers
    }
}

impl ArchiveEntry for TarArchiveEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn kind(&self) -> EntryKind {
        self.kind
    }

    fn last_modified(&self) -> Option<SystemTime> {
        unix_to_system_time(self.mtime)
    }

    fn mode(&self) -> Option<u32> {
        Some(self.mode)
    }

    fn owner(&self) -> Option<Owner> {
        Some(self.owner.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parse a numeric header field: octal text, or GNU base-256 when the high
/// bit of the first byte is set.
pub fn parse_number(field: &[u8]) -> Option<i64> {
    let first = *field.first()?;
    if first & 0x80 != 0 {
        if first & 0x40 != 0 {
            return Some(negative_base256(field));
        }
        let mut value = (first & 0x7f) as i64;
        for &b in &field[1..] {
            value = value.checked_mul(256)?.checked_add(b as i64)?;
        }
        return Some(value);
    }

    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = std::str::from_utf8(&field[..end]).ok()?.trim();
    if text.is_empty() {
        return Some(0);
    }
    i64::from_str_radix(text, 8).ok()
}

/// Two's complement base-256 value, sign-extended from the first byte.
fn negative_base256(field: &[u8]) -> i64 {
    let mut value: i64 = -1;
    for (i, &b) in field.iter().enumerate() {
        let b = if i == 0 { b | 0x80 } else { b };
        value = value.wrapping_shl(8) | b as i64;
    }
    value
}

/// Sum of the header with the checksum field counted as spaces. Both the
/// unsigned and the historic signed sum are accepted.
fn verify_checksum(block: &[u8; BLOCK_LEN]) -> bool {
    let Some(stored) = parse_number(&block[CHECKSUM_RANGE]) else {
        return false;
    };
    let mut unsigned: i64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if CHECKSUM_RANGE.contains(&i) { b' ' } else { b };
        unsigned += b as i64;
        signed += b as i8 as i64;
    }
    stored == unsigned || stored == signed
}

fn is_zero_block(block: &[u8; BLOCK_LEN]) -> bool {
    block.iter().all(|&b| b == 0)
}

fn padding(size: u64) -> u64 {
    let rem = size % BLOCK_LEN as u64;
    if rem == 0 {
        0
    } else {
        BLOCK_LEN as u64 - rem
    }
}

fn cstr_field(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Parse PAX records (`"<len> <key>=<value>\n"`).
fn parse_pax(data: &[u8], offset: u64) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let space = rest.iter().position(|&b| b == b' ').ok_or_else(|| {
            ArchiveError::corrupt_header(offset, "PAX record without a length")
        })?;
        let len = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&len| len > space + 1 && len <= rest.len())
            .ok_or_else(|| ArchiveError::corrupt_header(offset, "invalid PAX record length"))?;
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| ArchiveError::corrupt_header(offset, "PAX record without '='"))?;
        records.push((
            String::from_utf8_lossy(&record[..eq]).into_owned(),
            String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
        ));
        rest = &rest[len..];
    }
    Ok(records)
}

pub struct TarArchiveReader<R: Read> {
    slot: EntrySlot<CountingReader<R>>,
    charset: Charset,
    memory_limit: MemoryLimit,
    global_pax: BTreeMap<String, String>,
    pending_padding: u64,
    current_sparse: Option<String>,
    finished: bool,
}

impl<R: Read> TarArchiveReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        Ok(TarArchiveReader {
            slot: EntrySlot::new(CountingReader::new(source)),
            charset: options.charset_or(Charset::Utf8),
            memory_limit: options.effective_memory_limit(),
            global_pax: BTreeMap::new(),
            pending_padding: 0,
            current_sparse: None,
            finished: false,
        })
    }

    /// ustar/GNU magic, or a full v7 header block with a valid checksum.
    pub fn matches(signature: &[u8]) -> bool {
        if signature.len() >= MAGIC_OFFSET + 6 && &signature[MAGIC_OFFSET..MAGIC_OFFSET + 6] == USTAR_MAGIC {
            return true;
        }
        if signature.len() >= MAGIC_OFFSET + 8 && &signature[MAGIC_OFFSET..MAGIC_OFFSET + 8] == GNU_MAGIC {
            return true;
        }
        signature
            .get(..BLOCK_LEN)
            .and_then(|s| <&[u8; BLOCK_LEN]>::try_from(s).ok())
            .is_some_and(|block| !is_zero_block(block) && verify_checksum(block))
    }
}

/// Read one header block; `None` at the end-of-archive marker or a clean end
/// of the source.
fn read_block<R: Read>(src: &mut CountingReader<R>) -> Result<Option<[u8; BLOCK_LEN]>> {
    let offset = src.count();
    let mut block = [0u8; BLOCK_LEN];
    match read_fully(src, &mut block)? {
        0 => return Ok(None),
        BLOCK_LEN => {}
        n => {
            return Err(ArchiveError::corrupt_header(
                offset,
                format!("truncated tar header: {} of {} bytes", n, BLOCK_LEN),
            ))
        }
    }
    if is_zero_block(&block) {
        // The second zero block is optional in practice.
        let mut second = [0u8; BLOCK_LEN];
        read_fully(src, &mut second)?;
        return Ok(None);
    }
    if !verify_checksum(&block) {
        return Err(ArchiveError::corrupt_header(offset, "tar header checksum mismatch"));
    }
    Ok(Some(block))
}

fn read_payload<R: Read>(
    src: &mut CountingReader<R>,
    size: u64,
    limit: MemoryLimit,
    what: &str,
) -> Result<Vec<u8>> {
    let mut data = limit.allocate(size)?;
    let offset = src.count();
    if read_fully(src, &mut data)? < data.len() {
        return Err(ArchiveError::corrupt_header(offset, format!("archive ends inside {}", what)));
    }
    skip(src, padding(size))?;
    Ok(data)
}

fn number_field(block: &[u8], range: std::ops::Range<usize>, what: &str, offset: u64) -> Result<i64> {
    parse_number(&block[range.clone()]).ok_or_else(|| {
        ArchiveError::corrupt_header(offset + range.start as u64, format!("invalid {} field", what))
    })
}

impl<R: Read> ArchiveReader for TarArchiveReader<R> {
    type Entry = TarArchiveEntry;

    fn next_entry(&mut self) -> Result<Option<TarArchiveEntry>> {
        self.current_sparse = None;
        if self.finished {
            return Ok(None);
        }
        let src = self.slot.source()?;
        skip(src, self.pending_padding)?;
        self.pending_padding = 0;

        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;
        let mut pax: BTreeMap<String, String> = BTreeMap::new();

        let (offset, block, header_size) = loop {
            let offset = src.count();
            let Some(block) = read_block(src)? else {
                self.finished = true;
                return Ok(None);
            };
            let size = number_field(&block, 124..136, "size", offset)?;
            let size = u64::try_from(size)
                .map_err(|_| ArchiveError::corrupt_header(offset + 124, "negative entry size"))?;
            match block[156] {
                b'L' => {
                    let data = read_payload(src, size, self.memory_limit, "a GNU long name")?;
                    long_name = Some(self.charset.decode(cstr_field(&data)));
                }
                b'K' => {
                    let data = read_payload(src, size, self.memory_limit, "a GNU long link name")?;
                    long_link = Some(self.charset.decode(cstr_field(&data)));
                }
                b'x' | b'X' => {
                    let data = read_payload(src, size, self.memory_limit, "a PAX header")?;
                    pax.extend(parse_pax(&data, offset)?);
                }
                b'g' => {
                    let data = read_payload(src, size, self.memory_limit, "a PAX global header")?;
                    let records = parse_pax(&data, offset)?;
                    debug!("tar global PAX header with {} records", records.len());
                    for (key, value) in records {
                        if value.is_empty() {
                            self.global_pax.remove(&key);
                        } else {
                            self.global_pax.insert(key, value);
                        }
                    }
                }
                _ => break (offset, block, size),
            }
        };

        let mut headers = self.global_pax.clone();
        headers.extend(pax);

        let type_flag = block[156];
        let magic_ustar = &block[MAGIC_OFFSET..MAGIC_OFFSET + 6] == USTAR_MAGIC;
        let magic_gnu = &block[MAGIC_OFFSET..MAGIC_OFFSET + 8] == GNU_MAGIC;

        let mut name = long_name.unwrap_or_else(|| {
            let base = self.charset.decode(cstr_field(&block[0..100]));
            let prefix = cstr_field(&block[345..500]);
            if magic_ustar && !prefix.is_empty() {
                format!("{}/{}", self.charset.decode(prefix), base)
            } else {
                base
            }
        });
        let mut link_name = long_link.or_else(|| {
            let link = cstr_field(&block[157..257]);
            (!link.is_empty()).then(|| self.charset.decode(link))
        });

        let mut stored_size = header_size;
        let mut size = stored_size;
        let mut mode = number_field(&block, 100..108, "mode", offset)? as u32;
        let mut owner = Owner {
            uid: Some(number_field(&block, 108..116, "uid", offset)? as u64),
            gid: Some(number_field(&block, 116..124, "gid", offset)? as u64),
            user: None,
            group: None,
        };
        let mut mtime = number_field(&block, 136..148, "mtime", offset)?;
        let mut device = (0, 0);
        if magic_ustar || magic_gnu {
            let user = cstr_field(&block[265..297]);
            let group = cstr_field(&block[297..329]);
            owner.user = (!user.is_empty()).then(|| self.charset.decode(user));
            owner.group = (!group.is_empty()).then(|| self.charset.decode(group));
            if matches!(type_flag, b'3' | b'4') {
                device = (
                    number_field(&block, 329..337, "devmajor", offset)? as u64,
                    number_field(&block, 337..345, "devminor", offset)? as u64,
                );
            }
        }

        let mut sparse = false;
        if type_flag == b'S' {
            sparse = true;
            size = number_field(&block, 483..495, "real size", offset)? as u64;
            let mut extended = block[482] != 0;
            while extended {
                let ext_offset = src.count();
                let mut ext = [0u8; BLOCK_LEN];
                if read_fully(src, &mut ext)? < BLOCK_LEN {
                    return Err(ArchiveError::corrupt_header(ext_offset, "archive ends inside a sparse header"));
                }
                extended = ext[504] != 0;
            }
        }

        for (key, value) in &headers {
            match key.as_str() {
                "path" => name = value.clone(),
                "linkpath" => link_name = Some(value.clone()),
                "size" => {
                    if let Ok(v) = value.parse() {
                        stored_size = v;
                        size = v;
                    }
                }
                "uid" => owner.uid = value.parse().ok().or(owner.uid),
                "gid" => owner.gid = value.parse().ok().or(owner.gid),
                "uname" => owner.user = Some(value.clone()),
                "gname" => owner.group = Some(value.clone()),
                "mtime" => {
                    let whole = value.split('.').next().unwrap_or_default();
                    if let Ok(v) = whole.parse() {
                        mtime = v;
                    }
                }
                "mode" => mode = u32::from_str_radix(value, 8).unwrap_or(mode),
                _ if key.starts_with("GNU.sparse.") => sparse = true,
                _ => {}
            }
        }
        if let Some(real) = headers
            .get("GNU.sparse.realsize")
            .or_else(|| headers.get("GNU.sparse.size"))
            .and_then(|v| v.parse().ok())
        {
            size = real;
        }
        if let Some(real_name) = headers.get("GNU.sparse.name") {
            name = real_name.clone();
        }

        let kind = match type_flag {
            b'1' => EntryKind::HardLink,
            b'2' => EntryKind::Symlink,
            b'3' => EntryKind::CharDevice,
            b'4' => EntryKind::BlockDevice,
            b'5' | b'D' => EntryKind::Directory,
            b'6' => EntryKind::Fifo,
            b'0' | 0 | b'7' | b'S' => {
                // v7 archives mark directories by the trailing slash only.
                if name.ends_with('/') {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                }
            }
            _ => EntryKind::Other,
        };
        let name = directory_name(name, kind == EntryKind::Directory);

        self.pending_padding = padding(stored_size);
        trace!(
            "tar entry '{}' type {:?} ({} bytes{})",
            name,
            type_flag as char,
            size,
            if sparse { ", sparse" } else { "" }
        );

        let guard_name = name.clone();
        self.slot.open(|src| {
            EntryStream::Plain(BoundedReader::new(src, stored_size).truncation_guard(Some(guard_name)))
        })?;
        if sparse {
            self.current_sparse = Some(name.clone());
        }

        Ok(Some(TarArchiveEntry {
            name,
            link_name,
            kind,
            type_flag,
            size,
            stored_size,
            mode,
            owner,
            mtime,
            device,
            sparse,
            pax_headers: headers,
        }))
    }

    fn can_read_entry_data(&self, entry: &TarArchiveEntry) -> bool {
        !entry.sparse
    }

    fn bytes_read(&self) -> u64 {
        self.slot.get_ref().map_or(0, CountingReader::count)
    }
}

impl<R: Read> Read for TarArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(name) = &self.current_sparse {
            return Err(ArchiveError::unsupported_feature(Some(name), Feature::SparseFile).into());
        }
        self.slot.read(buf)
    }
}
