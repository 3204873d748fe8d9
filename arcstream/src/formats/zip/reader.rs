//! Streaming ZIP reader.
//!
//! Walks local file headers front to back without looking at the central
//! directory, which is where the stream ends. Entries whose sizes trail the
//! data in a data descriptor are decoded until the compressed stream ends;
//! the descriptor is then read and checked against what was decoded.

use std::io::{self, BufRead, BufReader, Read};

use flate2::bufread::DeflateDecoder;
use log::{debug, trace};

use crate::codecs::deflate64::{self, Deflate64Decoder};
use crate::core::archive::ArchiveReader;
use crate::core::bytes::{read_fully, HeaderCursor};
use crate::core::charset::Charset;
use crate::core::dostime::DosDateTime;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Feature, Result};
use crate::formats::zip::constants::*;
use crate::formats::zip::entry::ZipArchiveEntry;
use crate::formats::zip::extra::{parse_extra_fields, ExtraField};
use crate::stream::{BoundedReader, ChecksumVerifier, CountingReader, Crc32, EntrySlot, LentSource};

type Source<R> = CountingReader<BufReader<R>>;

enum Payload<S> {
    Stored(BoundedReader<S>),
    Deflated(DeflateDecoder<BoundedReader<S>>),
    Deflate64(Deflate64Decoder<BoundedReader<S>>),
    /// Content this reader cannot decode; it can still be skipped when its
    /// compressed size is known.
    Refused(BoundedReader<S>),
}

impl<S> Payload<S> {
    fn bounded(&mut self) -> &mut BoundedReader<S> {
        match self {
            Payload::Stored(b) | Payload::Refused(b) => b,
            Payload::Deflated(d) => d.get_mut(),
            Payload::Deflate64(d) => d.get_mut(),
        }
    }

    fn bounded_ref(&self) -> &BoundedReader<S> {
        match self {
            Payload::Stored(b) | Payload::Refused(b) => b,
            Payload::Deflated(d) => d.get_ref(),
            Payload::Deflate64(d) => d.get_ref(),
        }
    }

    fn into_bounded(self) -> BoundedReader<S> {
        match self {
            Payload::Stored(b) | Payload::Refused(b) => b,
            Payload::Deflated(d) => d.into_inner(),
            Payload::Deflate64(d) => d.into_inner(),
        }
    }
}

impl<S: BufRead> Read for Payload<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Payload::Stored(b) => b.read(buf),
            Payload::Deflated(d) => d.read(buf),
            Payload::Deflate64(d) => d.read(buf),
            Payload::Refused(_) => Ok(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Refusal {
    Method(ZipMethod),
    Feature(Feature),
}

impl Refusal {
    fn error(self, entry: &str) -> ArchiveError {
        match self {
            Refusal::Method(method) => ArchiveError::unsupported_method(entry, method),
            Refusal::Feature(feature) => ArchiveError::unsupported_feature(Some(entry), feature),
        }
    }
}

/// What was decoded for an entry, compared against its data descriptor.
struct Summary {
    crc: u32,
    size: u64,
    compressed_size: u64,
}

pub(crate) struct ZipEntryStream<S> {
    content: ChecksumVerifier<Payload<S>>,
    name: String,
    refusal: Option<Refusal>,
    /// The compressed size came from the local header.
    sized: bool,
}

impl<S> ZipEntryStream<S> {
    fn summary(&mut self) -> Summary {
        Summary {
            crc: self.content.value(),
            size: self.content.bytes_read(),
            compressed_size: self.content.get_mut().bounded().consumed(),
        }
    }
}

impl<S: BufRead> Read for ZipEntryStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.refusal {
            Some(refusal) => Err(refusal.error(&self.name).into()),
            None => self.content.read(buf),
        }
    }
}

impl<S: BufRead> LentSource<S> for ZipEntryStream<S> {
    /// Entries with a known compressed size are skipped without decoding.
    /// The others can only be found to end by decoding them.
    fn drain(&mut self) -> io::Result<u64> {
        if self.sized {
            self.content.get_mut().bounded().drain()
        } else {
            io::copy(self, &mut io::sink())
        }
    }

    fn source_ref(&self) -> &S {
        self.content.get_ref().bounded_ref().get_ref()
    }

    fn into_source(self) -> S {
        self.content.into_inner().into_bounded().into_inner()
    }
}

struct OpenEntry {
    entry: ZipArchiveEntry,
    closed: bool,
}

pub struct ZipArchiveReader<R: Read> {
    slot: EntrySlot<Source<R>, ZipEntryStream<Source<R>>>,
    current: Option<OpenEntry>,
    /// Used for names without the UTF-8 flag; CP437 when unset.
    charset: Option<Charset>,
    memory_limit: MemoryLimit,
    entries: u64,
    finished: bool,
}

fn read_signature<R: Read>(src: &mut R, offset: u64) -> Result<Option<u32>> {
    let mut signature = [0u8; 4];
    match read_fully(src, &mut signature)? {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes(signature))),
        n => Err(ArchiveError::corrupt_header(
            offset,
            format!("archive ends {} bytes into a record signature", n),
        )),
    }
}

struct DataDescriptor {
    crc: u32,
    compressed_size: u64,
    size: u64,
}

/// The signature is optional; sizes are 8 bytes wide for Zip64 entries.
fn read_data_descriptor<R: Read>(src: &mut CountingReader<R>, zip64: bool) -> Result<DataDescriptor> {
    let offset = src.count();
    let size_len = if zip64 { 8 } else { 4 };
    let mut buf = [0u8; 24];
    let truncated = || ArchiveError::corrupt_header(offset, "archive ends inside a data descriptor");

    if read_fully(src, &mut buf[..4])? < 4 {
        return Err(truncated());
    }
    let has_signature = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) == DATA_DESCRIPTOR_SIG;
    let body_len = 4 + 2 * size_len;
    let (start, end) = if has_signature { (4, 4 + body_len) } else { (0, body_len) };
    if read_fully(src, &mut buf[4..end])? < end - 4 {
        return Err(truncated());
    }

    let mut cursor = HeaderCursor::new(&buf[start..end], offset + start as u64);
    let crc = cursor.u32()?;
    let (compressed_size, size) = if zip64 {
        (cursor.u64()?, cursor.u64()?)
    } else {
        (cursor.u32()? as u64, cursor.u32()? as u64)
    };
    Ok(DataDescriptor {
        crc,
        compressed_size,
        size,
    })
}

impl<R: Read> ZipArchiveReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        Ok(ZipArchiveReader {
            slot: EntrySlot::new(CountingReader::new(BufReader::new(source))),
            current: None,
            charset: options.charset,
            memory_limit: options.effective_memory_limit(),
            entries: 0,
            finished: false,
        })
    }

    /// Local file header, the "PK00" marker some archivers put first, or the
    /// end record of an empty archive.
    pub fn matches(signature: &[u8]) -> bool {
        if signature.len() < 4 {
            return false;
        }
        matches!(
            u32::from_le_bytes([signature[0], signature[1], signature[2], signature[3]]),
            LOCAL_FILE_HEADER_SIG | SINGLE_SEGMENT_SIG | END_OF_CENTRAL_DIR_SIG
        )
    }

    /// The entry being read. Sizes and CRC of data descriptor entries are
    /// filled in once the entry has been read to its end.
    pub fn current_entry(&self) -> Option<&ZipArchiveEntry> {
        self.current.as_ref().map(|open| &open.entry)
    }

    /// Drain the current entry and, if its sizes trail the data, read and
    /// check the data descriptor.
    fn close_current(&mut self) -> Result<()> {
        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };
        if open.closed {
            return Ok(());
        }
        let summary = self.slot.close(ZipEntryStream::summary)?;
        open.closed = true;
        let (Some(summary), true) = (summary, open.entry.uses_data_descriptor()) else {
            return Ok(());
        };

        let src = self.slot.source()?;
        let offset = src.count();
        let descriptor = read_data_descriptor(src, open.entry.zip64)?;
        if descriptor.crc != summary.crc {
            return Err(ArchiveError::ChecksumMismatch {
                entry: Some(open.entry.name.clone()),
                expected: descriptor.crc,
                actual: summary.crc,
            });
        }
        if descriptor.compressed_size != summary.compressed_size || descriptor.size != summary.size {
            return Err(ArchiveError::corrupt_header(
                offset,
                format!(
                    "data descriptor of '{}' records {} -> {} bytes, decoded {} -> {}",
                    open.entry.name,
                    descriptor.compressed_size,
                    descriptor.size,
                    summary.compressed_size,
                    summary.size
                ),
            ));
        }
        open.entry.set_sizes(descriptor.crc, descriptor.compressed_size, descriptor.size);
        Ok(())
    }

    fn read_local_header(&mut self) -> Result<Option<ZipArchiveEntry>> {
        let first = self.entries == 0;
        let src = self.slot.source()?;
        let mut offset = src.count();
        let Some(mut signature) = read_signature(src, offset)? else {
            return Ok(None);
        };
        if first && signature == DATA_DESCRIPTOR_SIG {
            return Err(ArchiveError::unsupported_feature(None, Feature::SplitArchive));
        }
        if first && signature == SINGLE_SEGMENT_SIG {
            offset = src.count();
            signature = match read_signature(src, offset)? {
                Some(signature) => signature,
                None => return Ok(None),
            };
        }
        match signature {
            LOCAL_FILE_HEADER_SIG => {}
            CENTRAL_FILE_HEADER_SIG
            | END_OF_CENTRAL_DIR_SIG
            | ZIP64_END_OF_CENTRAL_DIR_SIG
            | ZIP64_LOCATOR_SIG
            | ARCHIVE_EXTRA_DATA_SIG => {
                debug!("ZIP central directory reached at offset {}", offset);
                return Ok(None);
            }
            other => {
                return Err(ArchiveError::corrupt_header(
                    offset,
                    format!("unexpected record signature {:#010x}", other),
                ))
            }
        }

        let mut fixed = [0u8; LOCAL_HEADER_FIXED_LEN];
        if read_fully(src, &mut fixed)? < fixed.len() {
            return Err(ArchiveError::corrupt_header(offset, "truncated local file header"));
        }
        let mut cursor = HeaderCursor::new(&fixed, offset + 4);
        let _version_needed = cursor.u16()?;
        let flags = cursor.u16()?;
        let method = ZipMethod::from_code(cursor.u16()?);
        let time = cursor.u16()?;
        let date = cursor.u16()?;
        let crc = cursor.u32()?;
        let compressed_size = cursor.u32()?;
        let size = cursor.u32()?;
        let name_len = cursor.u16()? as u64;
        let extra_len = cursor.u16()? as u64;

        let mut raw_name = self.memory_limit.allocate(name_len)?;
        let mut raw_extra = self.memory_limit.allocate(extra_len)?;
        if read_fully(src, &mut raw_name)? < raw_name.len() || read_fully(src, &mut raw_extra)? < raw_extra.len() {
            return Err(ArchiveError::corrupt_header(offset, "archive ends inside a local file header"));
        }
        let extra = parse_extra_fields(&raw_extra, offset + 30 + name_len);

        let mut name = if flags & flags::UTF8_NAMES != 0 {
            Charset::Utf8.decode(&raw_name)
        } else {
            self.charset.unwrap_or(Charset::Cp437).decode(&raw_name)
        };
        let mut modified_unix = None;
        let mut zip64 = None;
        for field in &extra {
            match field {
                ExtraField::UnicodePath { name_crc, name: unicode }
                    if flags & flags::UTF8_NAMES == 0 && *name_crc == crc32fast::hash(&raw_name) =>
                {
                    name = unicode.clone();
                }
                ExtraField::ExtendedTimestamp { modified } => modified_unix = *modified,
                ExtraField::Zip64 { size, compressed_size } => zip64 = Some((*size, *compressed_size)),
                _ => {}
            }
        }

        let mut entry = ZipArchiveEntry {
            name,
            method,
            flags,
            dos_time: DosDateTime::from_parts(date, time),
            modified_unix,
            crc: None,
            compressed_size: None,
            size: None,
            mode: None,
            extra,
            zip64: zip64.is_some(),
        };
        if !entry.uses_data_descriptor() {
            let widen = |value: u32, wide: Option<u64>| match wide {
                Some(wide) if value == ZIP64_MAGIC => wide,
                _ => value as u64,
            };
            let (zip64_size, zip64_compressed) = zip64.unwrap_or((None, None));
            entry.set_sizes(
                crc,
                widen(compressed_size, zip64_compressed),
                widen(size, zip64_size),
            );
        }
        Ok(Some(entry))
    }
}

impl<R: Read> ArchiveReader for ZipArchiveReader<R> {
    type Entry = ZipArchiveEntry;

    fn next_entry(&mut self) -> Result<Option<ZipArchiveEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.close_current()?;
        self.current = None;

        let Some(entry) = self.read_local_header()? else {
            self.finished = true;
            return Ok(None);
        };
        self.entries += 1;
        trace!(
            "ZIP entry '{}': {}, {:?} -> {:?} bytes{}",
            entry.name,
            entry.method,
            entry.compressed_size,
            entry.size,
            if entry.uses_data_descriptor() { " (data descriptor)" } else { "" }
        );

        let refusal = if entry.is_encrypted() {
            Some(Refusal::Feature(Feature::Encryption))
        } else if !entry.method.is_supported() {
            Some(Refusal::Method(entry.method))
        } else if entry.method == ZipMethod::Stored && entry.uses_data_descriptor() {
            Some(Refusal::Feature(Feature::StoredWithDataDescriptor))
        } else {
            None
        };
        if refusal.is_none() && entry.method == ZipMethod::Deflate64 {
            self.memory_limit.check_bytes(deflate64::WINDOW_SIZE as u64)?;
        }

        let name = entry.name.clone();
        let method = entry.method;
        let (compressed_size, expected) = match (entry.compressed_size, entry.size, entry.crc) {
            (Some(compressed), Some(size), Some(crc)) => (Some(compressed), Some((size, crc))),
            _ => (None, None),
        };
        self.slot.open(|src| {
            let bounded = match compressed_size {
                Some(len) => BoundedReader::new(src, len).truncation_guard(Some(name.clone())),
                None => BoundedReader::unbounded(src),
            };
            let payload = match (refusal, method) {
                (None, ZipMethod::Stored) => Payload::Stored(bounded),
                (None, ZipMethod::Deflated) => Payload::Deflated(DeflateDecoder::new(bounded)),
                (None, ZipMethod::Deflate64) => Payload::Deflate64(Deflate64Decoder::new(bounded)),
                _ => Payload::Refused(bounded),
            };
            let content = match expected {
                Some((size, crc)) => ChecksumVerifier::new(payload, Crc32::new(), size, crc),
                None => ChecksumVerifier::computing(payload, Crc32::new()),
            };
            ZipEntryStream {
                content: content.for_entry(name.clone()),
                name,
                refusal,
                sized: compressed_size.is_some(),
            }
        })?;

        self.current = Some(OpenEntry {
            entry: entry.clone(),
            closed: false,
        });
        Ok(Some(entry))
    }

    fn can_read_entry_data(&self, entry: &ZipArchiveEntry) -> bool {
        !entry.is_encrypted()
            && entry.method.is_supported()
            && !(entry.method == ZipMethod::Stored && entry.uses_data_descriptor())
    }

    fn bytes_read(&self) -> u64 {
        self.slot.get_ref().map_or(0, CountingReader::count)
    }
}

impl<R: Read> Read for ZipArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.current {
            None => return Err(ArchiveError::NoCurrentEntry.into()),
            Some(open) if open.closed => return Ok(0),
            Some(_) => {}
        }
        let n = self.slot.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.close_current()?;
        }
        Ok(n)
    }
}
