//! Per-thread compression targets for the parallel ZIP creator.
//!
//! A `ScatterZipStream` compresses entries one after another into a backing
//! store and remembers where each one landed. The parallel creator keeps one
//! stream per worker thread and gathers the segments into the final archive.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::trace;

use crate::error::{ArchiveError, Result};
use crate::formats::zip::constants::ZipMethod;
use crate::formats::zip::entry::ZipArchiveEntry;
use crate::formats::zip::writer::ZipArchiveWriter;
use crate::stream::checksum::{ChecksumVerifier, Crc32};

/// Byte range of one compressed entry inside a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub len: u64,
}

/// Append-only storage for compressed entries, read back by segment.
pub trait ScatterBackingStore: Write + Send {
    /// Bytes appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_segment(&mut self, segment: Segment) -> io::Result<Box<dyn Read + '_>>;
}

/// Anonymous temporary file, removed by the OS once dropped.
pub struct FileBackingStore {
    file: BufWriter<File>,
    len: u64,
    read_position: bool,
}

impl FileBackingStore {
    pub fn new() -> io::Result<Self> {
        Ok(Self::from_file(tempfile::tempfile()?))
    }

    pub fn new_in(dir: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_file(tempfile::tempfile_in(dir)?))
    }

    fn from_file(file: File) -> Self {
        FileBackingStore {
            file: BufWriter::new(file),
            len: 0,
            read_position: false,
        }
    }
}

impl Write for FileBackingStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_position {
            self.file.seek(SeekFrom::End(0))?;
            self.read_position = false;
        }
        let n = self.file.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ScatterBackingStore for FileBackingStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn open_segment(&mut self, segment: Segment) -> io::Result<Box<dyn Read + '_>> {
        check_segment(segment, self.len)?;
        self.file.flush()?;
        self.read_position = true;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(segment.offset))?;
        Ok(Box::new(file.take(segment.len)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    data: Vec<u8>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for MemoryBackingStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ScatterBackingStore for MemoryBackingStore {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open_segment(&mut self, segment: Segment) -> io::Result<Box<dyn Read + '_>> {
        check_segment(segment, self.len())?;
        let start = segment.offset as usize;
        let end = start + segment.len as usize;
        Ok(Box::new(&self.data[start..end]))
    }
}

fn check_segment(segment: Segment, len: u64) -> io::Result<()> {
    match segment.offset.checked_add(segment.len) {
        Some(end) if end <= len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "segment {}+{} lies outside the {} byte backing store",
                segment.offset, segment.len, len
            ),
        )),
    }
}

/// Sequence of compressed entries sharing one backing store.
pub struct ScatterZipStream {
    store: Box<dyn ScatterBackingStore>,
    level: Compression,
    entries: Vec<(ZipArchiveEntry, Segment)>,
}

impl ScatterZipStream {
    pub fn new(store: Box<dyn ScatterBackingStore>, level: Compression) -> Self {
        ScatterZipStream {
            store,
            level,
            entries: Vec::new(),
        }
    }

    pub fn in_memory(level: Compression) -> Self {
        Self::new(Box::new(MemoryBackingStore::new()), level)
    }

    /// Compress `payload` with the entry's method and record CRC and sizes
    /// on the stored copy of the entry. Returns the entry's index.
    pub fn add_entry(&mut self, mut entry: ZipArchiveEntry, payload: &mut dyn Read) -> Result<usize> {
        let offset = self.store.len();
        let mut source = ChecksumVerifier::computing(payload, Crc32::new());
        match entry.method {
            ZipMethod::Stored => {
                io::copy(&mut source, &mut *self.store)?;
            }
            ZipMethod::Deflated => {
                let mut encoder = DeflateEncoder::new(&mut *self.store, self.level);
                io::copy(&mut source, &mut encoder)?;
                encoder.finish()?;
            }
            other => return Err(ArchiveError::unsupported_method(&entry.name, other)),
        }

        let size = source.bytes_read();
        let crc = source.value();
        let segment = Segment {
            offset,
            len: self.store.len() - offset,
        };
        entry.set_sizes(crc, segment.len, size);
        trace!(
            "Scattered '{}': {} -> {} bytes at offset {}",
            entry.name,
            size,
            segment.len,
            offset
        );
        self.entries.push((entry, segment));
        Ok(self.entries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, with CRC and sizes filled in.
    pub fn entry(&self, index: usize) -> Option<&ZipArchiveEntry> {
        self.entries.get(index).map(|(entry, _)| entry)
    }

    pub fn segment(&self, index: usize) -> Option<Segment> {
        self.entries.get(index).map(|(_, segment)| *segment)
    }

    /// Copy one entry into `writer` without recompressing it.
    pub fn write_entry<W: Write>(&mut self, index: usize, writer: &mut ZipArchiveWriter<W>) -> Result<()> {
        let (entry, segment) = self.entries.get(index).ok_or_else(|| {
            ArchiveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("scatter stream has no entry {index}"),
            ))
        })?;
        let mut raw = self.store.open_segment(*segment)?;
        writer.add_raw_entry(entry, &mut raw)
    }

    /// Copy every entry into `writer` in the order they were added.
    pub fn write_to<W: Write>(&mut self, writer: &mut ZipArchiveWriter<W>) -> Result<()> {
        for index in 0..self.entries.len() {
            self.write_entry(index, writer)?;
        }
        Ok(())
    }
}
