use std::io::{self, Read};

use log::{debug, trace};

use crate::core::archive::ArchiveReader;
use crate::core::charset::Charset;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Feature, Result};
use crate::formats::arj::constants::{main_flags, Method, ARJ_MAGIC};
use crate::formats::arj::entry::ArjArchiveEntry;
use crate::formats::arj::header::{
    read_basic_header, read_extended_headers, scan_basic_header, LocalFileHeader, MainHeader,
};
use crate::stream::{BoundedReader, ChecksumVerifier, CountingReader, Crc32, EntrySlot, EntryStream};

/// Streaming ARJ reader. Only stored entries can be extracted; compressed
/// entries are listed and reported through `can_read_entry_data`.
pub struct ArjArchiveReader<R: Read> {
    slot: EntrySlot<CountingReader<R>>,
    main_header: MainHeader,
    current: Option<ArjArchiveEntry>,
    charset: Charset,
    memory_limit: MemoryLimit,
    finished: bool,
}

impl<R: Read> ArjArchiveReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        let charset = options.charset_or(Charset::Cp437);
        let memory_limit = options.effective_memory_limit();
        let mut src = CountingReader::new(source);

        let basic = if options.self_extracting {
            scan_basic_header(&mut src)?
        } else {
            read_basic_header(&mut src)?
        };
        let basic = basic.ok_or_else(|| {
            ArchiveError::corrupt_header(src.count(), "archive ends without any headers")
        })?;

        let mut main_header = MainHeader::parse(&basic, charset)?;
        main_header.extended_headers = read_extended_headers(&mut src, memory_limit)?;

        if main_header.flags & main_flags::GARBLED != 0 {
            return Err(ArchiveError::unsupported_feature(None, Feature::Encryption));
        }
        if main_header.flags & main_flags::VOLUME != 0 {
            return Err(ArchiveError::unsupported_feature(None, Feature::MultiVolume));
        }
        debug!(
            "Opened ARJ archive '{}' (version {}, host {:?})",
            main_header.name, main_header.archiver_version, main_header.host_os
        );

        Ok(ArjArchiveReader {
            slot: EntrySlot::new(src),
            main_header,
            current: None,
            charset,
            memory_limit,
            finished: false,
        })
    }

    /// Whether `signature` starts with the ARJ header magic.
    pub fn matches(signature: &[u8]) -> bool {
        signature.starts_with(&ARJ_MAGIC)
    }

    pub fn main_header(&self) -> &MainHeader {
        &self.main_header
    }

    /// Name the archive was created under.
    pub fn archive_name(&self) -> &str {
        &self.main_header.name
    }

    pub fn archive_comment(&self) -> &str {
        &self.main_header.comment
    }

    fn read_local_header(&mut self) -> Result<Option<LocalFileHeader>> {
        let src = self.slot.source()?;
        let Some(basic) = read_basic_header(src)? else {
            return Ok(None);
        };
        let mut header = LocalFileHeader::parse(&basic, self.charset)?;
        header.extended_headers = read_extended_headers(src, self.memory_limit)?;
        Ok(Some(header))
    }
}

impl<R: Read> ArchiveReader for ArjArchiveReader<R> {
    type Entry = ArjArchiveEntry;

    fn next_entry(&mut self) -> Result<Option<ArjArchiveEntry>> {
        self.current = None;
        if self.finished {
            return Ok(None);
        }

        let Some(header) = self.read_local_header()? else {
            self.finished = true;
            return Ok(None);
        };
        let entry = ArjArchiveEntry::new(header);
        trace!(
            "ARJ entry '{}': method {}, {} -> {} bytes",
            entry.header().name,
            entry.method(),
            entry.compressed_size(),
            entry.header().original_size
        );

        let header = entry.header();
        let (compressed, original, crc) =
            (header.compressed_size, header.original_size, header.original_crc32);
        let stored = header.method == Method::Stored && !entry.is_encrypted();
        let name = header.name.clone();
        self.slot.open(|src| {
            let bounded = BoundedReader::new(src, compressed).truncation_guard(Some(name.clone()));
            if stored {
                EntryStream::Verified(
                    ChecksumVerifier::new(bounded, Crc32::new(), original, crc).for_entry(name),
                )
            } else {
                EntryStream::Plain(bounded)
            }
        })?;

        self.current = Some(entry.clone());
        Ok(Some(entry))
    }

    fn can_read_entry_data(&self, entry: &ArjArchiveEntry) -> bool {
        entry.method() == Method::Stored && !entry.is_encrypted()
    }

    fn bytes_read(&self) -> u64 {
        self.slot.get_ref().map_or(0, CountingReader::count)
    }
}

impl<R: Read> Read for ArjArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.current {
            None => Err(ArchiveError::NoCurrentEntry.into()),
            Some(entry) if entry.is_encrypted() => {
                Err(ArchiveError::unsupported_feature(Some(&entry.header().name), Feature::Encryption).into())
            }
            Some(entry) if entry.method() != Method::Stored => {
                Err(ArchiveError::unsupported_method(&entry.header().name, entry.method()).into())
            }
            Some(_) => self.slot.read(buf),
        }
    }
}
