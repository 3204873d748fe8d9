//! Name and signature based lookup of readers.
//!
//! Each format is one row in a static table: its name, the probe run on the
//! first bytes of a stream and a constructor over a boxed source.

use std::fmt;
use std::io::{BufReader, Cursor, Read};
use std::str::FromStr;

use log::debug;

use crate::codecs::{Deflate64Decoder, FramedSnappyReader, GzipReader, RawSnappyReader};
use crate::core::archive::DynArchiveReader;
use crate::core::bytes::read_fully;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};
use crate::formats::{
    ArArchiveReader, ArjArchiveReader, CpioArchiveReader, TarArchiveReader, ZipArchiveReader,
};

/// Bytes inspected by [`open_archive_autodetect`]; one tar header block.
pub const SIGNATURE_LEN: usize = 512;

type Source = Box<dyn Read>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Ar,
    Arj,
    Cpio,
    Tar,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressorFormat {
    Gzip,
    Deflate64,
    SnappyFramed,
    SnappyRaw,
}

struct ArchiveRow {
    format: ArchiveFormat,
    name: &'static str,
    matches: fn(&[u8]) -> bool,
    open: fn(Source, ReadOptions) -> Result<Box<dyn DynArchiveReader>>,
}

struct CompressorRow {
    format: CompressorFormat,
    name: &'static str,
    /// `None` for formats without a signature.
    matches: Option<fn(&[u8]) -> bool>,
    open: fn(Source, ReadOptions) -> Result<Box<dyn Read>>,
}

// Probe order matters: tar accepts any block with a valid checksum, so it
// goes last.
static ARCHIVES: &[ArchiveRow] = &[
    ArchiveRow {
        format: ArchiveFormat::Zip,
        name: "zip",
        matches: ZipArchiveReader::<Source>::matches,
        open: |src, options| Ok(Box::new(ZipArchiveReader::new(src, options)?)),
    },
    ArchiveRow {
        format: ArchiveFormat::Ar,
        name: "ar",
        matches: ArArchiveReader::<Source>::matches,
        open: |src, options| Ok(Box::new(ArArchiveReader::new(src, options)?)),
    },
    ArchiveRow {
        format: ArchiveFormat::Arj,
        name: "arj",
        matches: ArjArchiveReader::<Source>::matches,
        open: |src, options| Ok(Box::new(ArjArchiveReader::new(src, options)?)),
    },
    ArchiveRow {
        format: ArchiveFormat::Cpio,
        name: "cpio",
        matches: CpioArchiveReader::<Source>::matches,
        open: |src, options| Ok(Box::new(CpioArchiveReader::new(src, options)?)),
    },
    ArchiveRow {
        format: ArchiveFormat::Tar,
        name: "tar",
        matches: TarArchiveReader::<Source>::matches,
        open: |src, options| Ok(Box::new(TarArchiveReader::new(src, options)?)),
    },
];

static COMPRESSORS: &[CompressorRow] = &[
    CompressorRow {
        format: CompressorFormat::Gzip,
        name: "gz",
        matches: Some(crate::codecs::gzip::matches),
        open: |src, options| Ok(Box::new(GzipReader::new(BufReader::new(src), options)?)),
    },
    CompressorRow {
        format: CompressorFormat::SnappyFramed,
        name: "snappy-framed",
        matches: Some(crate::codecs::snappy::framed::matches),
        open: |src, options| Ok(Box::new(FramedSnappyReader::new(src, options)?)),
    },
    CompressorRow {
        format: CompressorFormat::SnappyRaw,
        name: "snappy-raw",
        matches: None,
        open: |src, options| Ok(Box::new(RawSnappyReader::new(src, options)?)),
    },
    CompressorRow {
        format: CompressorFormat::Deflate64,
        name: "deflate64",
        matches: None,
        open: |src, options| {
            let limit = options.effective_memory_limit();
            Ok(Box::new(Deflate64Decoder::with_memory_limit(BufReader::new(src), limit)?))
        },
    },
];

fn archive_row(format: ArchiveFormat) -> &'static ArchiveRow {
    // Every variant has a row
    ARCHIVES
        .iter()
        .find(|row| row.format == format)
        .unwrap_or(&ARCHIVES[0])
}

fn compressor_row(format: CompressorFormat) -> &'static CompressorRow {
    COMPRESSORS
        .iter()
        .find(|row| row.format == format)
        .unwrap_or(&COMPRESSORS[0])
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 5] = [
        ArchiveFormat::Ar,
        ArchiveFormat::Arj,
        ArchiveFormat::Cpio,
        ArchiveFormat::Tar,
        ArchiveFormat::Zip,
    ];

    pub fn name(self) -> &'static str {
        archive_row(self).name
    }
}

impl CompressorFormat {
    pub const ALL: [CompressorFormat; 4] = [
        CompressorFormat::Gzip,
        CompressorFormat::Deflate64,
        CompressorFormat::SnappyFramed,
        CompressorFormat::SnappyRaw,
    ];

    pub fn name(self) -> &'static str {
        compressor_row(self).name
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for CompressorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    /// Case-insensitive format name.
    fn from_str(s: &str) -> Result<Self> {
        ARCHIVES
            .iter()
            .find(|row| row.name.eq_ignore_ascii_case(s))
            .map(|row| row.format)
            .ok_or_else(|| ArchiveError::UnknownFormat(s.to_string()))
    }
}

impl FromStr for CompressorFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        let s = if s.eq_ignore_ascii_case("gzip") { "gz" } else { s };
        COMPRESSORS
            .iter()
            .find(|row| row.name.eq_ignore_ascii_case(s))
            .map(|row| row.format)
            .ok_or_else(|| ArchiveError::UnknownFormat(s.to_string()))
    }
}

/// First archive format whose probe accepts `signature`.
pub fn detect_archive_format(signature: &[u8]) -> Option<ArchiveFormat> {
    ARCHIVES
        .iter()
        .find(|row| (row.matches)(signature))
        .map(|row| row.format)
}

/// Compressor with a signature matching `signature`. Raw Snappy and
/// Deflate64 carry no signature and are never detected.
pub fn detect_compressor_format(signature: &[u8]) -> Option<CompressorFormat> {
    COMPRESSORS
        .iter()
        .find(|row| row.matches.is_some_and(|matches| matches(signature)))
        .map(|row| row.format)
}

pub fn open_archive<R: Read + 'static>(
    format: ArchiveFormat,
    source: R,
    options: ReadOptions,
) -> Result<Box<dyn DynArchiveReader>> {
    (archive_row(format).open)(Box::new(source), options)
}

pub fn open_compressor<R: Read + 'static>(
    format: CompressorFormat,
    source: R,
    options: ReadOptions,
) -> Result<Box<dyn Read>> {
    (compressor_row(format).open)(Box::new(source), options)
}

/// Peek at the start of `source`, pick the archive format and open it. The
/// peeked bytes are replayed to the reader.
pub fn open_archive_autodetect<R: Read + 'static>(
    mut source: R,
    options: ReadOptions,
) -> Result<Box<dyn DynArchiveReader>> {
    let mut signature = vec![0u8; SIGNATURE_LEN];
    let n = read_fully(&mut source, &mut signature)?;
    signature.truncate(n);

    let format = detect_archive_format(&signature)
        .ok_or_else(|| ArchiveError::UnknownFormat(format!("no archive signature in {n} leading bytes")))?;
    debug!("Detected {} archive", format);
    open_archive(format, Cursor::new(signature).chain(source), options)
}
