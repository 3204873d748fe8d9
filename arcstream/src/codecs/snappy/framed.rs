//! Snappy framing format.
//!
//! A stream is a sequence of chunks, each a 1-byte type and a 3-byte LE
//! length. Data chunks start with a masked CRC-32C of their uncompressed
//! content. The checksum of a chunk is compared once all of its bytes have
//! been handed out, before the next chunk header is read.

use std::io::{self, Read};

use log::debug;

use crate::codecs::snappy::raw;
use crate::core::bytes::{read_fully, skip};
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};
use crate::stream::Crc32c;

/// `ff 06 00 00 "sNaPpY"`.
pub const STREAM_IDENTIFIER: [u8; 10] = [0xff, 0x06, 0x00, 0x00, b's', b'N', b'a', b'P', b'p', b'Y'];

const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;
const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;
const MASK_DELTA: u32 = 0xa282_ead8;

/// Uncompressed bytes a data chunk may carry.
pub const MAX_CHUNK_DATA: usize = 65536;
/// Worst-case Snappy encoding of a full chunk.
const MAX_COMPRESSED_DATA: usize = 32 + MAX_CHUNK_DATA + MAX_CHUNK_DATA / 6;

/// Framing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnappyDialect {
    /// Stream identifier first, a checksum on every data chunk.
    #[default]
    Standard,
    /// Apple iWork: no leading stream identifier and no checksum on
    /// compressed chunks.
    IWork,
}

impl SnappyDialect {
    fn requires_identifier(self) -> bool {
        self == SnappyDialect::Standard
    }

    fn checksums_compressed_chunks(self) -> bool {
        self == SnappyDialect::Standard
    }
}

pub fn mask_checksum(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub fn unmask_checksum(masked: u32) -> u32 {
    let rotated = masked.wrapping_sub(MASK_DELTA);
    (rotated >> 17) | (rotated << 15)
}

pub fn matches(signature: &[u8]) -> bool {
    signature.starts_with(&STREAM_IDENTIFIER)
}

fn oversized_chunk(kind: &str, length: usize) -> ArchiveError {
    ArchiveError::CorruptData(format!("{} Snappy chunk of {} bytes is too long", kind, length))
}

pub struct FramedSnappyReader<R> {
    inner: R,
    dialect: SnappyDialect,
    memory_limit: MemoryLimit,
    /// Uncompressed content of the current chunk.
    chunk: Vec<u8>,
    pos: usize,
    /// Unmasked checksum owed by the current chunk.
    expected: Option<u32>,
    finished: bool,
}

impl<R: Read> FramedSnappyReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        Self::with_dialect(source, SnappyDialect::Standard, options)
    }

    pub fn with_dialect(mut source: R, dialect: SnappyDialect, options: ReadOptions) -> Result<Self> {
        if dialect.requires_identifier() {
            let mut identifier = [0u8; 10];
            let n = read_fully(&mut source, &mut identifier)?;
            if identifier[..n] != STREAM_IDENTIFIER {
                return Err(ArchiveError::corrupt_header(0, "missing Snappy stream identifier"));
            }
        }
        Ok(FramedSnappyReader {
            inner: source,
            dialect,
            memory_limit: options.effective_memory_limit(),
            chunk: Vec::new(),
            pos: 0,
            expected: None,
            finished: false,
        })
    }

    pub fn dialect(&self) -> SnappyDialect {
        self.dialect
    }

    fn verify_chunk(&mut self) -> Result<()> {
        if let Some(expected) = self.expected.take() {
            let actual = Crc32c::checksum(&self.chunk);
            if actual != expected {
                return Err(ArchiveError::ChecksumMismatch {
                    entry: None,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn read_exact_or_end(&mut self, buf: &mut [u8]) -> Result<()> {
        if read_fully(&mut self.inner, buf)? < buf.len() {
            return Err(ArchiveError::UnexpectedEnd("Snappy"));
        }
        Ok(())
    }

    fn read_checksum(&mut self, length: usize) -> Result<u32> {
        if length < 4 {
            return Err(ArchiveError::CorruptData(format!(
                "data chunk of {} bytes has no room for its checksum",
                length
            )));
        }
        let mut crc = [0u8; 4];
        self.read_exact_or_end(&mut crc)?;
        Ok(unmask_checksum(u32::from_le_bytes(crc)))
    }

    /// Load the next data chunk; returns false at the end of the stream.
    fn next_chunk(&mut self) -> Result<bool> {
        loop {
            let mut header = [0u8; 4];
            match read_fully(&mut self.inner, &mut header)? {
                0 => return Ok(false),
                4 => {}
                _ => return Err(ArchiveError::UnexpectedEnd("Snappy")),
            }
            let chunk_type = header[0];
            let length = u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;

            match chunk_type {
                CHUNK_STREAM_IDENTIFIER => {
                    let mut body = [0u8; 6];
                    if length != body.len() {
                        return Err(ArchiveError::CorruptData("bad Snappy stream identifier length".into()));
                    }
                    self.read_exact_or_end(&mut body)?;
                    if body != STREAM_IDENTIFIER[4..] {
                        return Err(ArchiveError::CorruptData("bad Snappy stream identifier".into()));
                    }
                    debug!("Snappy stream identifier repeated, continuing");
                }
                CHUNK_COMPRESSED => {
                    if length > MAX_COMPRESSED_DATA + 4 {
                        return Err(oversized_chunk("compressed", length));
                    }
                    let expected = if self.dialect.checksums_compressed_chunks() {
                        Some(self.read_checksum(length)?)
                    } else {
                        None
                    };
                    let data_len = length - if expected.is_some() { 4 } else { 0 };
                    let mut block = self.memory_limit.allocate(data_len as u64)?;
                    self.read_exact_or_end(&mut block)?;
                    let (declared, _) = raw::uncompressed_length(&block)?;
                    if declared > MAX_CHUNK_DATA as u64 {
                        return Err(ArchiveError::CorruptData(format!(
                            "compressed Snappy chunk declares {} bytes, at most {} allowed",
                            declared, MAX_CHUNK_DATA
                        )));
                    }
                    self.chunk = raw::decompress(&block, self.memory_limit)?;
                    self.pos = 0;
                    self.expected = expected;
                    return Ok(true);
                }
                CHUNK_UNCOMPRESSED => {
                    if length > MAX_CHUNK_DATA + 4 {
                        return Err(oversized_chunk("uncompressed", length));
                    }
                    let expected = self.read_checksum(length)?;
                    let mut data = self.memory_limit.allocate(length as u64 - 4)?;
                    self.read_exact_or_end(&mut data)?;
                    self.chunk = data;
                    self.pos = 0;
                    self.expected = Some(expected);
                    return Ok(true);
                }
                CHUNK_PADDING | 0x80..=0xfd => {
                    debug!("Skipping Snappy chunk type {:#04x} ({} bytes)", chunk_type, length);
                    if skip(&mut self.inner, length as u64)? < length as u64 {
                        return Err(ArchiveError::UnexpectedEnd("Snappy"));
                    }
                }
                _ => {
                    return Err(ArchiveError::CorruptData(format!(
                        "unskippable Snappy chunk type {:#04x}",
                        chunk_type
                    )))
                }
            }
        }
    }

    fn read_decoded(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.pos == self.chunk.len() {
            if self.finished {
                return Ok(0);
            }
            self.verify_chunk()?;
            if !self.next_chunk()? {
                self.finished = true;
                self.chunk.clear();
                self.pos = 0;
                return Ok(0);
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for FramedSnappyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.read_decoded(buf)?)
    }
}
