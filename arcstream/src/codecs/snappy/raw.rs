//! Snappy block format: a varint uncompressed length followed by tagged
//! elements.
//!
//! | tag & 3 | element | length | offset |
//! |---|---|---|---|
//! | 0 | literal | `(tag >> 2) + 1`, or 1-4 trailing LE bytes + 1 when `tag >> 2 >= 60` | - |
//! | 1 | copy | `4 + ((tag >> 2) & 7)` | `(tag >> 5) << 8` + 1 byte |
//! | 2 | copy | `(tag >> 2) + 1` | u16 LE |
//! | 3 | copy | `(tag >> 2) + 1` | u32 LE |

use std::io::{self, Cursor, Read};

use crate::core::bytes::read_fully;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};

/// Most output one input byte can yield: a 3-byte copy-2 element emits 64.
const MAX_EXPANSION: u64 = 22;

fn corrupt(reason: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptData(reason.into())
}

/// Decode the leading varint, returns the value and its encoded length.
pub fn uncompressed_length(block: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in block.iter().enumerate().take(5) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u32::MAX as u64 {
                return Err(corrupt("Snappy length above 4 GiB"));
            }
            return Ok((value, i + 1));
        }
    }
    if block.len() < 5 {
        Err(ArchiveError::UnexpectedEnd("Snappy"))
    } else {
        Err(corrupt("Snappy length varint longer than 5 bytes"))
    }
}

struct Input<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Input<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or(ArchiveError::UnexpectedEnd("Snappy"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn le(&mut self, n: usize) -> Result<usize> {
        Ok(self
            .take(n)?
            .iter()
            .rev()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }
}

/// Decompress a whole block, checking the declared length against `limit`
/// and against what the elements can produce before allocating.
pub fn decompress(block: &[u8], limit: MemoryLimit) -> Result<Vec<u8>> {
    let (length, header_len) = uncompressed_length(block)?;
    limit.check_bytes(length)?;
    let elements = (block.len() - header_len) as u64;
    if length > elements.saturating_mul(MAX_EXPANSION) {
        return Err(corrupt(format!(
            "Snappy block of {} bytes cannot expand to the declared {} bytes",
            elements, length
        )));
    }
    let length = length as usize;
    let mut out = Vec::with_capacity(length);
    decompress_into(&block[header_len..], length, &mut out)?;
    Ok(out)
}

/// Decode the elements of a block (varint already stripped) and append
/// exactly `length` bytes to `out`.
pub fn decompress_into(elements: &[u8], length: usize, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    let mut input = Input { data: elements, pos: 0 };

    while input.pos < elements.len() {
        let tag = input.take(1)?[0];
        let (len, offset) = match tag & 3 {
            0 => {
                let short = (tag >> 2) as usize;
                let len = if short < 60 { short + 1 } else { input.le(short - 59)? + 1 };
                if out.len() - start + len > length {
                    return Err(corrupt("Snappy literal runs past the declared length"));
                }
                out.extend_from_slice(input.take(len)?);
                continue;
            }
            1 => (4 + ((tag >> 2) & 7) as usize, (((tag >> 5) as usize) << 8) | input.le(1)?),
            2 => ((tag >> 2) as usize + 1, input.le(2)?),
            _ => ((tag >> 2) as usize + 1, input.le(4)?),
        };

        let available = out.len() - start;
        if offset == 0 || offset > available {
            return Err(ArchiveError::IllegalBackReference {
                distance: offset as u64,
                available: available as u64,
            });
        }
        if available + len > length {
            return Err(corrupt("Snappy copy runs past the declared length"));
        }
        let from = out.len() - offset;
        for i in 0..len {
            let byte = out[from + i];
            out.push(byte);
        }
    }

    let produced = out.len() - start;
    if produced != length {
        return Err(corrupt(format!(
            "Snappy block produced {} bytes, header declares {}",
            produced, length
        )));
    }
    Ok(())
}

/// Reader over a single raw Snappy block. The block has no framing, so the
/// whole input is read and decoded before the first byte is returned.
pub struct RawSnappyReader {
    decoded: Cursor<Vec<u8>>,
}

impl RawSnappyReader {
    pub fn new<R: Read>(mut source: R, options: ReadOptions) -> Result<Self> {
        let limit = options.effective_memory_limit();
        let mut header = [0u8; 5];
        let n = read_fully(&mut source, &mut header)?;
        let (length, _) = uncompressed_length(&header[..n])?;
        limit.check_bytes(length)?;

        let mut block = header[..n].to_vec();
        source.read_to_end(&mut block)?;
        Ok(RawSnappyReader {
            decoded: Cursor::new(decompress(&block, limit)?),
        })
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.decoded.get_ref().len() as u64
    }
}

impl Read for RawSnappyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoded.read(buf)
    }
}
