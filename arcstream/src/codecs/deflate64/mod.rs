//! Deflate64 ("enhanced deflate", ZIP method 9) decoder.
//!
//! Same block structure as Deflate with three differences: a 64 KiB window,
//! length symbol 285 carrying 16 extra bits on top of a base of 3, and the
//! distance codes 30 and 31 (32769 and 49153, 14 extra bits each).
//!
//! Block state machine: `Initial` reads the final bit and the block type and
//! moves to `Stored` or `Codes`; both return to `Initial` at the end of the
//! block, or to `Done` after the final one.

mod bits;
mod huffman;

pub use huffman::{canonical_codes, HuffmanTable};

use std::fmt;
use std::io::{self, BufRead, Read};

use log::trace;

use crate::core::memory::MemoryLimit;
use crate::error::{ArchiveError, Result};
use bits::BitReader;
use huffman::fixed_tables;

/// History kept by the decoder.
pub const WINDOW_SIZE: usize = 1 << 16;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;
const END_OF_BLOCK: u16 = 256;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 3,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 16,
];
const DIST_BASE: [u32; 32] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577, 32769, 49153,
];
const DIST_EXTRA: [u8; 32] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13, 14, 14,
];
const CODE_LENGTH_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];
const MAX_LITERAL_CODES: usize = 286;
const MAX_DISTANCE_CODES: usize = 32;

/// The last 64 KiB of output.
struct History {
    window: Vec<u8>,
    pos: usize,
    total: u64,
}

impl History {
    fn new() -> Self {
        History {
            window: vec![0u8; WINDOW_SIZE],
            pos: 0,
            total: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) & WINDOW_MASK;
        self.total += 1;
    }

    fn available(&self) -> u64 {
        self.total.min(WINDOW_SIZE as u64)
    }

    fn back(&self, distance: usize) -> u8 {
        self.window[self.pos.wrapping_sub(distance) & WINDOW_MASK]
    }
}

enum Codes {
    Fixed,
    Dynamic(Box<(HuffmanTable, HuffmanTable)>),
}

enum State {
    Initial,
    Stored { remaining: usize },
    Codes(Codes),
    Done,
}

/// Streaming Deflate64 decoder over a buffered source.
///
/// The source is advanced bit-exactly: after the final block only the byte
/// holding its last bit has been consumed.
pub struct Deflate64Decoder<R> {
    bits: BitReader<R>,
    history: History,
    state: State,
    final_block: bool,
    /// Back-reference cut short by a full output buffer: (length, distance).
    pending: Option<(usize, usize)>,
}

impl<R: BufRead> Deflate64Decoder<R> {
    pub fn new(inner: R) -> Self {
        Deflate64Decoder {
            bits: BitReader::new(inner),
            history: History::new(),
            state: State::Initial,
            final_block: false,
            pending: None,
        }
    }

    /// Check the window allocation against `limit` first.
    pub fn with_memory_limit(inner: R, limit: MemoryLimit) -> Result<Self> {
        limit.check_bytes(WINDOW_SIZE as u64)?;
        Ok(Self::new(inner))
    }

    /// Total bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.history.total
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }

    fn read_block_header(&mut self) -> Result<()> {
        self.final_block = self.bits.bit()? == 1;
        let block_type = self.bits.bits(2)?;
        trace!("Deflate64 block type {} (final: {})", block_type, self.final_block);
        self.state = match block_type {
            0 => {
                self.bits.align();
                let len = self.bits.bits(16)?;
                let nlen = self.bits.bits(16)?;
                if len != !nlen & 0xffff {
                    return Err(ArchiveError::CorruptData(format!(
                        "stored block length {:#06x} does not match its complement {:#06x}",
                        len, nlen
                    )));
                }
                State::Stored { remaining: len as usize }
            }
            1 => State::Codes(Codes::Fixed),
            2 => State::Codes(Codes::Dynamic(Box::new(self.read_dynamic_tables()?))),
            _ => return Err(ArchiveError::CorruptData("reserved Deflate64 block type".into())),
        };
        Ok(())
    }

    fn read_dynamic_tables(&mut self) -> Result<(HuffmanTable, HuffmanTable)> {
        let hlit = self.bits.bits(5)? as usize + 257;
        let hdist = self.bits.bits(5)? as usize + 1;
        let hclen = self.bits.bits(4)? as usize + 4;
        if hlit > MAX_LITERAL_CODES || hdist > MAX_DISTANCE_CODES {
            return Err(ArchiveError::CorruptData(format!(
                "too many codes: {} literal/length, {} distance",
                hlit, hdist
            )));
        }

        let mut code_length_lengths = [0u8; 19];
        for &index in &CODE_LENGTH_ORDER[..hclen] {
            code_length_lengths[index] = self.bits.bits(3)? as u8;
        }
        let code_lengths = HuffmanTable::new(&code_length_lengths)?;

        let total = hlit + hdist;
        let mut lengths = Vec::with_capacity(total);
        while lengths.len() < total {
            let symbol = code_lengths.decode(&mut self.bits)?;
            let (value, repeat) = match symbol {
                0..=15 => (symbol as u8, 1),
                16 => {
                    let previous = *lengths.last().ok_or_else(|| {
                        ArchiveError::CorruptData("repeat code without a previous length".into())
                    })?;
                    (previous, 3 + self.bits.bits(2)? as usize)
                }
                17 => (0, 3 + self.bits.bits(3)? as usize),
                _ => (0, 11 + self.bits.bits(7)? as usize),
            };
            if lengths.len() + repeat > total {
                return Err(ArchiveError::CorruptData("code lengths overflow the table".into()));
            }
            lengths.extend(std::iter::repeat_n(value, repeat));
        }

        if lengths[END_OF_BLOCK as usize] == 0 {
            return Err(ArchiveError::CorruptData("no code for end of block".into()));
        }
        Ok((
            HuffmanTable::new(&lengths[..hlit])?,
            HuffmanTable::new(&lengths[hlit..])?,
        ))
    }

    /// Copy up to `out.len()` bytes of a back-reference, returns the number
    /// copied and stores the rest as pending.
    fn copy_match(&mut self, out: &mut [u8], length: usize, distance: usize) -> usize {
        let n = length.min(out.len());
        for slot in out.iter_mut().take(n) {
            let byte = self.history.back(distance);
            self.history.push(byte);
            *slot = byte;
        }
        self.pending = (n < length).then_some((length - n, distance));
        n
    }

    fn decode_into(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() {
            if let Some((length, distance)) = self.pending.take() {
                written += self.copy_match(&mut out[written..], length, distance);
                continue;
            }

            match &mut self.state {
                State::Done => break,
                State::Initial => {
                    if self.final_block {
                        self.state = State::Done;
                    } else {
                        self.read_block_header()?;
                    }
                }
                State::Stored { remaining } => {
                    if *remaining == 0 {
                        self.state = State::Initial;
                        continue;
                    }
                    let want = (*remaining).min(out.len() - written);
                    let n = self.bits.read_aligned(&mut out[written..written + want])?;
                    *remaining -= n;
                    for &byte in &out[written..written + n] {
                        self.history.push(byte);
                    }
                    written += n;
                }
                State::Codes(codes) => {
                    let (literals, distances) = match codes {
                        Codes::Fixed => {
                            let (l, d) = fixed_tables();
                            (l, d)
                        }
                        Codes::Dynamic(tables) => (&tables.0, &tables.1),
                    };
                    let symbol = literals.decode(&mut self.bits)?;
                    if symbol < END_OF_BLOCK {
                        self.history.push(symbol as u8);
                        out[written] = symbol as u8;
                        written += 1;
                        continue;
                    }
                    if symbol == END_OF_BLOCK {
                        self.state = State::Initial;
                        continue;
                    }

                    let index = (symbol - 257) as usize;
                    if index >= LENGTH_BASE.len() {
                        return Err(ArchiveError::CorruptData(format!("invalid length symbol {}", symbol)));
                    }
                    let length = LENGTH_BASE[index] as usize
                        + self.bits.bits(LENGTH_EXTRA[index] as u32)? as usize;

                    let code = distances.decode(&mut self.bits)? as usize;
                    if code >= DIST_BASE.len() {
                        return Err(ArchiveError::CorruptData(format!("invalid distance symbol {}", code)));
                    }
                    let distance =
                        DIST_BASE[code] as usize + self.bits.bits(DIST_EXTRA[code] as u32)? as usize;
                    let available = self.history.available();
                    if distance as u64 > available {
                        return Err(ArchiveError::IllegalBackReference {
                            distance: distance as u64,
                            available,
                        });
                    }
                    self.pending = Some((length, distance));
                }
            }
        }
        Ok(written)
    }
}

impl<R> Deflate64Decoder<R> {
    pub fn get_ref(&self) -> &R {
        self.bits.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.bits.get_mut()
    }

    pub fn into_inner(self) -> R {
        self.bits.into_inner()
    }
}

impl<R: BufRead> Read for Deflate64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.decode_into(buf)?)
    }
}

impl<R> fmt::Debug for Deflate64Decoder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deflate64Decoder")
            .field("total_out", &self.history.total)
            .field("final_block", &self.final_block)
            .finish()
    }
}
