//! Canonical Huffman tables.
//!
//! Codes are assigned in canonical order: shorter codes first, equal lengths
//! in symbol order, `next_code[len] = (next_code[len - 1] + count[len - 1]) << 1`.
//! Decoding walks the code one bit at a time against the per-length counts,
//! which is equivalent to that assignment without materialising the codes.

use std::io::BufRead;
use std::sync::OnceLock;

use crate::codecs::deflate64::bits::BitReader;
use crate::error::{ArchiveError, Result};

pub const MAX_BITS: usize = 15;

#[derive(Debug, Clone)]
pub struct HuffmanTable {
    counts: [u16; MAX_BITS + 1],
    /// Symbols ordered by code length, then symbol value.
    symbols: Vec<u16>,
}

impl HuffmanTable {
    /// Build a table from per-symbol code lengths (0 = unused). Incomplete
    /// codes are accepted, over-subscribed ones are not.
    pub fn new(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; MAX_BITS + 1];
        for &len in lengths {
            if len as usize > MAX_BITS {
                return Err(ArchiveError::CorruptData(format!("Huffman code length {} above {}", len, MAX_BITS)));
            }
            counts[len as usize] += 1;
        }
        counts[0] = 0;

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left <<= 1;
            left -= count as i32;
            if left < 0 {
                return Err(ArchiveError::CorruptData("over-subscribed Huffman code lengths".into()));
            }
        }

        let mut offsets = [0u16; MAX_BITS + 2];
        for len in 1..=MAX_BITS {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let mut symbols = vec![0u16; offsets[MAX_BITS + 1] as usize];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[offsets[len as usize] as usize] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }
        Ok(HuffmanTable { counts, symbols })
    }

    pub(crate) fn decode<R: BufRead>(&self, bits: &mut BitReader<R>) -> Result<u16> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_BITS {
            code |= bits.bit()? as i32;
            let count = self.counts[len] as i32;
            if code - count < first {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(ArchiveError::CorruptData("invalid Huffman code".into()))
    }
}

/// Canonical code of every symbol (0 for unused ones).
pub fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut bl_count = [0u32; MAX_BITS + 1];
    for &len in lengths {
        if len > 0 {
            bl_count[len as usize] += 1;
        }
    }
    let mut next_code = [0u32; MAX_BITS + 1];
    let mut code = 0u32;
    for len in 1..=MAX_BITS {
        code = (code + bl_count[len - 1]) << 1;
        next_code[len] = code;
    }
    lengths
        .iter()
        .map(|&len| {
            if len == 0 {
                return 0;
            }
            let code = next_code[len as usize];
            next_code[len as usize] += 1;
            code
        })
        .collect()
}

pub(crate) fn fixed_literal_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    lengths
}

/// Fixed literal/length and distance tables, built once.
pub(crate) fn fixed_tables() -> &'static (HuffmanTable, HuffmanTable) {
    static FIXED: OnceLock<(HuffmanTable, HuffmanTable)> = OnceLock::new();
    FIXED.get_or_init(|| {
        let literals = HuffmanTable::new(&fixed_literal_lengths());
        let distances = HuffmanTable::new(&[5u8; 32]);
        match (literals, distances) {
            (Ok(l), Ok(d)) => (l, d),
            _ => unreachable!("fixed code lengths are complete"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::deflate64::bits::testing::BitWriter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn rfc1951_example() {
        // Lengths (3, 3, 3, 3, 3, 2, 4, 4) for A..H
        let codes = canonical_codes(&[3, 3, 3, 3, 3, 2, 4, 4]);
        assert_eq!(codes, vec![0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111]);
    }

    #[test]
    fn over_subscribed_is_rejected() {
        assert!(HuffmanTable::new(&[1, 1, 1]).is_err());
        assert!(HuffmanTable::new(&[16]).is_err());
    }

    /// Random complete code: start with one leaf and split random leaves.
    fn random_lengths(rng: &mut StdRng, symbols: usize) -> Vec<u8> {
        let leaves = rng.random_range(2..=symbols);
        let mut depths = vec![0u8];
        while depths.len() < leaves {
            let i = rng.random_range(0..depths.len());
            if depths[i] as usize >= MAX_BITS {
                if depths.iter().all(|&d| d as usize >= MAX_BITS) {
                    break;
                }
                continue;
            }
            let d = depths.swap_remove(i) + 1;
            depths.push(d);
            depths.push(d);
        }
        let mut lengths = vec![0u8; symbols];
        let mut slots: Vec<usize> = (0..symbols).collect();
        for depth in depths {
            let slot = slots.swap_remove(rng.random_range(0..slots.len()));
            lengths[slot] = depth;
        }
        lengths
    }

    #[test]
    fn canonical_codes_decode_back() {
        let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
        for _ in 0..200 {
            let lengths = random_lengths(&mut rng, 300);
            let table = HuffmanTable::new(&lengths).unwrap();
            let codes = canonical_codes(&lengths);
            let used: Vec<usize> = (0..lengths.len()).filter(|&s| lengths[s] > 0).collect();

            let message: Vec<usize> = (0..500).map(|_| used[rng.random_range(0..used.len())]).collect();
            let mut writer = BitWriter::default();
            for &symbol in &message {
                writer.code(codes[symbol], lengths[symbol] as u32);
            }
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes[..]);
            for &symbol in &message {
                assert_eq!(table.decode(&mut reader).unwrap() as usize, symbol);
            }
        }
    }
}
