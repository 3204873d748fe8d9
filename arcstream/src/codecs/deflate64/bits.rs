use std::io::BufRead;

use crate::error::{ArchiveError, Result};

/// LSB-first bit reader that pulls one byte at a time from a `BufRead`, so
/// the source is never advanced past the byte holding the last bit used.
pub(crate) struct BitReader<R> {
    inner: R,
    buffer: u32,
    count: u32,
}

impl<R: BufRead> BitReader<R> {
    pub fn new(inner: R) -> Self {
        BitReader {
            inner,
            buffer: 0,
            count: 0,
        }
    }

    fn pull_byte(&mut self) -> Result<()> {
        let byte = match self.inner.fill_buf()?.first() {
            Some(&b) => b,
            None => return Err(ArchiveError::UnexpectedEnd("Deflate64")),
        };
        self.inner.consume(1);
        self.buffer |= (byte as u32) << self.count;
        self.count += 8;
        Ok(())
    }

    /// Read `n <= 16` bits, first bit in the lowest position.
    pub fn bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 16);
        while self.count < n {
            self.pull_byte()?;
        }
        let value = self.buffer & ((1u32 << n) - 1);
        self.buffer >>= n;
        self.count -= n;
        Ok(value)
    }

    pub fn bit(&mut self) -> Result<u32> {
        self.bits(1)
    }

    /// Drop the bits left in the current byte.
    pub fn align(&mut self) {
        let partial = self.count % 8;
        self.buffer >>= partial;
        self.count -= partial;
    }

    /// Copy whole bytes once aligned, buffered bytes first.
    pub fn read_aligned(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.count >= 8 {
            out[0] = self.bits(8)? as u8;
            return Ok(1);
        }
        let available = self.inner.fill_buf()?;
        if available.is_empty() {
            return Err(ArchiveError::UnexpectedEnd("Deflate64"));
        }
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.inner.consume(n);
        Ok(n)
    }
}

impl<R> BitReader<R> {
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
pub(crate) mod testing {
    /// LSB-first bit writer for building test streams.
    #[derive(Default)]
    pub struct BitWriter {
        pub bytes: Vec<u8>,
        acc: u64,
        count: u32,
    }

    impl BitWriter {
        pub fn bits(&mut self, value: u32, n: u32) {
            self.acc |= (value as u64) << self.count;
            self.count += n;
            while self.count >= 8 {
                self.bytes.push(self.acc as u8);
                self.acc >>= 8;
                self.count -= 8;
            }
        }

        /// Huffman codes go out most significant bit first.
        pub fn code(&mut self, code: u32, len: u32) {
            for i in (0..len).rev() {
                self.bits((code >> i) & 1, 1);
            }
        }

        pub fn align(&mut self) {
            if self.count > 0 {
                self.bits(0, 8 - self.count);
            }
        }

        pub fn finish(mut self) -> Vec<u8> {
            if self.count > 0 {
                self.bytes.push(self.acc as u8);
            }
            self.bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_lsb_first_without_overreading() {
        let data = [0b1010_1100u8, 0xff, 0x42];
        let mut reader = BitReader::new(&data[..]);
        assert_eq!(reader.bits(3).unwrap(), 0b100);
        assert_eq!(reader.bits(5).unwrap(), 0b10101);
        assert_eq!(reader.bits(4).unwrap(), 0xf);
        reader.align();
        assert_eq!(*reader.get_ref(), &[0x42u8][..]);
    }

    #[test]
    fn end_of_input() {
        let mut reader = BitReader::new(&[0x01u8][..]);
        assert!(matches!(reader.bits(9), Err(ArchiveError::UnexpectedEnd(_))));
    }
}
