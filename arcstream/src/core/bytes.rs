//! Field-level helpers shared by the header codecs.

use std::io::{self, Read, Write};

use crate::core::charset::Charset;
use crate::error::{ArchiveError, Result};

/// Fixed-size little-endian integers.
pub trait LeInt: Sized + Copy {
    const SIZE: usize;
    fn from_le_slice(bytes: &[u8]) -> Self;
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;

    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf[..Self::SIZE])?;
        Ok(Self::from_le_slice(&buf[..Self::SIZE]))
    }
}

macro_rules! le_int {
    ($($t:ty),*) => {$(
        impl LeInt for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }

            fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
                writer.write_all(&self.to_le_bytes())
            }
        }
    )*};
}

le_int!(u8, u16, u32, u64);

/// Read until `buf` is full or the source ends. Returns the byte count.
pub fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Discard up to `n` bytes, returns how many were actually skipped.
pub fn skip<R: Read + ?Sized>(reader: &mut R, n: u64) -> io::Result<u64> {
    io::copy(&mut reader.take(n), &mut io::sink())
}

/// Cursor over an already verified header buffer. Short reads are reported
/// as a corrupt header at `base + position`.
pub struct HeaderCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> HeaderCursor<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        HeaderCursor { data, pos: 0, base }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ArchiveError::corrupt_header(
                self.base + self.pos as u64,
                format!("field of {} bytes runs past the end of a {}-byte header", n, self.data.len()),
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read<T: LeInt>(&mut self) -> Result<T> {
        self.take(T::SIZE).map(T::from_le_slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.read::<u8>()
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.read::<u16>()
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.read::<u32>()
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.read::<u64>()
    }

    /// NUL-terminated string; a missing terminator consumes the rest.
    pub fn cstr(&mut self, charset: Charset) -> String {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0);
        let text = charset.decode(&rest[..end.unwrap_or(rest.len())]);
        self.pos += end.map_or(rest.len(), |e| e + 1);
        text
    }
}

/// Parse a space/NUL padded ASCII number in `radix`. Empty fields are zero.
pub fn parse_ascii_number(field: &[u8], radix: u32) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_ints() {
        let mut src: &[u8] = &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(u16::read_le(&mut src).unwrap(), 0x1234);
        assert_eq!(u32::read_le(&mut src).unwrap(), 0x1234_5678);

        let mut out = Vec::new();
        0xCAFEu16.write_le(&mut out).unwrap();
        assert_eq!(out, [0xFE, 0xCA]);
    }

    #[test]
    fn cursor_reports_offset() {
        let data = [1u8, 2, 3];
        let mut cursor = HeaderCursor::new(&data, 100);
        assert_eq!(cursor.u16().unwrap(), 0x0201);
        match cursor.u32() {
            Err(ArchiveError::CorruptHeader { offset, .. }) => assert_eq!(offset, 102),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cursor_cstr() {
        let data = b"abc\0def";
        let mut cursor = HeaderCursor::new(data, 0);
        assert_eq!(cursor.cstr(Charset::Cp437), "abc");
        assert_eq!(cursor.cstr(Charset::Cp437), "def");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn ascii_numbers() {
        assert_eq!(parse_ascii_number(b"0000644 \0", 8), Some(0o644));
        assert_eq!(parse_ascii_number(b"1234      ", 10), Some(1234));
        assert_eq!(parse_ascii_number(b"0000001A", 16), Some(26));
        assert_eq!(parse_ascii_number(b"        ", 10), Some(0));
        assert_eq!(parse_ascii_number(b"12x4", 10), None);
    }
}
