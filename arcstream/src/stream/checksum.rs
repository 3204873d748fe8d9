//! Running checksums and the verifying reader built on them.

use std::fmt;
use std::io::{self, Read};

use crc::{Crc, Digest, CRC_32_ISCSI};

use crate::error::ArchiveError;

static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Incremental 32-bit checksum.
pub trait Checksum: Send {
    fn update(&mut self, data: &[u8]);

    /// Value of everything fed so far. The accumulator starts over afterwards.
    fn take_value(&mut self) -> u32;
}

/// CRC-32 (IEEE), as used by ZIP, gzip and ARJ.
pub struct Crc32(crc32fast::Hasher);

impl Crc32 {
    pub fn new() -> Self {
        Crc32(crc32fast::Hasher::new())
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn take_value(&mut self) -> u32 {
        std::mem::replace(&mut self.0, crc32fast::Hasher::new()).finalize()
    }
}

/// CRC-32C (Castagnoli), as used by the Snappy framing format.
pub struct Crc32c(Digest<'static, u32>);

impl Crc32c {
    pub fn new() -> Self {
        Crc32c(CASTAGNOLI.digest())
    }

    pub fn checksum(data: &[u8]) -> u32 {
        CASTAGNOLI.checksum(data)
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Crc32c {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn take_value(&mut self) -> u32 {
        std::mem::replace(&mut self.0, CASTAGNOLI.digest()).finalize()
    }
}

/// Wrapping sum of all bytes, the "crc" of the cpio `070702` format.
#[derive(Default)]
pub struct ByteSum(u32);

impl ByteSum {
    pub fn new() -> Self {
        ByteSum(0)
    }
}

impl Checksum for ByteSum {
    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.0 = self.0.wrapping_add(b as u32);
        }
    }

    fn take_value(&mut self) -> u32 {
        std::mem::take(&mut self.0)
    }
}

/// Feeds every byte read through a checksum and compares it with the
/// expected value once `threshold` bytes went through.
///
/// A source that ends before the threshold is reported as a truncated entry.
/// Without an expectation the verifier only computes.
pub struct ChecksumVerifier<R> {
    inner: R,
    checksum: Box<dyn Checksum>,
    expected: Option<u32>,
    threshold: u64,
    count: u64,
    entry: Option<String>,
    computed: Option<u32>,
}

impl<R> ChecksumVerifier<R> {
    pub fn new<C>(inner: R, checksum: C, threshold: u64, expected: u32) -> Self
    where
        C: Checksum + 'static,
    {
        ChecksumVerifier {
            inner,
            checksum: Box::new(checksum),
            expected: Some(expected),
            threshold,
            count: 0,
            entry: None,
            computed: None,
        }
    }

    /// Compute-only verifier, for formats whose expected value trails the data.
    pub fn computing<C>(inner: R, checksum: C) -> Self
    where
        C: Checksum + 'static,
    {
        ChecksumVerifier {
            inner,
            checksum: Box::new(checksum),
            expected: None,
            threshold: u64::MAX,
            count: 0,
            entry: None,
            computed: None,
        }
    }

    /// Name reported in mismatch errors.
    pub fn for_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Checksum of the bytes read so far. Calling it ends the computation;
    /// later calls return the same value.
    pub fn value(&mut self) -> u32 {
        *self
            .computed
            .get_or_insert_with(|| self.checksum.take_value())
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn verify(&mut self) -> io::Result<()> {
        let actual = self.value();
        match self.expected {
            Some(expected) if expected != actual => Err(ArchiveError::ChecksumMismatch {
                entry: self.entry.clone(),
                expected,
                actual,
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl<R: Read> Read for ChecksumVerifier<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let total = self.count.saturating_add(n as u64);
        if self.expected.is_some() && total > self.threshold {
            let entry = self.entry.as_deref().unwrap_or("stream");
            return Err(ArchiveError::CorruptData(format!(
                "{} declares {} bytes but yields at least {}",
                entry, self.threshold, total
            ))
            .into());
        }
        if self.computed.is_some() {
            return Ok(n);
        }
        if n > 0 {
            self.checksum.update(&buf[..n]);
            self.count += n as u64;
        }

        if self.count >= self.threshold {
            self.verify()?;
        } else if n == 0 && !buf.is_empty() && self.expected.is_some() {
            return Err(ArchiveError::TruncatedEntry {
                entry: self.entry.clone(),
                expected: self.threshold,
                actual: self.count,
            }
            .into());
        }
        Ok(n)
    }
}

impl<R> fmt::Debug for ChecksumVerifier<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumVerifier")
            .field("expected", &self.expected)
            .field("threshold", &self.threshold)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn known_values() {
        let mut crc = Crc32::new();
        crc.update(b"123456789");
        assert_eq!(crc.take_value(), 0xCBF4_3926);

        let mut crc = Crc32c::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.take_value(), 0xE306_9283);
        assert_eq!(Crc32c::checksum(b"123456789"), 0xE306_9283);

        let mut sum = ByteSum::new();
        sum.update(&[0xff, 0xff, 2]);
        assert_eq!(sum.take_value(), 0x200);
        assert_eq!(sum.take_value(), 0);
    }

    #[test]
    fn matching_checksum_passes() {
        let data = b"hello checksum".to_vec();
        let expected = crc32fast::hash(&data);
        let mut verifier =
            ChecksumVerifier::new(Cursor::new(data.clone()), Crc32::new(), data.len() as u64, expected);
        let mut out = Vec::new();
        verifier.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn any_single_byte_flip_is_detected() {
        let data: Vec<u8> = (0..64u8).collect();
        let expected = crc32fast::hash(&data);
        for i in 0..data.len() {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            let mut verifier = ChecksumVerifier::new(
                Cursor::new(corrupted),
                Crc32::new(),
                data.len() as u64,
                expected,
            )
            .for_entry("flip");
            let err = verifier.read_to_end(&mut Vec::new()).unwrap_err();
            assert!(matches!(
                ArchiveError::from(err),
                ArchiveError::ChecksumMismatch { expected: e, .. } if e == expected
            ));
        }
    }

    #[test]
    fn short_source_is_truncation() {
        let mut verifier = ChecksumVerifier::new(Cursor::new(vec![0u8; 10]), Crc32::new(), 20, 0);
        let err = verifier.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            ArchiveError::from(err),
            ArchiveError::TruncatedEntry { expected: 20, actual: 10, .. }
        ));
    }

    #[test]
    fn computing_mode_never_fails() {
        let mut verifier = ChecksumVerifier::computing(Cursor::new(b"123456789".to_vec()), Crc32::new());
        verifier.read_to_end(&mut Vec::new()).unwrap();
        assert_eq!(verifier.value(), 0xCBF4_3926);
        assert_eq!(verifier.value(), 0xCBF4_3926);
    }

    #[test]
    fn content_past_declared_size_fails() {
        let data = b"helloEXTRA".to_vec();
        let mut verifier =
            ChecksumVerifier::new(Cursor::new(data), Crc32::new(), 5, crc32fast::hash(b"hello"));
        let mut buf = [0u8; 5];
        verifier.read_exact(&mut buf).unwrap();
        let err = verifier.read(&mut buf).unwrap_err();
        assert!(matches!(ArchiveError::from(err), ArchiveError::CorruptData(_)));
    }
}
