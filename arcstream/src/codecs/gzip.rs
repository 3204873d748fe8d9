//! gzip (RFC 1952) reader.
//!
//! Headers are parsed here so their metadata is available; member bodies go
//! through `flate2`'s raw deflate decoder, which consumes exactly the
//! compressed bytes from the buffered source and leaves the trailer in place.
//! Every member's CRC-32 and ISIZE are checked. Concatenated members are
//! decoded as one stream unless the reader is built with
//! [`GzipReader::single_member`].

use std::io::{self, BufRead, Read};

use flate2::bufread::DeflateDecoder;
use log::debug;

use crate::core::charset::Charset;
use crate::core::memory::MemoryLimit;
use crate::core::options::ReadOptions;
use crate::error::{ArchiveError, Result};
use crate::stream::{ChecksumVerifier, Crc32};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FTEXT: u8 = 0x01;
const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const RESERVED_FLAGS: u8 = 0xe0;

/// Metadata of one gzip member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    /// Seconds since the epoch, 0 when not recorded.
    pub modification_time: u32,
    pub filename: Option<String>,
    pub comment: Option<String>,
    pub extra: Option<Vec<u8>>,
    pub operating_system: u8,
    pub text: bool,
    pub extra_flags: u8,
}

pub fn matches(signature: &[u8]) -> bool {
    signature.len() >= 3 && signature[..2] == GZIP_MAGIC && signature[2] == METHOD_DEFLATE
}

/// Header bytes pass through here so FHCRC can be checked.
struct HeaderSource<'a, R> {
    inner: &'a mut R,
    crc: crc32fast::Hasher,
}

impl<R: BufRead> HeaderSource<'_, R> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| ArchiveError::UnexpectedEnd("gzip header"))?;
        self.crc.update(&buf);
        Ok(buf)
    }

    /// NUL-terminated Latin-1 field, checked against `limit` as it grows.
    fn cstr(&mut self, limit: MemoryLimit) -> Result<String> {
        let mut text = Vec::new();
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Err(ArchiveError::UnexpectedEnd("gzip header"));
            }
            let (used, terminated) = match available.iter().position(|&b| b == 0) {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            limit.check_bytes((text.len() + used) as u64)?;
            text.extend_from_slice(&available[..used]);
            self.inner.consume(used);
            if terminated {
                break;
            }
        }
        self.crc.update(&text);
        text.pop();
        Ok(Charset::Latin1.decode(&text))
    }
}

/// Parse a member header; `None` when the source is already exhausted.
fn read_header<R: BufRead>(source: &mut R, limit: MemoryLimit) -> Result<Option<GzipHeader>> {
    if source.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let mut src = HeaderSource {
        inner: source,
        crc: crc32fast::Hasher::new(),
    };
    let fixed: [u8; 10] = src.bytes()?;
    if fixed[..2] != GZIP_MAGIC {
        return Err(ArchiveError::corrupt_header(0, "missing gzip magic"));
    }
    if fixed[2] != METHOD_DEFLATE {
        return Err(ArchiveError::UnsupportedMethod {
            entry: None,
            method: format!("gzip method {}", fixed[2]),
        });
    }
    let flags = fixed[3];
    if flags & RESERVED_FLAGS != 0 {
        return Err(ArchiveError::corrupt_header(3, "reserved gzip flags set"));
    }

    let mut header = GzipHeader {
        modification_time: u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
        extra_flags: fixed[8],
        operating_system: fixed[9],
        text: flags & FTEXT != 0,
        ..GzipHeader::default()
    };
    if flags & FEXTRA != 0 {
        let len = u16::from_le_bytes(src.bytes()?) as u64;
        let mut extra = limit.allocate(len)?;
        src.inner
            .read_exact(&mut extra)
            .map_err(|_| ArchiveError::UnexpectedEnd("gzip header"))?;
        src.crc.update(&extra);
        header.extra = Some(extra);
    }
    if flags & FNAME != 0 {
        header.filename = Some(src.cstr(limit)?);
    }
    if flags & FCOMMENT != 0 {
        header.comment = Some(src.cstr(limit)?);
    }
    if flags & FHCRC != 0 {
        let expected = src.crc.clone().finalize() & 0xffff;
        let stored = u16::from_le_bytes(src.bytes()?) as u32;
        if stored != expected {
            return Err(ArchiveError::ChecksumMismatch {
                entry: header.filename.clone(),
                expected: stored,
                actual: expected,
            });
        }
    }
    Ok(Some(header))
}

enum Member<R> {
    Body(ChecksumVerifier<DeflateDecoder<R>>),
    Between(R),
    Done(R),
    Gone,
}

pub struct GzipReader<R> {
    member: Member<R>,
    header: GzipHeader,
    members: u64,
    concatenated: bool,
    memory_limit: MemoryLimit,
}

impl<R: BufRead> GzipReader<R> {
    pub fn new(source: R, options: ReadOptions) -> Result<Self> {
        Self::build(source, options, true)
    }

    /// Stop after the first member, leaving anything behind it unread.
    pub fn single_member(source: R, options: ReadOptions) -> Result<Self> {
        Self::build(source, options, false)
    }

    fn build(mut source: R, options: ReadOptions, concatenated: bool) -> Result<Self> {
        let memory_limit = options.effective_memory_limit();
        let header = read_header(&mut source, memory_limit)?
            .ok_or(ArchiveError::UnexpectedEnd("gzip header"))?;
        Ok(GzipReader {
            member: Member::Body(ChecksumVerifier::computing(DeflateDecoder::new(source), Crc32::new())),
            header,
            members: 1,
            concatenated,
            memory_limit,
        })
    }

    /// Header of the member currently being decoded.
    pub fn header(&self) -> &GzipHeader {
        &self.header
    }

    pub fn members(&self) -> u64 {
        self.members
    }

    /// Check the trailer of the member that just ended.
    fn finish_member(&mut self, mut body: ChecksumVerifier<DeflateDecoder<R>>) -> Result<R> {
        let crc = body.value();
        let size = body.bytes_read();
        let mut source = body.into_inner().into_inner();
        let mut trailer = [0u8; 8];
        source
            .read_exact(&mut trailer)
            .map_err(|_| ArchiveError::UnexpectedEnd("gzip trailer"))?;

        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if expected_crc != crc {
            return Err(ArchiveError::ChecksumMismatch {
                entry: self.header.filename.clone(),
                expected: expected_crc,
                actual: crc,
            });
        }
        let expected_size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if expected_size != size as u32 {
            return Err(ArchiveError::TruncatedEntry {
                entry: self.header.filename.clone(),
                expected: expected_size as u64,
                actual: size,
            });
        }
        debug!("gzip member {} ok ({} bytes)", self.members, size);
        Ok(source)
    }

    fn read_decoded(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match std::mem::replace(&mut self.member, Member::Gone) {
                Member::Body(mut body) => {
                    let n = match body.read(buf) {
                        Ok(n) => n,
                        Err(e) => {
                            self.member = Member::Body(body);
                            return Err(e.into());
                        }
                    };
                    if n > 0 {
                        self.member = Member::Body(body);
                        return Ok(n);
                    }
                    let source = self.finish_member(body)?;
                    self.member = if self.concatenated {
                        Member::Between(source)
                    } else {
                        Member::Done(source)
                    };
                }
                Member::Between(mut source) => match read_header(&mut source, self.memory_limit)? {
                    Some(header) => {
                        self.header = header;
                        self.members += 1;
                        self.member = Member::Body(ChecksumVerifier::computing(
                            DeflateDecoder::new(source),
                            Crc32::new(),
                        ));
                    }
                    None => self.member = Member::Done(source),
                },
                done @ Member::Done(_) => {
                    self.member = done;
                    return Ok(0);
                }
                Member::Gone => {
                    return Err(ArchiveError::CorruptData("gzip stream failed earlier".into()))
                }
            }
        }
    }

    /// The underlying source, once the stream has been read to its end.
    pub fn into_inner(self) -> Option<R> {
        match self.member {
            Member::Done(source) | Member::Between(source) => Some(source),
            _ => None,
        }
    }
}

impl<R: BufRead> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.read_decoded(buf)?)
    }
}
