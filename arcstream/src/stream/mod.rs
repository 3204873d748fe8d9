//! Reader wrappers composed by ownership: an archive reader owns its source,
//! lends it to one entry stream at a time and takes it back when the entry
//! is closed.

pub mod bounded;
pub mod checksum;

use std::io::{self, BufRead, Read};

use crate::error::ArchiveError;

pub use bounded::{BoundedReader, ReadStatus};
pub use checksum::{ByteSum, Checksum, ChecksumVerifier, Crc32, Crc32c};

/// Counts bytes taken from the wrapped source.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        CountingReader { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.count += amt as u64;
    }
}

/// Content stream of one entry with a known stored length.
pub(crate) enum EntryStream<R> {
    Plain(BoundedReader<R>),
    Verified(ChecksumVerifier<BoundedReader<R>>),
}

/// Content stream that borrows an archive's source for the span of one entry.
pub(crate) trait LentSource<R>: Read {
    /// Skip whatever is left of the entry.
    fn drain(&mut self) -> io::Result<u64>;

    fn source_ref(&self) -> &R;

    fn into_source(self) -> R;
}

impl<R> EntryStream<R> {
    fn bounded(&mut self) -> &mut BoundedReader<R> {
        match self {
            EntryStream::Plain(b) => b,
            EntryStream::Verified(v) => v.get_mut(),
        }
    }
}

impl<R: Read> Read for EntryStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryStream::Plain(b) => b.read(buf),
            EntryStream::Verified(v) => v.read(buf),
        }
    }
}

impl<R: Read> LentSource<R> for EntryStream<R> {
    /// Skipped bytes are not verified, but a source that ends early still
    /// fails.
    fn drain(&mut self) -> io::Result<u64> {
        self.bounded().drain()
    }

    fn source_ref(&self) -> &R {
        match self {
            EntryStream::Plain(b) => b.get_ref(),
            EntryStream::Verified(v) => v.get_ref().get_ref(),
        }
    }

    fn into_source(self) -> R {
        match self {
            EntryStream::Plain(b) => b.into_inner(),
            EntryStream::Verified(v) => v.into_inner().into_inner(),
        }
    }
}

/// Where an archive reader's source currently lives.
pub(crate) enum EntrySlot<R, S = EntryStream<R>> {
    Idle(R),
    Open(S),
    /// Only observable after a panic while switching states.
    Gone,
}

impl<R: Read, S: LentSource<R>> EntrySlot<R, S> {
    pub fn new(source: R) -> Self {
        EntrySlot::Idle(source)
    }

    /// Drain the open entry and let `inspect` look at it before the source
    /// is taken back. `None` when no entry was open.
    pub fn close<T>(&mut self, inspect: impl FnOnce(&mut S) -> T) -> io::Result<Option<T>> {
        let EntrySlot::Open(stream) = self else {
            return Ok(None);
        };
        stream.drain()?;
        let summary = inspect(stream);
        if let EntrySlot::Open(stream) = std::mem::replace(self, EntrySlot::Gone) {
            *self = EntrySlot::Idle(stream.into_source());
        }
        Ok(Some(summary))
    }

    /// Close the current entry, draining what is left of it, and lend out
    /// the source.
    pub fn source(&mut self) -> io::Result<&mut R> {
        self.close(|_| ())?;
        match self {
            EntrySlot::Idle(source) => Ok(source),
            _ => Err(io::Error::other("archive source is no longer available")),
        }
    }

    /// Hand the source to a new entry stream.
    pub fn open(&mut self, build: impl FnOnce(R) -> S) -> io::Result<()> {
        self.source()?;
        if let EntrySlot::Idle(source) = std::mem::replace(self, EntrySlot::Gone) {
            *self = EntrySlot::Open(build(source));
        }
        Ok(())
    }

    pub fn get_ref(&self) -> Option<&R> {
        match self {
            EntrySlot::Idle(source) => Some(source),
            EntrySlot::Open(stream) => Some(stream.source_ref()),
            EntrySlot::Gone => None,
        }
    }
}

impl<R: Read, S: LentSource<R>> Read for EntrySlot<R, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntrySlot::Open(stream) => stream.read(buf),
            _ => Err(ArchiveError::NoCurrentEntry.into()),
        }
    }
}
