//! Read window over a shared source.
//!
//! # Invariants
//! - `consumed <= max` after every call.
//! - Once `consumed == max` reads return 0 without touching the source, so an
//!   entry can never read into the next header.
//! - The source is handed back on [`BoundedReader::close`] unless the reader
//!   was configured to propagate close, in which case it is dropped.

use std::fmt;
use std::io::{self, BufRead, Read};

use crate::error::ArchiveError;

/// State passed to the after-read hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    /// Bytes returned by the call that fired the hook (0 at end of data).
    pub read: usize,
    pub consumed: u64,
    pub max: u64,
    /// The source returned end-of-data while the window was still open.
    pub source_exhausted: bool,
}

pub type AfterRead = Box<dyn FnMut(&ReadStatus) -> io::Result<()> + Send>;

pub struct BoundedReader<R> {
    inner: R,
    max: u64,
    consumed: u64,
    propagate_close: bool,
    after_read: Option<AfterRead>,
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, max: u64) -> Self {
        BoundedReader {
            inner,
            max,
            consumed: 0,
            propagate_close: false,
            after_read: None,
        }
    }

    /// Window with no practical upper bound, for content whose length is
    /// only discovered by decoding it.
    pub fn unbounded(inner: R) -> Self {
        Self::new(inner, u64::MAX)
    }

    pub fn propagate_close(mut self, propagate: bool) -> Self {
        self.propagate_close = propagate;
        self
    }

    /// Install a hook fired after every `read` call, including the ones
    /// returning end-of-data, and whenever `fill_buf` reaches the end of the
    /// window or of the source.
    pub fn after_read<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ReadStatus) -> io::Result<()> + Send + 'static,
    {
        self.after_read = Some(Box::new(hook));
        self
    }

    /// Hook that turns a source ending inside the window into
    /// [`ArchiveError::TruncatedEntry`].
    pub fn truncation_guard(self, entry: Option<String>) -> Self {
        self.after_read(move |status| {
            if status.source_exhausted && status.consumed < status.max {
                return Err(ArchiveError::TruncatedEntry {
                    entry: entry.clone(),
                    expected: status.max,
                    actual: status.consumed,
                }
                .into());
            }
            Ok(())
        })
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn remaining(&self) -> u64 {
        self.max - self.consumed
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

    /// Close the window. Returns the source for the next entry unless close
    /// propagation was requested.
    pub fn close(self) -> Option<R> {
        if self.propagate_close {
            None
        } else {
            Some(self.inner)
        }
    }
}

fn fire(hook: &mut Option<AfterRead>, status: ReadStatus) -> io::Result<()> {
    match hook {
        Some(hook) => hook(&status),
        None => Ok(()),
    }
}

impl<R: Read> BoundedReader<R> {
    /// Skip to the end of the window, returns the number of bytes skipped.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.max - self.consumed;
        let (n, source_exhausted) = if remaining == 0 || buf.is_empty() {
            (0, false)
        } else {
            let limit = remaining.min(buf.len() as u64) as usize;
            let n = self.inner.read(&mut buf[..limit])?;
            self.consumed += n as u64;
            (n, n == 0)
        };

        fire(
            &mut self.after_read,
            ReadStatus {
                read: n,
                consumed: self.consumed,
                max: self.max,
                source_exhausted,
            },
        )?;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for BoundedReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let remaining = self.max - self.consumed;
        let status = |source_exhausted| ReadStatus {
            read: 0,
            consumed: self.consumed,
            max: self.max,
            source_exhausted,
        };
        if remaining == 0 {
            fire(&mut self.after_read, status(false))?;
            return Ok(&[]);
        }

        let available = self.inner.fill_buf()?.len();
        if available == 0 {
            fire(&mut self.after_read, status(true))?;
            return Ok(&[]);
        }
        let n = remaining.min(available as u64) as usize;
        Ok(&self.inner.fill_buf()?[..n])
    }

    fn consume(&mut self, amt: usize) {
        let amt = (amt as u64).min(self.max - self.consumed);
        self.inner.consume(amt as usize);
        self.consumed += amt;
    }
}

impl<R> fmt::Debug for BoundedReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedReader")
            .field("max", &self.max)
            .field("consumed", &self.consumed)
            .field("propagate_close", &self.propagate_close)
            .finish()
    }
}
