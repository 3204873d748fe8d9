//! Error types shared by every reader in the crate.
//!
//! Readers implement `std::io::Read`, so a failure raised while streaming
//! content travels inside an `io::Error`. `From<io::Error> for ArchiveError`
//! unwraps it again, which means callers working with `arcstream::Result`
//! always get the typed variant back.

use std::fmt;
use std::io;
use thiserror::Error;

/// Archive capabilities that are recognised but refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Encryption,
    MultiVolume,
    SplitArchive,
    /// Stored ZIP entry whose size only appears in a trailing data descriptor.
    StoredWithDataDescriptor,
    SparseFile,
    /// Entries or archives past the 4 GiB / 65535-entry limits on output.
    Zip64Output,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Encryption => "encryption",
            Feature::MultiVolume => "multi-volume archives",
            Feature::SplitArchive => "split archives",
            Feature::StoredWithDataDescriptor => "stored entries with a data descriptor",
            Feature::SparseFile => "sparse files",
            Feature::Zip64Output => "Zip64 output",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Corrupt header at offset {offset}: {reason}")]
    CorruptHeader { offset: u64, reason: String },

    #[error("Truncated entry{}: expected {expected} bytes, got {actual}", named(.entry))]
    TruncatedEntry {
        entry: Option<String>,
        expected: u64,
        actual: u64,
    },

    #[error("Checksum mismatch{}: expected {expected:#010x}, computed {actual:#010x}", describe(.entry))]
    ChecksumMismatch {
        entry: Option<String>,
        expected: u32,
        actual: u32,
    },

    #[error("Unsupported compression method {method}{}", describe(.entry))]
    UnsupportedMethod { entry: Option<String>, method: String },

    #[error("Unsupported feature: {feature}{}", describe(.entry))]
    UnsupportedFeature {
        entry: Option<String>,
        feature: Feature,
    },

    #[error("Memory limit exceeded: {requested_kib} KiB requested, limit is {limit_kib} KiB")]
    MemoryLimitExceeded { requested_kib: u64, limit_kib: u64 },

    #[error("Illegal back-reference: distance {distance} with only {available} bytes of history")]
    IllegalBackReference { distance: u64, available: u64 },

    #[error("Corrupt compressed data: {0}")]
    CorruptData(String),

    #[error("Unexpected end of {0} stream")]
    UnexpectedEnd(&'static str),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("No current entry")]
    NoCurrentEntry,

    #[error(transparent)]
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

fn named(entry: &Option<String>) -> String {
    match entry {
        Some(name) => format!(" '{}'", name),
        None => String::new(),
    }
}

fn describe(entry: &Option<String>) -> String {
    match entry {
        Some(name) => format!(" in entry '{}'", name),
        None => String::new(),
    }
}

impl ArchiveError {
    pub fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        ArchiveError::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    pub fn unsupported_method(entry: &str, method: impl fmt::Display) -> Self {
        ArchiveError::UnsupportedMethod {
            entry: Some(entry.to_string()),
            method: method.to_string(),
        }
    }

    pub fn unsupported_feature(entry: Option<&str>, feature: Feature) -> Self {
        ArchiveError::UnsupportedFeature {
            entry: entry.map(str::to_string),
            feature,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            ArchiveError::TruncatedEntry { .. } | ArchiveError::UnexpectedEnd(_) => {
                io::ErrorKind::UnexpectedEof
            }
            ArchiveError::MemoryLimitExceeded { .. } => io::ErrorKind::OutOfMemory,
            ArchiveError::UnsupportedMethod { .. } | ArchiveError::UnsupportedFeature { .. } => {
                io::ErrorKind::Unsupported
            }
            ArchiveError::Io(e) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl From<ArchiveError> for io::Error {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ArchiveError>()) {
            return ArchiveError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ArchiveError>()) {
            Some(Ok(archive)) => *archive,
            Some(Err(other)) => ArchiveError::Io(io::Error::new(kind, other)),
            None => ArchiveError::Io(io::Error::from(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_survives_io_round_trip() {
        let original = ArchiveError::ChecksumMismatch {
            entry: Some("a.txt".into()),
            expected: 1,
            actual: 2,
        };
        let wrapped: io::Error = original.into();
        assert_eq!(wrapped.kind(), io::ErrorKind::InvalidData);

        match ArchiveError::from(wrapped) {
            ArchiveError::ChecksumMismatch { entry, expected, actual } => {
                assert_eq!(entry.as_deref(), Some("a.txt"));
                assert_eq!((expected, actual), (1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = ArchiveError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, ArchiveError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
    }

    #[test]
    fn messages_name_the_entry() {
        let err = ArchiveError::TruncatedEntry {
            entry: Some("lib.o".into()),
            expected: 1000,
            actual: 500,
        };
        assert_eq!(
            err.to_string(),
            "Truncated entry 'lib.o': expected 1000 bytes, got 500"
        );
    }
}
