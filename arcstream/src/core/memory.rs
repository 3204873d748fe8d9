//! Ceiling on allocations whose size comes from archive headers.
//!
//! A process-wide default lives in an atomic and is read through
//! [`global_limit`]. Decoders receive an optional override through
//! [`ReadOptions`](crate::core::options::ReadOptions); the effective limit is
//! resolved once when a reader is constructed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ArchiveError, Result};

const UNLIMITED: u64 = u64::MAX;

static GLOBAL_LIMIT_KIB: AtomicU64 = AtomicU64::new(UNLIMITED);

/// Memory ceiling expressed in KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryLimit {
    #[default]
    Unlimited,
    Kib(u64),
}

impl MemoryLimit {
    fn as_kib(self) -> u64 {
        match self {
            MemoryLimit::Unlimited => UNLIMITED,
            MemoryLimit::Kib(kib) => kib,
        }
    }

    fn from_kib(kib: u64) -> Self {
        if kib == UNLIMITED {
            MemoryLimit::Unlimited
        } else {
            MemoryLimit::Kib(kib)
        }
    }

    /// Reject a request of `requested_kib` KiB if it is above the ceiling.
    pub fn check_kib(self, requested_kib: u64) -> Result<()> {
        match self {
            MemoryLimit::Kib(limit_kib) if requested_kib > limit_kib => {
                Err(ArchiveError::MemoryLimitExceeded {
                    requested_kib,
                    limit_kib,
                })
            }
            _ => Ok(()),
        }
    }

    /// Same as [`check_kib`](Self::check_kib) for a byte count, rounded up.
    pub fn check_bytes(self, bytes: u64) -> Result<()> {
        self.check_kib(bytes.div_ceil(1024))
    }

    /// Check `count * element_size` bytes. A product that overflows `u64`
    /// is reported as exceeding any limit.
    pub fn check_elements(self, count: u64, element_size: u64) -> Result<()> {
        match count.checked_mul(element_size) {
            Some(bytes) => self.check_bytes(bytes),
            None => Err(ArchiveError::MemoryLimitExceeded {
                requested_kib: UNLIMITED,
                limit_kib: self.as_kib(),
            }),
        }
    }

    /// Check the ceiling and only then allocate a zeroed buffer of `len` bytes.
    pub fn allocate(self, len: u64) -> Result<Vec<u8>> {
        self.check_bytes(len)?;
        let len = usize::try_from(len).map_err(|_| ArchiveError::MemoryLimitExceeded {
            requested_kib: len.div_ceil(1024),
            limit_kib: (usize::MAX as u64) / 1024,
        })?;
        Ok(vec![0u8; len])
    }
}

/// Process-wide default limit.
pub fn global_limit() -> MemoryLimit {
    MemoryLimit::from_kib(GLOBAL_LIMIT_KIB.load(Ordering::Relaxed))
}

/// Replace the process-wide default limit. Readers already constructed keep
/// the limit they resolved at construction time.
pub fn set_global_limit(limit: MemoryLimit) {
    GLOBAL_LIMIT_KIB.store(limit.as_kib(), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_boundary() {
        let limit = MemoryLimit::Kib(4);
        assert!(limit.check_kib(4).is_ok());
        assert!(limit.check_bytes(4096).is_ok());

        match limit.check_kib(5) {
            Err(ArchiveError::MemoryLimitExceeded { requested_kib, limit_kib }) => {
                assert_eq!((requested_kib, limit_kib), (5, 4));
            }
            other => panic!("expected limit error, got {other:?}"),
        }
        // 4097 bytes rounds up to 5 KiB
        assert!(limit.check_bytes(4097).is_err());
    }

    #[test]
    fn unlimited_accepts_everything() {
        assert!(MemoryLimit::Unlimited.check_kib(u64::MAX - 1).is_ok());
        assert!(MemoryLimit::Unlimited.check_bytes(u64::MAX).is_ok());
    }

    #[test]
    fn overflowing_request_is_exceeded() {
        let err = MemoryLimit::Unlimited.check_elements(u64::MAX / 2, 4).unwrap_err();
        assert!(matches!(err, ArchiveError::MemoryLimitExceeded { .. }));
        assert!(MemoryLimit::Kib(1).check_elements(256, 4).is_ok());
        assert!(MemoryLimit::Kib(1).check_elements(257, 4).is_err());
    }

    #[test]
    fn allocate_checks_first() {
        let err = MemoryLimit::Kib(1).allocate(1u64 << 40).unwrap_err();
        assert!(matches!(err, ArchiveError::MemoryLimitExceeded { requested_kib, .. } if requested_kib == 1 << 30));
        assert_eq!(MemoryLimit::Kib(1).allocate(1024).unwrap().len(), 1024);
    }

    #[test]
    fn global_limit_round_trip() {
        // Large enough not to disturb readers running in parallel tests.
        set_global_limit(MemoryLimit::Kib(1 << 40));
        assert_eq!(global_limit(), MemoryLimit::Kib(1 << 40));
        set_global_limit(MemoryLimit::Unlimited);
        assert_eq!(global_limit(), MemoryLimit::Unlimited);
    }
}
