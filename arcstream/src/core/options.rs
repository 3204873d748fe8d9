use crate::core::charset::Charset;
use crate::core::memory::{self, MemoryLimit};

/// Settings handed to every archive reader at construction.
///
/// Notes:
/// - `charset` overrides the per-format default (CP437 for ARJ, UTF-8 or
///   CP437 for ZIP depending on the entry flag, UTF-8 elsewhere).
/// - `self_extracting` only affects ARJ: the reader scans past an SFX stub
///   for the main header instead of requiring it at offset 0.
/// - `memory_limit` overrides the process-wide default from
///   [`memory::global_limit`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub charset: Option<Charset>,
    pub self_extracting: bool,
    pub memory_limit: Option<MemoryLimit>,
}

impl ReadOptions {
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn self_extracting(mut self, enabled: bool) -> Self {
        self.self_extracting = enabled;
        self
    }

    pub(crate) fn charset_or(&self, default: Charset) -> Charset {
        self.charset.unwrap_or(default)
    }

    /// Limit a reader should apply, resolved when the reader is built.
    pub fn effective_memory_limit(&self) -> MemoryLimit {
        self.memory_limit.unwrap_or_else(memory::global_limit)
    }
}
