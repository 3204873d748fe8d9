//! Stream codecs: decoders for compressed payloads inside archives and for
//! standalone compressed streams.

pub mod deflate64;
pub mod gzip;
pub mod snappy;

// Re-export commonly used types
pub use deflate64::Deflate64Decoder;
pub use gzip::{GzipHeader, GzipReader};
pub use snappy::{FramedSnappyReader, RawSnappyReader, SnappyDialect};
