//! Snappy decompression: the framing format and bare blocks.

pub mod framed;
pub mod raw;

pub use framed::{mask_checksum, unmask_checksum, FramedSnappyReader, SnappyDialect, STREAM_IDENTIFIER};
pub use raw::RawSnappyReader;
