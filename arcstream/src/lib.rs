//! arcstream - streaming archive and compressed-stream decoders
//!
//! Every archive reader follows the same pull model: `next_entry` decodes
//! one header and `Read` on the reader yields that entry's content. Readers
//! layer a bounded window, an optional checksum verifier and a decompressor
//! over the source by ownership, so dropping a reader releases everything.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::Read;
//! use arcstream::core::archive::ArchiveReader;
//! use arcstream::core::options::ReadOptions;
//! use arcstream::formats::TarArchiveReader;
//!
//! let mut tar = TarArchiveReader::new(File::open("backup.tar")?, ReadOptions::default())?;
//! while let Some(entry) = tar.next_entry()? {
//!     let mut content = Vec::new();
//!     tar.read_to_end(&mut content)?;
//!     println!("{} ({} bytes)", arcstream::core::archive::ArchiveEntry::name(&entry), content.len());
//! }
//! # Ok::<(), arcstream::ArchiveError>(())
//! ```

pub mod codecs;
pub mod core;
pub mod error;
pub mod formats;
pub mod stream;

pub use crate::core::archive::{ArchiveEntry, ArchiveReader, DynArchiveReader, EntryKind};
pub use crate::core::format::{
    detect_archive_format, detect_compressor_format, open_archive, open_archive_autodetect,
    open_compressor, ArchiveFormat, CompressorFormat,
};
pub use crate::core::memory::MemoryLimit;
pub use crate::core::options::ReadOptions;
pub use error::{ArchiveError, Feature, Result};
