//! ARJ archives (read only, stored entries).

pub mod constants;
pub mod entry;
pub mod header;
pub mod reader;

pub use entry::ArjArchiveEntry;
pub use header::{LocalFileHeader, MainHeader};
pub use reader::ArjArchiveReader;
