//! ZIP: streaming reader over local headers, a raw-entry writer and the
//! parallel scatter/gather creator.

pub mod constants;
pub mod entry;
pub mod extra;
pub mod parallel;
pub mod reader;
pub mod scatter;
pub mod writer;

pub use constants::ZipMethod;
pub use entry::ZipArchiveEntry;
pub use extra::ExtraField;
pub use parallel::{
    BackingStoreKind, ParallelScatterZipCreator, ScatterOptions, ScatterRequest, ScatterStatistics,
};
pub use reader::ZipArchiveReader;
pub use scatter::{FileBackingStore, MemoryBackingStore, ScatterBackingStore, ScatterZipStream, Segment};
pub use writer::ZipArchiveWriter;
