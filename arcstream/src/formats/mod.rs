pub mod ar;
pub mod arj;
pub mod cpio;
pub mod tar;
pub mod zip;

pub use ar::{ArArchiveEntry, ArArchiveReader};
pub use arj::{ArjArchiveEntry, ArjArchiveReader};
pub use cpio::{CpioArchiveEntry, CpioArchiveReader, CpioFormat};
pub use tar::{TarArchiveEntry, TarArchiveReader};
pub use zip::{ZipArchiveEntry, ZipArchiveReader};
