use std::any::Any;
use std::time::SystemTime;

use crate::core::archive::{ArchiveEntry, EntryKind};
use crate::core::dostime::{unix_to_system_time, DosDateTime};
use crate::formats::zip::constants::{flags, ZipMethod};
use crate::formats::zip::extra::ExtraField;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// ZIP entry as seen in a local file header, or as built for writing.
///
/// Sizes and CRC are `None` while unknown: for entries followed by a data
/// descriptor they are filled in once the entry has been read to its end.
#[derive(Debug, Clone)]
pub struct ZipArchiveEntry {
    pub(crate) name: String,
    pub(crate) method: ZipMethod,
    pub(crate) flags: u16,
    pub(crate) dos_time: DosDateTime,
    pub(crate) modified_unix: Option<i64>,
    pub(crate) crc: Option<u32>,
    pub(crate) compressed_size: Option<u64>,
    pub(crate) size: Option<u64>,
    pub(crate) mode: Option<u32>,
    pub(crate) extra: Vec<ExtraField>,
    /// The local header carried a Zip64 extra field.
    pub(crate) zip64: bool,
}

impl ZipArchiveEntry {
    /// New entry for writing, deflated and stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        ZipArchiveEntry {
            name: name.into(),
            method: ZipMethod::Deflated,
            flags: 0,
            dos_time: DosDateTime::from_system_time(SystemTime::now()),
            modified_unix: None,
            crc: None,
            compressed_size: None,
            size: None,
            mode: None,
            extra: Vec::new(),
            zip64: false,
        }
    }

    pub fn with_method(mut self, method: ZipMethod) -> Self {
        self.method = method;
        self
    }

    /// Unix mode, written to the external attributes.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_last_modified(mut self, time: SystemTime) -> Self {
        self.dos_time = DosDateTime::from_system_time(time);
        self
    }

    pub fn method(&self) -> ZipMethod {
        self.method
    }

    pub fn general_purpose_flags(&self) -> u16 {
        self.flags
    }

    pub fn crc32(&self) -> Option<u32> {
        self.crc
    }

    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    pub fn dos_time(&self) -> DosDateTime {
        self.dos_time
    }

    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & (flags::ENCRYPTED | flags::STRONG_ENCRYPTION) != 0
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    pub fn has_utf8_name(&self) -> bool {
        self.flags & flags::UTF8_NAMES != 0
    }

    pub(crate) fn set_sizes(&mut self, crc: u32, compressed_size: u64, size: u64) {
        self.crc = Some(crc);
        self.compressed_size = Some(compressed_size);
        self.size = Some(size);
    }
}

impl ArchiveEntry for ZipArchiveEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn kind(&self) -> EntryKind {
        if self.name.ends_with('/') {
            EntryKind::Directory
        } else if self.mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            EntryKind::Symlink
        } else {
            EntryKind::File
        }
    }

    /// The extended timestamp field wins over the DOS time when present.
    fn last_modified(&self) -> Option<SystemTime> {
        match self.modified_unix {
            Some(secs) => unix_to_system_time(secs),
            None => self.dos_time.to_system_time(),
        }
    }

    fn mode(&self) -> Option<u32> {
        self.mode
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
