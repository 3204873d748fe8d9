use std::any::Any;
use std::time::SystemTime;

use crate::core::archive::{directory_name, ArchiveEntry, EntryKind};
use crate::core::dostime::{unix_to_system_time, DosDateTime};
use crate::formats::arj::constants::{local_flags, FileType, HostOs, Method};
use crate::formats::arj::header::LocalFileHeader;

#[derive(Debug, Clone)]
pub struct ArjArchiveEntry {
    name: String,
    header: LocalFileHeader,
}

impl ArjArchiveEntry {
    pub(crate) fn new(header: LocalFileHeader) -> Self {
        let is_dir = header.file_type == FileType::Directory;
        let name = directory_name(header.name.replace('\\', "/"), is_dir);
        ArjArchiveEntry { name, header }
    }

    pub fn header(&self) -> &LocalFileHeader {
        &self.header
    }

    pub fn method(&self) -> Method {
        self.header.method
    }

    pub fn host_os(&self) -> HostOs {
        self.header.host_os
    }

    pub fn is_host_os_unix(&self) -> bool {
        self.header.host_os.is_unix_like()
    }

    pub fn compressed_size(&self) -> u64 {
        self.header.compressed_size
    }

    pub fn crc32(&self) -> u32 {
        self.header.original_crc32
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.flags & local_flags::GARBLED != 0
    }

    /// Mode as recorded by the archiver, meaningful on Unix-like hosts only.
    pub fn unix_mode(&self) -> u32 {
        if self.is_host_os_unix() {
            self.header.file_access_mode as u32
        } else {
            0
        }
    }
}

impl ArchiveEntry for ArjArchiveEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.header.original_size)
    }

    fn kind(&self) -> EntryKind {
        if self.header.file_type == FileType::Directory {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Unix hosts store seconds since the epoch, everyone else a DOS
    /// timestamp.
    fn last_modified(&self) -> Option<SystemTime> {
        if self.is_host_os_unix() {
            unix_to_system_time(self.header.modified as i64)
        } else {
            DosDateTime::from_raw(self.header.modified).to_system_time()
        }
    }

    fn mode(&self) -> Option<u32> {
        self.is_host_os_unix().then(|| self.unix_mode())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
