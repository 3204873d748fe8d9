//! Format-agnostic view of archives and their entries.

use std::any::Any;
use std::fmt::Debug;
use std::io::Read;
use std::time::SystemTime;

use crate::error::Result;

/// What an entry represents on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other,
}

/// Ownership information, where the format records it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// One archived item as decoded from its header.
pub trait ArchiveEntry: Any + Debug {
    /// Slash separated name; directories end with `/`.
    fn name(&self) -> &str;

    /// Uncompressed size, `None` when it is only known after reading.
    fn size(&self) -> Option<u64>;

    fn kind(&self) -> EntryKind;

    fn last_modified(&self) -> Option<SystemTime>;

    fn mode(&self) -> Option<u32> {
        None
    }

    fn owner(&self) -> Option<Owner> {
        None
    }

    fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    fn as_any(&self) -> &dyn Any;
}

/// Sequential entry decoder. `Read` on the reader yields the content of the
/// entry returned by the latest `next_entry` call and 0 at its end.
pub trait ArchiveReader: Read {
    type Entry: ArchiveEntry;

    /// Drain whatever is left of the current entry, then decode the next
    /// header. `None` marks the end of the archive.
    fn next_entry(&mut self) -> Result<Option<Self::Entry>>;

    /// Whether this reader can decode the entry's content. Never fails.
    fn can_read_entry_data(&self, entry: &Self::Entry) -> bool;

    /// Bytes consumed from the underlying source so far.
    fn bytes_read(&self) -> u64;

    /// Iterator adapter over `next_entry`.
    fn entries(&mut self) -> Entries<'_, Self>
    where
        Self: Sized,
    {
        Entries { reader: self }
    }
}

pub struct Entries<'r, A: ArchiveReader> {
    reader: &'r mut A,
}

impl<A: ArchiveReader> Iterator for Entries<'_, A> {
    type Item = Result<A::Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_entry().transpose()
    }
}

/// Object-safe facade used by the format dispatcher.
pub trait DynArchiveReader: Read {
    fn next_entry_dyn(&mut self) -> Result<Option<Box<dyn ArchiveEntry>>>;

    /// `false` for entries produced by a different reader type.
    fn can_read_entry_data_dyn(&self, entry: &dyn ArchiveEntry) -> bool;

    fn bytes_read_dyn(&self) -> u64;
}

impl<T> DynArchiveReader for T
where
    T: ArchiveReader,
    T::Entry: 'static,
{
    fn next_entry_dyn(&mut self) -> Result<Option<Box<dyn ArchiveEntry>>> {
        Ok(self
            .next_entry()?
            .map(|entry| Box::new(entry) as Box<dyn ArchiveEntry>))
    }

    fn can_read_entry_data_dyn(&self, entry: &dyn ArchiveEntry) -> bool {
        entry
            .as_any()
            .downcast_ref::<T::Entry>()
            .is_some_and(|entry| self.can_read_entry_data(entry))
    }

    fn bytes_read_dyn(&self) -> u64 {
        self.bytes_read()
    }
}

/// Append `/` to directory names that lack it.
pub(crate) fn directory_name(mut name: String, is_dir: bool) -> String {
    if is_dir && !name.ends_with('/') {
        name.push('/');
    }
    name
}
