//! Kept in its own binary: it changes the process-wide default.

mod common;

use anyhow::Result;
use arcstream::core::memory::{global_limit, set_global_limit};
use arcstream::formats::TarArchiveReader;
use arcstream::{ArchiveError, ArchiveReader, MemoryLimit, ReadOptions};

#[test]
fn global_default_and_per_reader_override() -> Result<()> {
    let mut name = vec![b'x'; 3 * 1024];
    name.push(0);
    let mut data = common::tar_entry("././@LongLink", b'L', &name);
    data.extend(common::tar_entry("short", b'0', b""));
    data.extend(common::tar_end());

    assert_eq!(global_limit(), MemoryLimit::Unlimited);
    set_global_limit(MemoryLimit::Kib(2));

    let mut limited = TarArchiveReader::new(&data[..], ReadOptions::default())?;
    let rejected = limited.next_entry();

    // Constructed under the global limit, then given its own.
    let mut overridden = TarArchiveReader::new(
        &data[..],
        ReadOptions::default().with_memory_limit(MemoryLimit::Unlimited),
    )?;
    let accepted = overridden.next_entry();

    set_global_limit(MemoryLimit::Unlimited);
    assert!(matches!(
        rejected,
        Err(ArchiveError::MemoryLimitExceeded {
            requested_kib: 4,
            limit_kib: 2
        })
    ));
    assert!(accepted?.is_some());
    Ok(())
}
