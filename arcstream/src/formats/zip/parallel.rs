//! Parallel ZIP creation: compress entries on a worker pool, then gather the
//! compressed segments into one archive in submission order.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use flate2::Compression;
use log::{debug, info};
use parking_lot::Mutex;

use crate::error::{ArchiveError, Result};
use crate::formats::zip::constants::ZipMethod;
use crate::formats::zip::entry::ZipArchiveEntry;
use crate::formats::zip::scatter::{
    FileBackingStore, MemoryBackingStore, ScatterBackingStore, ScatterZipStream,
};
use crate::formats::zip::writer::ZipArchiveWriter;

/// Where each worker keeps its compressed entries until `write_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingStoreKind {
    /// Anonymous temp files, in `dir` or the system temp directory.
    TempFile { dir: Option<PathBuf> },
    Memory,
}

impl Default for BackingStoreKind {
    fn default() -> Self {
        BackingStoreKind::TempFile { dir: None }
    }
}

#[derive(Debug, Clone)]
pub struct ScatterOptions {
    /// Worker threads, 0 picks rayon's default.
    pub threads: usize,
    pub backing_store: BackingStoreKind,
    /// Deflate level 0-9.
    pub level: u32,
}

impl Default for ScatterOptions {
    fn default() -> Self {
        ScatterOptions {
            threads: 0,
            backing_store: BackingStoreKind::default(),
            level: 6,
        }
    }
}

impl ScatterOptions {
    fn create_store(&self) -> io::Result<Box<dyn ScatterBackingStore>> {
        Ok(match &self.backing_store {
            BackingStoreKind::TempFile { dir: Some(dir) } => Box::new(FileBackingStore::new_in(dir)?),
            BackingStoreKind::TempFile { dir: None } => Box::new(FileBackingStore::new()?),
            BackingStoreKind::Memory => Box::new(MemoryBackingStore::new()),
        })
    }
}

pub type PayloadSupplier = Box<dyn FnOnce() -> io::Result<Box<dyn Read + Send>> + Send>;

/// An entry plus the deferred source of its content. The supplier runs on
/// the worker that compresses the entry.
pub struct ScatterRequest {
    entry: ZipArchiveEntry,
    supplier: PayloadSupplier,
}

impl ScatterRequest {
    pub fn new<F, R>(entry: ZipArchiveEntry, supplier: F) -> Self
    where
        F: FnOnce() -> io::Result<R> + Send + 'static,
        R: Read + Send + 'static,
    {
        ScatterRequest {
            entry,
            supplier: Box::new(move || Ok(Box::new(supplier()?) as Box<dyn Read + Send>)),
        }
    }

    pub fn from_bytes(entry: ZipArchiveEntry, content: Vec<u8>) -> Self {
        Self::new(entry, move || Ok(io::Cursor::new(content)))
    }

    pub fn entry(&self) -> &ZipArchiveEntry {
        &self.entry
    }
}

/// Timings reported by [`ParallelScatterZipCreator::write_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterStatistics {
    pub entries: usize,
    /// From creation of the creator until every entry was compressed.
    pub compression_elapsed: Duration,
    /// Time spent copying segments into the archive.
    pub merging_elapsed: Duration,
}

struct Record {
    sequence: u64,
    stream: Arc<Mutex<ScatterZipStream>>,
    index: usize,
}

struct Shared {
    options: ScatterOptions,
    streams: Mutex<HashMap<ThreadId, Arc<Mutex<ScatterZipStream>>>>,
    records: Mutex<Vec<Record>>,
}

impl Shared {
    fn stream_for_current_thread(&self) -> Result<Arc<Mutex<ScatterZipStream>>> {
        let id = thread::current().id();
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get(&id) {
            return Ok(Arc::clone(stream));
        }
        let store = self.options.create_store()?;
        let level = Compression::new(self.options.level.min(9));
        let stream = Arc::new(Mutex::new(ScatterZipStream::new(store, level)));
        streams.insert(id, Arc::clone(&stream));
        debug!("Scatter stream created for worker {:?}", id);
        Ok(stream)
    }

    fn compress(&self, sequence: u64, request: ScatterRequest) -> Result<()> {
        let ScatterRequest { entry, supplier } = request;
        let mut payload = supplier()?;
        let stream = self.stream_for_current_thread()?;
        let index = stream.lock().add_entry(entry, &mut payload)?;
        self.records.lock().push(Record {
            sequence,
            stream,
            index,
        });
        Ok(())
    }
}

/// Compresses entries concurrently and writes them out as one archive.
///
/// Every worker thread owns a scatter stream; the only shared state is the
/// record queue. `write_to` waits for all submitted work and emits entries
/// in the order they were submitted, whichever thread compressed them.
pub struct ParallelScatterZipCreator {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
    sequence: AtomicU64,
    submitted: AtomicU64,
    results: (flume::Sender<Result<()>>, flume::Receiver<Result<()>>),
    started: Instant,
}

impl ParallelScatterZipCreator {
    pub fn new(options: ScatterOptions) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .thread_name(|i| format!("scatter-zip-{i}"))
            .build()
            .map_err(|e| ArchiveError::Io(io::Error::other(e)))?;
        debug!("Scatter pool started with {} threads", pool.current_num_threads());
        Ok(ParallelScatterZipCreator {
            pool,
            shared: Arc::new(Shared {
                options,
                streams: Mutex::new(HashMap::new()),
                records: Mutex::new(Vec::new()),
            }),
            sequence: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            results: flume::unbounded(),
            started: Instant::now(),
        })
    }

    fn check_method(entry: &ZipArchiveEntry) -> Result<()> {
        match entry.method {
            ZipMethod::Stored | ZipMethod::Deflated => Ok(()),
            other => Err(ArchiveError::unsupported_method(&entry.name, other)),
        }
    }

    /// Queue compression of `request` on the pool. Failures surface from
    /// [`write_to`](Self::write_to).
    pub fn submit(&self, request: ScatterRequest) -> Result<()> {
        Self::check_method(&request.entry)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let tx = self.results.0.clone();
        self.pool.spawn(move || {
            let result = shared.compress(sequence, request);
            // The receiver lives as long as the creator
            let _ = tx.send(result);
        });
        Ok(())
    }

    /// Compress `request` on a pool thread and wait for it. Safe to call from
    /// several threads at once.
    pub fn add_entry(&self, request: ScatterRequest) -> Result<()> {
        Self::check_method(&request.entry)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let shared = &self.shared;
        self.pool.install(|| shared.compress(sequence, request))
    }

    /// Wait for all submitted entries, then write every entry into `writer`
    /// in submission order. The first compression failure is returned and
    /// nothing is written in that case.
    pub fn write_to<W: Write>(self, writer: &mut ZipArchiveWriter<W>) -> Result<ScatterStatistics> {
        let (_, rx) = &self.results;
        let mut first_error = None;
        for _ in 0..self.submitted.load(Ordering::SeqCst) {
            let result = rx
                .recv()
                .map_err(|e| ArchiveError::Io(io::Error::other(e)))?;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        let compression_elapsed = self.started.elapsed();

        let merge_start = Instant::now();
        let mut records = std::mem::take(&mut *self.shared.records.lock());
        records.sort_by_key(|record| record.sequence);
        for record in &records {
            record.stream.lock().write_entry(record.index, writer)?;
        }
        let statistics = ScatterStatistics {
            entries: records.len(),
            compression_elapsed,
            merging_elapsed: merge_start.elapsed(),
        };
        info!(
            "Gathered {} entries from {} scatter streams (compress {:?}, merge {:?})",
            statistics.entries,
            self.shared.streams.lock().len(),
            statistics.compression_elapsed,
            statistics.merging_elapsed
        );
        Ok(statistics)
    }
}
