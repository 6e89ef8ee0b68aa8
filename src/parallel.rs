//! Partitioned scans over one archive.
//!
//! The entries file is split into disjoint byte windows, one per worker thread. Every
//! worker gets its own clone of the processor, so per-thread state needs no locking;
//! results that must be shared go through whatever synchronization the processor holds.

use crate::{AlignmentRecord, Result};

/// A source of records that can be scanned by several threads at once
///
/// See [`ParallelProcessor`] for the per-thread side.
pub trait ParallelReader {
    /// Runs `processor` over every record, each thread on its own byte window
    ///
    /// A `num_threads` of zero uses every available core.
    fn process_parallel<P: ParallelProcessor + Clone + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<()>;
}

/// Per-thread record handler of a [`ParallelReader`] scan
pub trait ParallelProcessor: Send + Clone {
    fn process_record(&mut self, record: &AlignmentRecord) -> Result<()>;

    /// Called after the last record of each chunk
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Receives the index of the worker the clone runs on
    fn set_tid(&mut self, _tid: usize) {}

    fn get_tid(&self) -> Option<usize> {
        None
    }
}

/// Caps a requested thread count at the available cores; zero means all of them
#[must_use]
pub fn resolve_threads(num_threads: usize) -> usize {
    let available = num_cpus::get();
    match num_threads {
        0 => available,
        n => n.min(available),
    }
}
