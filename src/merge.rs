//! # Multi-archive readers
//!
//! [`SortedMergeReader`] interleaves several sorted archives into one stream ordered by
//! (target, position). [`ConcatReader`] reads the archives one after the other.
//!
//! Both readers renumber query indices so that queries of different archives stay
//! distinct: the queries of archive `i` are offset by the sum of `largest_query_index + 1`
//! over the archives before it. Both tag every record with the index of the archive it
//! came from in `sample_index`. Either adjustment can be switched off with
//! [`MergeBuilder`].

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    path::{Path, PathBuf},
};

use crate::{
    basename::unique_basenames,
    error::{MergeError, Result},
    reader::{ArchiveReader, CoordinateWindow},
    record::AlignmentRecord,
    source::AlignmentSource,
    stats::Statistics,
};

/// Below this many archives the merge scans an array for the smallest head
pub const ARRAY_QUEUE_THRESHOLD: usize = 10;

/// Options shared by [`SortedMergeReader`] and [`ConcatReader`]
#[derive(Debug, Clone, Copy)]
pub struct MergeBuilder {
    adjust_query_indices: bool,
    adjust_sample_indices: bool,
    window: Option<CoordinateWindow>,
}
impl Default for MergeBuilder {
    fn default() -> Self {
        Self {
            adjust_query_indices: true,
            adjust_sample_indices: true,
            window: None,
        }
    }
}
impl MergeBuilder {
    /// Offsets query indices per archive (on by default)
    #[must_use]
    pub fn adjust_query_indices(mut self, adjust: bool) -> Self {
        self.adjust_query_indices = adjust;
        self
    }

    /// Stores the archive index in `sample_index` (on by default)
    #[must_use]
    pub fn adjust_sample_indices(mut self, adjust: bool) -> Self {
        self.adjust_sample_indices = adjust;
        self
    }

    /// Restricts every archive to a coordinate window; the archives must be indexed
    #[must_use]
    pub fn window(mut self, window: CoordinateWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn sorted_merge<P: AsRef<Path>>(self, paths: &[P]) -> Result<SortedMergeReader> {
        let inputs = Inputs::open(paths, self)?;
        let queue = if inputs.readers.len() < ARRAY_QUEUE_THRESHOLD {
            HeadQueue::Array(Vec::with_capacity(inputs.readers.len()))
        } else {
            HeadQueue::Heap(BinaryHeap::with_capacity(inputs.readers.len()))
        };
        let n = inputs.readers.len();
        Ok(SortedMergeReader {
            inputs,
            queue,
            has_head: vec![false; n],
            exhausted: vec![false; n],
            primed: false,
        })
    }

    pub fn concat<P: AsRef<Path>>(self, paths: &[P]) -> Result<ConcatReader> {
        Ok(ConcatReader {
            inputs: Inputs::open(paths, self)?,
            current: 0,
        })
    }
}

/// The opened archives and their renumbering
struct Inputs {
    basenames: Vec<PathBuf>,
    readers: Vec<ArchiveReader>,
    query_offsets: Vec<u32>,
    target_lengths: Vec<u32>,
    options: MergeBuilder,
}
impl Inputs {
    fn open<P: AsRef<Path>>(paths: &[P], options: MergeBuilder) -> Result<Self> {
        let basenames = unique_basenames(paths);
        if basenames.is_empty() {
            return Err(MergeError::NoInputs.into());
        }
        let mut readers = Vec::with_capacity(basenames.len());
        let mut query_offsets = Vec::with_capacity(basenames.len());
        let mut target_lengths: Option<Vec<u32>> = None;
        let mut next_offset = Some(0u32);
        for basename in &basenames {
            let mut reader = match options.window {
                Some(w) => ArchiveReader::open_window(basename, w.start.0, w.start.1, w.end.0, w.end.1)?,
                None => ArchiveReader::open(basename)?,
            };
            let header = reader.read_header()?;
            match &target_lengths {
                None => target_lengths = Some(header.target_lengths.clone()),
                Some(expected) if expected.len() != header.number_of_targets() => {
                    return Err(MergeError::TargetMismatch {
                        basename: basename.display().to_string(),
                        expected: expected.len(),
                        found: header.number_of_targets(),
                    }
                    .into());
                }
                Some(_) => {}
            }
            let offset = next_offset.ok_or_else(|| MergeError::QueryIndexOverflow {
                basename: basename.display().to_string(),
            })?;
            query_offsets.push(offset);
            // only a following archive needs the next offset
            next_offset = header
                .largest_query_index
                .checked_add(1)
                .and_then(|n| offset.checked_add(n));
            readers.push(reader);
        }
        log::debug!(
            "opened {} archives with query offsets {query_offsets:?}",
            readers.len()
        );
        Ok(Self {
            basenames,
            readers,
            query_offsets,
            target_lengths: target_lengths.unwrap_or_default(),
            options,
        })
    }

    fn adjust(&self, archive: usize, mut record: AlignmentRecord) -> Result<AlignmentRecord> {
        if self.options.adjust_query_indices {
            record.query_index = record
                .query_index
                .checked_add(self.query_offsets[archive])
                .ok_or_else(|| MergeError::QueryIndexOverflow {
                    basename: self.basenames[archive].display().to_string(),
                })?;
        }
        if self.options.adjust_sample_indices {
            record.sample_index = archive as u32;
        }
        Ok(record)
    }

    /// Statistics of every archive, keys prefixed with `part{N}.`
    fn statistics(&self) -> Result<Statistics> {
        let mut merged = Statistics::new();
        for (i, reader) in self.readers.iter().enumerate() {
            merged.extend_prefixed(&format!("part{i}."), &reader.statistics()?);
        }
        Ok(merged)
    }
}

/// Accessors common to both multi-archive readers
macro_rules! inputs_accessors {
    () => {
        #[must_use]
        pub fn num_archives(&self) -> usize {
            self.inputs.readers.len()
        }

        #[must_use]
        pub fn basenames(&self) -> &[PathBuf] {
            &self.inputs.basenames
        }

        /// Offset added to the query indices of each archive
        #[must_use]
        pub fn query_offsets(&self) -> &[u32] {
            &self.inputs.query_offsets
        }

        /// Target lengths of the first archive
        #[must_use]
        pub fn target_lengths(&self) -> &[u32] {
            &self.inputs.target_lengths
        }

        /// Merged statistics of every archive
        pub fn statistics(&self) -> Result<Statistics> {
            self.inputs.statistics()
        }

        /// The header-reported query count over all archives
        pub fn number_of_queries(&self) -> Result<u64> {
            let mut total = 0u64;
            for reader in &self.inputs.readers {
                total += u64::from(reader.header()?.number_of_queries);
            }
            Ok(total)
        }
    };
}

/// The next record of one archive, owned by the merge queue
struct Head {
    archive: usize,
    record: AlignmentRecord,
}
impl Head {
    fn key(&self) -> (u32, u32, usize) {
        (self.record.target_index, self.record.position, self.archive)
    }
}
impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Head {}
impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Holds at most one head per archive
enum HeadQueue {
    Array(Vec<Head>),
    Heap(BinaryHeap<Reverse<Head>>),
}
impl HeadQueue {
    fn push(&mut self, head: Head) {
        match self {
            Self::Array(heads) => heads.push(head),
            Self::Heap(heap) => heap.push(Reverse(head)),
        }
    }

    fn pop_min(&mut self) -> Option<Head> {
        match self {
            Self::Array(heads) => {
                let (i, _) = heads.iter().enumerate().min_by_key(|(_, h)| h.key())?;
                Some(heads.swap_remove(i))
            }
            Self::Heap(heap) => heap.pop().map(|Reverse(head)| head),
        }
    }

    /// Removes the heads before `(target, position)` and returns their archives
    fn remove_before(&mut self, target: u32, position: u32) -> Vec<usize> {
        let before = |h: &Head| !h.record.is_at_or_after(target, position);
        match self {
            Self::Array(heads) => {
                let removed = heads.iter().filter(|h| before(h)).map(|h| h.archive).collect();
                heads.retain(|h| !before(h));
                removed
            }
            Self::Heap(heap) => {
                let mut removed = Vec::new();
                while let Some(Reverse(head)) = heap.peek() {
                    if !before(head) {
                        break;
                    }
                    if let Some(Reverse(head)) = heap.pop() {
                        removed.push(head.archive);
                    }
                }
                removed
            }
        }
    }
}

/// Merges sorted archives into one stream ordered by (target, position)
///
/// Records at the same coordinate are emitted in archive order.
pub struct SortedMergeReader {
    inputs: Inputs,
    queue: HeadQueue,
    has_head: Vec<bool>,
    exhausted: Vec<bool>,
    primed: bool,
}
impl SortedMergeReader {
    /// Opens the archives with default renumbering
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        MergeBuilder::default().sorted_merge(paths)
    }

    inputs_accessors!();

    fn refill(&mut self, archive: usize, found: Option<AlignmentRecord>) {
        match found {
            Some(record) => {
                self.queue.push(Head { archive, record });
                self.has_head[archive] = true;
            }
            None => {
                self.has_head[archive] = false;
                self.exhausted[archive] = true;
            }
        }
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for archive in 0..self.inputs.readers.len() {
            let found = self.inputs.readers[archive].next_record()?;
            self.refill(archive, found);
        }
        Ok(())
    }

    /// Releases every archive
    pub fn close(&mut self) {
        for reader in &mut self.inputs.readers {
            reader.close();
        }
    }
}
impl AlignmentSource for SortedMergeReader {
    fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        self.prime()?;
        let Some(head) = self.queue.pop_min() else {
            return Ok(None);
        };
        let archive = head.archive;
        self.has_head[archive] = false;
        let found = self.inputs.readers[archive].next_record()?;
        self.refill(archive, found);
        self.inputs.adjust(archive, head.record).map(Some)
    }

    fn skip_to(&mut self, target: u32, position: u32) -> Result<Option<AlignmentRecord>> {
        self.prime()?;
        for archive in self.queue.remove_before(target, position) {
            self.has_head[archive] = false;
        }
        for archive in 0..self.inputs.readers.len() {
            if self.has_head[archive] || self.exhausted[archive] {
                continue;
            }
            let found = self.inputs.readers[archive].skip_to(target, position)?;
            self.refill(archive, found);
        }
        self.next_record()
    }
}
impl Iterator for SortedMergeReader {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Reads archives one after the other
pub struct ConcatReader {
    inputs: Inputs,
    current: usize,
}
impl ConcatReader {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        MergeBuilder::default().concat(paths)
    }

    inputs_accessors!();
}
impl AlignmentSource for ConcatReader {
    fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        while self.current < self.inputs.readers.len() {
            if let Some(record) = self.inputs.readers[self.current].next_record()? {
                return self.inputs.adjust(self.current, record).map(Some);
            }
            log::trace!("finished {}", self.inputs.basenames[self.current].display());
            self.current += 1;
        }
        Ok(None)
    }
}
impl Iterator for ConcatReader {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
