//! # Single-archive reader
//!
//! [`ArchiveReader`] reads the records of one archive. It moves through the states
//!
//! ```text
//! Unopened → HeaderLoaded → [IndexLoaded] → Streaming → Closed
//! ```
//!
//! The header is loaded on demand and only once. The index is only loaded for archives
//! whose header declares it, and a missing or empty index leaves the archive readable but
//! without random access. The entries file is memory mapped when streaming starts.
//!
//! Three constructions are supported:
//!
//! * [`ArchiveReader::open`] reads the whole archive;
//! * [`ArchiveReader::open_window`] reads the records between two coordinates and needs
//!   the index to find the chunks that hold them;
//! * [`ArchiveReader::open_byte_window`] reads the chunks that start within a byte range,
//!   which needs no index and is how partitioned scans split the work.

use std::{
    collections::VecDeque,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use memmap2::Mmap;

use crate::{
    basename::{basename, sibling},
    chunk::ChunkReader,
    codec::{EntryCodec, VariationCodec},
    error::{ReadError, Result},
    header::ArchiveHeader,
    index::PositionIndex,
    parallel::{resolve_threads, ParallelProcessor, ParallelReader},
    record::AlignmentRecord,
    stats::Statistics,
    tmh::TooManyHits,
};

/// A memory-mapped entries file shared between readers
#[derive(Clone)]
pub struct MappedEntries(Arc<Mmap>);
impl MappedEntries {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Verify it's a regular file before attempting to map
        let file = File::open(&path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile(path.as_ref().display().to_string()).into());
        }

        // Safety: The file is open and won't be modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self(Arc::new(mmap)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl AsRef<[u8]> for MappedEntries {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Lifecycle of an [`ArchiveReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Unopened,
    HeaderLoaded,
    IndexLoaded,
    Streaming,
    Closed,
}

/// Coordinates of the first and last position (inclusive) a reader emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateWindow {
    pub start: (u32, u32),
    pub end: (u32, u32),
}
impl CoordinateWindow {
    /// A window covering every coordinate
    pub const ALL: Self = Self {
        start: (0, 0),
        end: (u32::MAX, u32::MAX),
    };

    #[must_use]
    pub fn new(start_target: u32, start_position: u32, end_target: u32, end_position: u32) -> Self {
        Self {
            start: (start_target, start_position),
            end: (end_target, end_position),
        }
    }

    #[must_use]
    pub fn is_before(&self, record: &AlignmentRecord) -> bool {
        !record.is_at_or_after(self.start.0, self.start.1)
    }

    #[must_use]
    pub fn is_past(&self, record: &AlignmentRecord) -> bool {
        (record.target_index, record.position) > self.end
    }

    #[must_use]
    pub fn contains(&self, record: &AlignmentRecord) -> bool {
        !self.is_before(record) && !self.is_past(record)
    }
}

/// Reader over one archive
pub struct ArchiveReader {
    basename: PathBuf,
    state: ReaderState,
    header: Option<ArchiveHeader>,
    index: Option<PositionIndex>,
    index_loaded: bool,
    window: CoordinateWindow,
    byte_window: (u64, u64),
    chunks: Option<ChunkReader<MappedEntries>>,
    buffer: VecDeque<AlignmentRecord>,
    codec: VariationCodec,
    exhausted: bool,
}
impl ArchiveReader {
    fn with_windows<P: AsRef<Path>>(path: P, window: CoordinateWindow, bytes: (u64, u64)) -> Result<Self> {
        let basename = basename(path);
        let entries = sibling(&basename, ".entries");
        if !entries.is_file() {
            return Err(ReadError::IncompatibleFile(entries.display().to_string()).into());
        }
        Ok(Self {
            basename,
            state: ReaderState::Unopened,
            header: None,
            index: None,
            index_loaded: false,
            window,
            byte_window: bytes,
            chunks: None,
            buffer: VecDeque::new(),
            codec: VariationCodec::new(),
            exhausted: false,
        })
    }

    /// Opens the whole archive; `path` may be the basename or any sibling file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_windows(path, CoordinateWindow::ALL, (0, u64::MAX))
    }

    /// Opens the records between `(start_target, start_position)` and
    /// `(end_target, end_position)` inclusive
    ///
    /// Requires a sorted and indexed archive.
    pub fn open_window<P: AsRef<Path>>(
        path: P,
        start_target: u32,
        start_position: u32,
        end_target: u32,
        end_position: u32,
    ) -> Result<Self> {
        let window = CoordinateWindow::new(start_target, start_position, end_target, end_position);
        let mut reader = Self::with_windows(path, window, (0, u64::MAX))?;
        reader.read_index()?;
        let index = reader.index.as_ref().ok_or(ReadError::NotIndexed)?;
        reader.byte_window = index.locate_range(window.start, window.end);
        log::trace!(
            "window {:?}..={:?} maps to bytes {:?}",
            window.start,
            window.end,
            reader.byte_window
        );
        Ok(reader)
    }

    /// Opens the chunks that start within `[start_offset, end_offset)`
    pub fn open_byte_window<P: AsRef<Path>>(path: P, start_offset: u64, end_offset: u64) -> Result<Self> {
        Self::with_windows(path, CoordinateWindow::ALL, (start_offset, end_offset))
    }

    #[must_use]
    pub fn basename(&self) -> &Path {
        &self.basename
    }

    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    #[must_use]
    pub fn window(&self) -> CoordinateWindow {
        self.window
    }

    /// Loads the header; subsequent calls return the loaded header
    pub fn read_header(&mut self) -> Result<&ArchiveHeader> {
        if self.state == ReaderState::Closed {
            return Err(ReadError::Closed.into());
        }
        if self.header.is_none() {
            let header = ArchiveHeader::from_path(sibling(&self.basename, ".header"))?;
            self.header = Some(header);
            if self.state == ReaderState::Unopened {
                self.state = ReaderState::HeaderLoaded;
            }
        }
        self.header()
    }

    /// The loaded header
    pub fn header(&self) -> Result<&ArchiveHeader> {
        self.header
            .as_ref()
            .ok_or_else(|| ReadError::HeaderNotLoaded("the header").into())
    }

    pub fn target_lengths(&self) -> Result<&[u32]> {
        self.header
            .as_ref()
            .map(|h| h.target_lengths.as_slice())
            .ok_or_else(|| ReadError::HeaderNotLoaded("target lengths").into())
    }

    pub fn number_of_targets(&self) -> Result<usize> {
        Ok(self.target_lengths()?.len())
    }

    pub fn target_name(&self, target_index: u32) -> Result<Option<&str>> {
        Ok(self
            .header
            .as_ref()
            .ok_or(ReadError::HeaderNotLoaded("target identifiers"))?
            .target_name(target_index))
    }

    pub fn query_length(&self, query_index: u32) -> Result<u32> {
        self.header
            .as_ref()
            .ok_or(ReadError::HeaderNotLoaded("query lengths"))?
            .query_length(query_index)
    }

    pub fn smallest_query_index(&self) -> Result<u32> {
        Ok(self.header()?.smallest_query_index)
    }

    pub fn largest_query_index(&self) -> Result<u32> {
        Ok(self.header()?.largest_query_index)
    }

    /// Loads the index when the header declares one
    ///
    /// A missing or empty index is not an error; the archive is then treated as unsorted.
    pub fn read_index(&mut self) -> Result<()> {
        self.read_header()?;
        if self.index_loaded {
            return Ok(());
        }
        self.index_loaded = true;
        let header = self.header()?;
        if !header.indexed {
            if header.sorted {
                log::warn!(
                    "{} is sorted but not indexed, random access is disabled",
                    self.basename.display()
                );
            }
            return Ok(());
        }
        let target_lengths = header.target_lengths.clone();
        match PositionIndex::from_path(sibling(&self.basename, ".index"), &target_lengths) {
            Ok(index) if !index.is_empty() => {
                self.index = Some(index);
                if matches!(self.state, ReaderState::Unopened | ReaderState::HeaderLoaded) {
                    self.state = ReaderState::IndexLoaded;
                }
            }
            Ok(_) => log::warn!("{} has an empty index", self.basename.display()),
            Err(err) if err.is_index_unavailable() => {
                log::warn!("{}: {err}, random access is disabled", self.basename.display());
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// The loaded index, if the archive has a usable one
    #[must_use]
    pub fn index(&self) -> Option<&PositionIndex> {
        self.index.as_ref()
    }

    /// True when the header declares sorted entries and a usable index was loaded
    pub fn is_sorted_archive(&mut self) -> Result<bool> {
        self.read_index()?;
        Ok(self.header()?.sorted && self.index.is_some())
    }

    /// Loads the optional statistics file
    pub fn statistics(&self) -> Result<Statistics> {
        Statistics::from_path(sibling(&self.basename, ".stats"))
    }

    /// Loads the optional too-many-hits table
    pub fn too_many_hits(&self) -> Result<TooManyHits> {
        TooManyHits::load(sibling(&self.basename, ".tmh"))
    }

    /// Coordinates of chunk boundaries spaced at least `min_bytes` apart
    ///
    /// The first chunk is always reported. Useful to split an archive into slices of
    /// similar size for independent processing.
    pub fn locations(&mut self, min_bytes: u64) -> Result<Vec<(u32, u32)>> {
        self.read_index()?;
        let index = self.index.as_ref().ok_or(ReadError::NotIndexed)?;
        let mut last: Option<u64> = None;
        let mut locations = Vec::new();
        for entry in index.entries() {
            if last.is_some_and(|l| entry.offset - l < min_bytes) {
                continue;
            }
            if let Some(location) = index.decode_absolute(entry.absolute_position) {
                locations.push(location);
                last = Some(entry.offset);
            }
        }
        Ok(locations)
    }

    fn ensure_stream(&mut self) -> Result<()> {
        match self.state {
            ReaderState::Closed => return Err(ReadError::Closed.into()),
            ReaderState::Streaming => return Ok(()),
            _ => {}
        }
        let entries = MappedEntries::open(sibling(&self.basename, ".entries"))?;
        let (start, end) = self.byte_window;
        self.chunks = Some(ChunkReader::with_window(entries, start, end));
        self.state = ReaderState::Streaming;
        Ok(())
    }

    /// Next record of the byte window, ignoring the coordinate window
    fn next_unfiltered(&mut self) -> Result<Option<AlignmentRecord>> {
        self.ensure_stream()?;
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(chunks) = self.chunks.as_mut() else {
                return Ok(None);
            };
            let Some((offset, records)) = chunks.next_batch()? else {
                return Ok(None);
            };
            log::trace!("read {} records from chunk at {offset}", records.len());
            self.codec.new_chunk();
            for record in records {
                let decoded = self.codec.decode(&record)?.unwrap_or(record);
                self.buffer.push_back(decoded);
            }
        }
    }

    /// Next record within the reader's window
    ///
    /// Records before the window start are skipped; the first record past the window end
    /// terminates iteration.
    pub fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        if self.exhausted {
            return if self.state == ReaderState::Closed {
                Err(ReadError::Closed.into())
            } else {
                Ok(None)
            };
        }
        while let Some(record) = self.next_unfiltered()? {
            if self.window.is_past(&record) {
                self.exhausted = true;
                self.buffer.clear();
                return Ok(None);
            }
            if !self.window.is_before(&record) {
                return Ok(Some(record));
            }
        }
        self.exhausted = true;
        Ok(None)
    }

    fn reposition_internal(&mut self, target: u32, position: u32, go_back: bool) -> Result<()> {
        let Some(offset) = self.index.as_ref().and_then(|i| i.seek_offset(target, position)) else {
            return Ok(());
        };
        self.ensure_stream()?;
        let Some(chunks) = self.chunks.as_mut() else {
            return Ok(());
        };
        // never move before the start of the byte window
        let offset = offset.max(chunks.start_offset());
        if offset >= chunks.position() || go_back {
            log::debug!("reposition to ({target}, {position}) at byte {offset}");
            chunks.seek(offset);
            self.buffer.clear();
            self.exhausted = false;
        }
        Ok(())
    }

    /// Returns the first record at or after `(target, position)`
    ///
    /// Skipping only moves forward. With an index the reader seeks to the chunk that may
    /// hold the position and scans from there; without one it scans linearly. Targets
    /// outside the reader's window yield `None`.
    pub fn skip_to(&mut self, target: u32, position: u32) -> Result<Option<AlignmentRecord>> {
        if target < self.window.start.0 || target > self.window.end.0 {
            return Ok(None);
        }
        let position = if target == self.window.start.0 {
            position.max(self.window.start.1)
        } else {
            position
        };
        self.read_index()?;
        if self.index.is_some() {
            self.reposition_internal(target, position, false)?;
        }
        while let Some(record) = self.next_record()? {
            if record.is_at_or_after(target, position) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Moves the reader to `(target, position)`, backwards if needed
    pub fn reposition(&mut self, target: u32, position: u32) -> Result<()> {
        if !self.is_sorted_archive()? {
            return Err(ReadError::NotIndexed.into());
        }
        self.reposition_internal(target, position, true)
    }

    /// Releases the mapped entries; later reads fail with [`ReadError::Closed`]
    pub fn close(&mut self) {
        self.chunks = None;
        self.buffer.clear();
        self.exhausted = true;
        self.state = ReaderState::Closed;
    }

    /// Byte windows covering the reader's byte window, one per slice
    fn byte_partitions(&mut self, slices: usize, file_len: u64) -> Result<Vec<(u64, u64)>> {
        self.read_index()?;
        let (start, end) = self.byte_window;
        let end = end.min(file_len);
        let mut bounds: Vec<u64> = match self.index.as_ref() {
            Some(index) => {
                let starts = index
                    .offsets()
                    .iter()
                    .copied()
                    .filter(|o| *o >= start && *o < end)
                    .collect::<Vec<_>>();
                let per_slice = starts.len().div_ceil(slices).max(1);
                starts.iter().step_by(per_slice).copied().collect()
            }
            None => {
                let step = (end.saturating_sub(start)).div_ceil(slices as u64).max(1);
                (start..end).step_by(step as usize).collect()
            }
        };
        if bounds.first() != Some(&start) {
            bounds.insert(0, start);
        }
        bounds.push(end);
        Ok(bounds.windows(2).map(|w| (w[0], w[1])).filter(|(s, e)| s < e).collect())
    }
}

impl Iterator for ArchiveReader {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl ParallelReader for ArchiveReader {
    fn process_parallel<P: ParallelProcessor + Clone + 'static>(
        mut self,
        processor: P,
        num_threads: usize,
    ) -> Result<()> {
        let num_threads = resolve_threads(num_threads);

        let entries = MappedEntries::open(sibling(&self.basename, ".entries"))?;
        let windows = self.byte_partitions(num_threads, entries.len() as u64)?;
        let coordinates = self.window;

        let mut handles = Vec::new();
        for (tid, (start, end)) in windows.into_iter().enumerate() {
            let entries = entries.clone();
            let mut proc = processor.clone();
            proc.set_tid(tid);

            let handle = std::thread::spawn(move || -> Result<()> {
                let mut chunks = ChunkReader::with_window(entries, start, end);
                let mut codec = VariationCodec::new();
                while let Some((_, records)) = chunks.next_batch()? {
                    codec.new_chunk();
                    for record in records {
                        let record = codec.decode(&record)?.unwrap_or(record);
                        if coordinates.contains(&record) {
                            proc.process_record(&record)?;
                        }
                    }
                    proc.on_batch_complete()?;
                }
                Ok(())
            });
            handles.push(handle);
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("parallel worker panicked"))??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{error::Error, writer::ArchiveWriterBuilder};

    /// Three targets with a record every 10 bases, four records per chunk
    fn write_sorted(base: &Path) -> Result<Vec<(u32, u32)>> {
        let mut writer = ArchiveWriterBuilder::default()
            .target_lengths(vec![100, 100, 100])
            .sorted(true)
            .chunk_size(4)
            .build(base)?;
        let mut coordinates = Vec::new();
        let mut query = 0;
        for target in 0..3 {
            for position in (0..100).step_by(10) {
                writer.append(AlignmentRecord::new(query, target, position))?;
                coordinates.push((target, position));
                query += 1;
            }
        }
        writer.finish()?;
        Ok(coordinates)
    }

    fn coordinates(reader: ArchiveReader) -> Result<Vec<(u32, u32)>> {
        reader
            .map(|r| r.map(|r| (r.target_index, r.position)))
            .collect()
    }

    #[test]
    fn test_window_returns_only_covered_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        let all = write_sorted(&base)?;

        let reader = ArchiveReader::open_window(&base, 0, 35, 1, 20)?;
        let expected = all
            .iter()
            .copied()
            .filter(|c| *c >= (0, 35) && *c <= (1, 20))
            .collect::<Vec<_>>();
        assert_eq!(coordinates(reader)?, expected);
        Ok(())
    }

    #[test]
    fn test_skip_to_moves_forward_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(reader.is_sorted_archive()?);
        let record = reader.skip_to(1, 45)?.map(|r| (r.target_index, r.position));
        assert_eq!(record, Some((1, 50)));
        let next = reader.next_record()?.map(|r| (r.target_index, r.position));
        assert_eq!(next, Some((1, 60)));

        // asking for an earlier position returns the next record instead
        let record = reader.skip_to(0, 0)?.map(|r| (r.target_index, r.position));
        assert_eq!(record, Some((1, 70)));
        assert!(reader.skip_to(2, 95)?.is_none());
        Ok(())
    }

    #[test]
    fn test_skip_to_loads_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(reader.index().is_none());
        let record = reader.skip_to(2, 40)?.map(|r| (r.target_index, r.position));
        assert_eq!(record, Some((2, 40)));
        assert!(reader.index().is_some());
        Ok(())
    }

    #[test]
    fn test_malformed_payload_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        let mut writer = ArchiveWriterBuilder::default()
            .target_lengths(vec![100])
            .chunk_size(1)
            .build(&base)?;
        let mut foreign = AlignmentRecord::new(0, 0, 5);
        foreign.compressed_data = Some(vec![9, 1]);
        writer.append(foreign)?;
        let mut broken = AlignmentRecord::new(1, 0, 6);
        broken.compressed_data = Some(vec![crate::codec::REGISTRATION_CODE]);
        writer.append(broken)?;
        writer.finish()?;

        let mut reader = ArchiveReader::open(&base)?;
        let first = reader.next_record()?;
        assert_eq!(first.and_then(|r| r.compressed_data), Some(vec![9, 1]));
        let err = reader.next_record().err();
        assert!(err.is_some_and(|e| e.is_corrupt_chunk()));
        Ok(())
    }

    #[test]
    fn test_reposition_goes_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(reader.skip_to(2, 0)?.is_some());
        reader.reposition(0, 20)?;
        let record = reader.skip_to(0, 20)?.map(|r| (r.target_index, r.position));
        assert_eq!(record, Some((0, 20)));
        Ok(())
    }

    #[test]
    fn test_byte_windows_cover_every_chunk_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        let all = write_sorted(&base)?;

        let mut reader = ArchiveReader::open(&base)?;
        reader.read_index()?;
        let offsets = reader.index().map(|i| i.offsets().to_vec()).unwrap_or_default();
        assert_eq!(offsets.len(), 8);

        // split at a chunk start and in the middle of a chunk
        for split in [offsets[3], offsets[5] + 3] {
            let mut joined = coordinates(ArchiveReader::open_byte_window(&base, 0, split)?)?;
            let tail = coordinates(ArchiveReader::open_byte_window(&base, split, u64::MAX)?)?;
            assert!(!joined.is_empty() && !tail.is_empty());
            joined.extend(tail);
            assert_eq!(joined, all);
        }
        Ok(())
    }

    #[test]
    fn test_window_requires_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("unsorted");
        let mut writer = ArchiveWriterBuilder::default().build(&base)?;
        writer.append(AlignmentRecord::new(0, 0, 5))?;
        writer.finish()?;

        let result = ArchiveReader::open_window(&base, 0, 0, 0, 10);
        assert!(matches!(result, Err(Error::ReadError(ReadError::NotIndexed))));
        Ok(())
    }

    #[test]
    fn test_closed_reader_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(reader.next_record()?.is_some());
        reader.close();
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(reader.next_record().is_err());
        Ok(())
    }

    #[derive(Clone, Default)]
    struct Collector {
        seen: Arc<Mutex<Vec<u32>>>,
        batches: Arc<Mutex<usize>>,
        tid: Option<usize>,
    }
    impl ParallelProcessor for Collector {
        fn process_record(&mut self, record: &AlignmentRecord) -> Result<()> {
            self.seen.lock().push(record.query_index);
            Ok(())
        }

        fn on_batch_complete(&mut self) -> Result<()> {
            *self.batches.lock() += 1;
            Ok(())
        }

        fn set_tid(&mut self, tid: usize) {
            self.tid = Some(tid);
        }

        fn get_tid(&self) -> Option<usize> {
            self.tid
        }
    }

    #[test]
    fn test_parallel_sees_every_record_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let collector = Collector::default();
        ArchiveReader::open(&base)?.process_parallel(collector.clone(), 3)?;
        let mut seen = collector.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        assert_eq!(*collector.batches.lock(), 8);
        Ok(())
    }

    #[test]
    fn test_parallel_respects_window() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sample");
        write_sorted(&base)?;

        let collector = Collector::default();
        ArchiveReader::open_window(&base, 1, 0, 1, 99)?.process_parallel(collector.clone(), 2)?;
        let mut seen = collector.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (10..20).collect::<Vec<_>>());
        Ok(())
    }
}
