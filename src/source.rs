//! Capability traits for record producers and consumers, and the decorators built on them.
//!
//! Readers, merge readers and filters all implement [`AlignmentSource`]; writers implement
//! [`AlignmentSink`]. Decorators wrap either side by composition:
//!
//! * [`NonAmbiguousSource`] drops records whose query matched too many locations;
//! * [`BufferedSortingSink`] restores the order of nearly sorted input before writing.

use std::{cmp::Reverse, collections::BinaryHeap};

use auto_impl::auto_impl;

use crate::{
    error::Result, reader::ArchiveReader, record::AlignmentRecord, tmh::TooManyHits,
    writer::ArchiveWriter,
};

/// Default number of records held back by [`BufferedSortingSink`]
pub const DEFAULT_SORT_BUFFER: usize = 1000;

/// A stream of alignment records
#[auto_impl(&mut, Box)]
pub trait AlignmentSource {
    /// Next record, or `None` once the source is exhausted
    fn next_record(&mut self) -> Result<Option<AlignmentRecord>>;

    /// First record at or after `(target, position)`
    ///
    /// The default implementation scans forward.
    fn skip_to(&mut self, target: u32, position: u32) -> Result<Option<AlignmentRecord>> {
        while let Some(record) = self.next_record()? {
            if record.is_at_or_after(target, position) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// A consumer of alignment records
#[auto_impl(&mut, Box)]
pub trait AlignmentSink {
    fn append(&mut self, record: AlignmentRecord) -> Result<()>;

    fn put_statistic(&mut self, key: &str, value: &str);

    /// Flushes everything; the sink accepts no records afterwards
    fn finish(&mut self) -> Result<()>;
}

impl AlignmentSource for ArchiveReader {
    fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        ArchiveReader::next_record(self)
    }

    fn skip_to(&mut self, target: u32, position: u32) -> Result<Option<AlignmentRecord>> {
        ArchiveReader::skip_to(self, target, position)
    }
}

impl AlignmentSink for ArchiveWriter {
    fn append(&mut self, record: AlignmentRecord) -> Result<()> {
        ArchiveWriter::append(self, record)
    }

    fn put_statistic(&mut self, key: &str, value: &str) {
        ArchiveWriter::put_statistic(self, key, value);
    }

    fn finish(&mut self) -> Result<()> {
        ArchiveWriter::finish(self)
    }
}

/// Drops records of ambiguous queries
pub struct NonAmbiguousSource<S> {
    inner: S,
    too_many_hits: TooManyHits,
}
impl<S: AlignmentSource> NonAmbiguousSource<S> {
    pub fn new(inner: S, too_many_hits: TooManyHits) -> Self {
        Self {
            inner,
            too_many_hits,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}
impl NonAmbiguousSource<ArchiveReader> {
    /// Wraps a reader with the too-many-hits table of its own archive
    pub fn from_reader(reader: ArchiveReader) -> Result<Self> {
        let table = reader.too_many_hits()?;
        Ok(Self::new(reader, table))
    }
}
impl<S: AlignmentSource> AlignmentSource for NonAmbiguousSource<S> {
    fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        while let Some(record) = self.inner.next_record()? {
            if !self.too_many_hits.is_ambiguous(record.query_index) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn skip_to(&mut self, target: u32, position: u32) -> Result<Option<AlignmentRecord>> {
        match self.inner.skip_to(target, position)? {
            Some(record) if self.too_many_hits.is_ambiguous(record.query_index) => self.next_record(),
            other => Ok(other),
        }
    }
}

/// Heap entry ordered by genomic coordinate, then by arrival
struct Pending {
    arrival: u64,
    record: AlignmentRecord,
}
impl Pending {
    fn key(&self) -> (u32, u32, u64) {
        (self.record.target_index, self.record.position, self.arrival)
    }
}
impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Pending {}
impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Holds back up to `capacity` records and releases them smallest first
///
/// Input that is out of order by less than the buffer capacity comes out sorted. Input
/// that is more disordered reaches the wrapped sink out of order, which an
/// [`ArchiveWriter`] answers by downgrading the archive to unsorted.
pub struct BufferedSortingSink<S: AlignmentSink> {
    inner: S,
    heap: BinaryHeap<Reverse<Pending>>,
    capacity: usize,
    arrivals: u64,
}
impl<S: AlignmentSink> BufferedSortingSink<S> {
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_SORT_BUFFER)
    }

    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
            arrivals: 0,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}
impl<S: AlignmentSink> AlignmentSink for BufferedSortingSink<S> {
    fn append(&mut self, record: AlignmentRecord) -> Result<()> {
        while self.heap.len() > self.capacity {
            if let Some(Reverse(pending)) = self.heap.pop() {
                self.inner.append(pending.record)?;
            }
        }
        self.heap.push(Reverse(Pending {
            arrival: self.arrivals,
            record,
        }));
        self.arrivals += 1;
        Ok(())
    }

    fn put_statistic(&mut self, key: &str, value: &str) {
        self.inner.put_statistic(key, value);
    }

    fn finish(&mut self) -> Result<()> {
        while let Some(Reverse(pending)) = self.heap.pop() {
            self.inner.append(pending.record)?;
        }
        self.inner.finish()
    }
}
