//! # Single-archive writer
//!
//! [`ArchiveWriter`] appends records to the `.entries` file in chunks and buffers every
//! header and statistics field until [`ArchiveWriter::finish`], which writes the
//! `.header`, the `.index` (for sorted archives), the `.stats` and the optional `.tmh`
//! sibling files.
//!
//! A writer asked to produce a sorted archive checks the order of the records it is
//! given. When a record arrives out of order the writer downgrades the archive to
//! unsorted, drops the index and logs a warning; the archive stays readable linearly.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use crate::{
    basename::{basename, sibling},
    chunk::{ChunkCompression, ChunkWriter, DEFAULT_CHUNK_SIZE},
    codec::{EntryCodec, VariationCodec},
    error::{Result, WriteError},
    header::{ArchiveHeader, QueryLengths},
    index::PositionIndex,
    record::AlignmentRecord,
    stats::Statistics,
    tmh::TooManyHits,
};

/// Builder for [`ArchiveWriter`]
#[derive(Debug, Default, Clone)]
pub struct ArchiveWriterBuilder {
    /// Records per chunk
    chunk_size: Option<usize>,
    /// Chunk payload compression
    compression: Option<ChunkCompression>,
    /// Apply the entry codec to every record
    entry_codec: bool,
    /// Entries are claimed to be sorted
    sorted: bool,
    target_lengths: Vec<u32>,
    target_names: Vec<String>,
    aligner_name: Option<String>,
    aligner_version: Option<String>,
}
impl ArchiveWriterBuilder {
    /// Sets the number of records per chunk (defaults to [`DEFAULT_CHUNK_SIZE`])
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Sets the compression of chunk payloads (defaults to gzip)
    #[must_use]
    pub fn compression(mut self, compression: ChunkCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Packs positions, mapping qualities and variations with the entry codec
    #[must_use]
    pub fn entry_codec(mut self, entry_codec: bool) -> Self {
        self.entry_codec = entry_codec;
        self
    }

    /// Declares that records will be appended in (target, position) order
    ///
    /// Sorted archives are indexed, which requires target lengths.
    #[must_use]
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    #[must_use]
    pub fn target_lengths(mut self, target_lengths: Vec<u32>) -> Self {
        self.target_lengths = target_lengths;
        self
    }

    #[must_use]
    pub fn target_names(mut self, target_names: Vec<String>) -> Self {
        self.target_names = target_names;
        self
    }

    #[must_use]
    pub fn aligner(mut self, name: &str, version: &str) -> Self {
        self.aligner_name = Some(name.to_string());
        self.aligner_version = Some(version.to_string());
        self
    }

    /// Creates `<basename>.entries` and returns the writer
    pub fn build<P: AsRef<Path>>(self, path: P) -> Result<ArchiveWriter> {
        let basename = basename(path);
        if basename.as_os_str().is_empty() {
            return Err(WriteError::MissingBasename.into());
        }
        let file = File::create(sibling(&basename, ".entries"))?;
        let mut header = ArchiveHeader::new(self.target_lengths);
        header.target_names = self.target_names;
        header.aligner_name = self.aligner_name.unwrap_or_default();
        header.aligner_version = self.aligner_version.unwrap_or_default();
        let index = PositionIndex::new(&header.target_lengths);
        Ok(ArchiveWriter {
            basename,
            chunks: ChunkWriter::new(BufWriter::new(file), self.compression.unwrap_or_default()),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            pending: Vec::new(),
            codec: self.entry_codec.then(VariationCodec::new),
            sorted: self.sorted,
            index,
            index_valid: self.sorted,
            last_position: None,
            header,
            query_lengths: Vec::new(),
            number_of_queries: None,
            min_query_index: u32::MAX,
            max_query_index: None,
            statistics: Statistics::new(),
            too_many_hits: None,
            finished: false,
        })
    }
}

/// Writes one archive
pub struct ArchiveWriter {
    basename: PathBuf,
    chunks: ChunkWriter<BufWriter<File>>,
    chunk_size: usize,
    /// Records of the chunk being assembled
    pending: Vec<AlignmentRecord>,
    codec: Option<VariationCodec>,
    sorted: bool,
    index: PositionIndex,
    index_valid: bool,
    last_position: Option<(u32, u32)>,
    header: ArchiveHeader,
    query_lengths: Vec<u32>,
    number_of_queries: Option<u32>,
    min_query_index: u32,
    max_query_index: Option<u32>,
    statistics: Statistics,
    too_many_hits: Option<TooManyHits>,
    finished: bool,
}
impl ArchiveWriter {
    #[must_use]
    pub fn basename(&self) -> &Path {
        &self.basename
    }

    /// True while every record appended so far was in order
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Claims or retracts sortedness for the records appended from now on
    pub fn set_sorted(&mut self, sorted: bool) {
        self.sorted = sorted;
        self.index_valid = sorted && self.header.number_of_aligned_reads == 0;
    }

    pub fn set_query_names(&mut self, names: Vec<String>) {
        self.max_query_index = self
            .max_query_index
            .max((names.len() as u32).checked_sub(1));
        self.header.query_names = names;
    }

    /// Lengths of all queries, indexed by query index
    pub fn set_query_lengths(&mut self, lengths: Vec<u32>) {
        self.query_lengths = lengths;
    }

    pub fn set_number_of_queries(&mut self, number_of_queries: u32) {
        self.number_of_queries = Some(number_of_queries);
    }

    /// Declares the query index range of a partition of a larger query set
    pub fn set_query_index_range(&mut self, smallest: u32, largest: u32) {
        self.min_query_index = smallest;
        self.max_query_index = Some(largest);
    }

    pub fn set_too_many_hits(&mut self, table: TooManyHits) {
        self.too_many_hits = Some(table);
    }

    pub fn put_statistic<V: ToString>(&mut self, key: &str, value: V) {
        self.statistics.put(key, value);
    }

    /// Appends one record
    pub fn append(&mut self, record: AlignmentRecord) -> Result<()> {
        if self.finished {
            return Err(WriteError::Closed.into());
        }
        record.validate()?;
        let coordinate = (record.target_index, record.position);
        if self.sorted && self.last_position.is_some_and(|last| coordinate < last) {
            log::warn!(
                "{}: record at {coordinate:?} follows {:?}, archive is no longer sorted",
                self.basename.display(),
                self.last_position.unwrap_or_default()
            );
            self.sorted = false;
            self.index_valid = false;
        }
        self.last_position = Some(coordinate);
        self.min_query_index = self.min_query_index.min(record.query_index);
        self.max_query_index = self.max_query_index.max(Some(record.query_index));
        self.header.number_of_aligned_reads += 1;
        self.pending.push(record);
        if self.pending.len() >= self.chunk_size {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let Some(first) = self.pending.first() else {
            return Ok(());
        };
        let offset = self.chunks.position();
        if self.index_valid {
            if let Err(err) = self.index.push(first.target_index, first.position, offset) {
                log::warn!("{}: {err}, the archive will not be indexed", self.basename.display());
                self.index_valid = false;
            }
        }
        let written = match self.codec.as_mut() {
            Some(codec) => {
                codec.new_chunk();
                let encoded = self
                    .pending
                    .iter()
                    .map(|r| codec.encode(r).unwrap_or_else(|| r.clone()))
                    .collect::<Vec<_>>();
                self.chunks.write_chunk(&encoded)?
            }
            None => self.chunks.write_chunk(&self.pending)?,
        };
        log::trace!("wrote {} records at byte {written}", self.pending.len());
        self.pending.clear();
        Ok(())
    }

    /// Flushes the last chunk and writes every sibling file
    ///
    /// Calling `finish` more than once has no further effect.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.flush_chunk()?;
        self.chunks.finish()?;

        let smallest = if self.min_query_index == u32::MAX {
            0
        } else {
            self.min_query_index
        };
        let largest = self.max_query_index.unwrap_or(0);
        let indexed = self.sorted && self.index_valid && !self.index.is_empty();

        self.header.sorted = self.sorted;
        self.header.indexed = indexed;
        self.header.smallest_query_index = smallest;
        self.header.largest_query_index = largest;
        self.header.number_of_queries = self.number_of_queries.unwrap_or(match self.max_query_index {
            Some(max) => (max - smallest).saturating_add(1),
            None => 0,
        });
        self.header.query_lengths = QueryLengths::compact(&self.query_lengths, smallest, largest);
        self.header.save_to_path(sibling(&self.basename, ".header"))?;

        if indexed {
            self.index.save_to_path(sibling(&self.basename, ".index"))?;
        }
        if let Some(table) = &self.too_many_hits {
            table.save_to_path(sibling(&self.basename, ".tmh"))?;
        }

        let name = self
            .basename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.statistics.put("basename", &name);
        self.statistics.put("basename.full", self.basename.display());
        self.statistics.put("min.query.index", smallest);
        self.statistics.put("max.query.index", largest);
        self.statistics.put("number.of.queries", self.header.number_of_queries);
        self.statistics
            .put("number.aligned.reads", self.header.number_of_aligned_reads);
        self.statistics.save_to_path(
            sibling(&self.basename, ".stats"),
            &format!("Statistics for alignment {name}"),
        )?;
        log::debug!(
            "closed {} with {} records (sorted: {}, indexed: {indexed})",
            self.basename.display(),
            self.header.number_of_aligned_reads,
            self.sorted
        );
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("failed to finish {}: {err}", self.basename.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reader::ArchiveReader, record::SequenceVariation};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_sorted_archive_is_indexed() -> Result<()> {
        init_logger();
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("sorted");
        let mut writer = ArchiveWriterBuilder::default()
            .target_lengths(vec![1000, 1000])
            .sorted(true)
            .chunk_size(4)
            .build(&base)?;
        for i in 0..10u32 {
            writer.append(AlignmentRecord::new(i, i / 5, (i % 5) * 100))?;
        }
        writer.finish()?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(reader.is_sorted_archive()?);
        assert_eq!(reader.index().map(PositionIndex::len), Some(3));
        let header = reader.header()?;
        assert_eq!(header.number_of_aligned_reads, 10);
        assert_eq!(header.largest_query_index, 9);
        assert_eq!(reader.statistics()?.get("number.aligned.reads"), Some("10"));
        Ok(())
    }

    #[test]
    fn test_out_of_order_downgrades_sortedness() -> Result<()> {
        init_logger();
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("unsorted");
        let mut writer = ArchiveWriterBuilder::default()
            .target_lengths(vec![1000])
            .sorted(true)
            .build(&base)?;
        writer.append(AlignmentRecord::new(0, 0, 50))?;
        writer.append(AlignmentRecord::new(1, 0, 10))?;
        assert!(!writer.is_sorted());
        writer.finish()?;

        let mut reader = ArchiveReader::open(&base)?;
        assert!(!reader.is_sorted_archive()?);
        assert!(!dir.path().join("unsorted.index").exists());
        assert_eq!(reader.by_ref().count(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_variation_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = ArchiveWriterBuilder::default().build(dir.path().join("bad"))?;
        let mut record = AlignmentRecord::new(0, 0, 1);
        record.sequence_variations = vec![SequenceVariation::new(b"AC", b"A", 1, 1)];
        assert!(writer.append(record).is_err());
        Ok(())
    }

    #[test]
    fn test_drop_finishes_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("dropped");
        {
            let mut writer = ArchiveWriterBuilder::default().build(&base)?;
            writer.append(AlignmentRecord::new(0, 0, 1))?;
        }
        assert!(dir.path().join("dropped.header").exists());
        assert_eq!(ArchiveReader::open(&base)?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_query_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("meta");
        let mut writer = ArchiveWriterBuilder::default()
            .aligner("bwa", "0.7")
            .build(&base)?;
        writer.set_query_lengths(vec![30, 30, 30, 30]);
        writer.append(AlignmentRecord::new(1, 0, 1))?;
        writer.append(AlignmentRecord::new(2, 0, 5))?;
        writer.finish()?;

        let mut reader = ArchiveReader::open(&base)?;
        reader.read_header()?;
        assert_eq!(reader.smallest_query_index()?, 1);
        assert_eq!(reader.largest_query_index()?, 2);
        assert_eq!(reader.query_length(2)?, 30);
        assert_eq!(reader.header()?.number_of_queries, 2);
        assert_eq!(reader.header()?.aligner_name, "bwa");
        Ok(())
    }
}
