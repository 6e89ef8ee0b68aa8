//! # Position index
//!
//! The `.index` sibling file maps chunk boundaries to genomic coordinates. Every reference
//! sequence is laid end to end into one synthetic coordinate space:
//!
//! ```text
//! absolute(target, position) = Σ length(t) for t < target  +  position
//! ```
//!
//! so a single binary search over the absolute position of the first record of each chunk
//! locates the chunk that holds any `(target, position)` pair.
//!
//! On disk the index is gzip compressed: magic `ALNI`, a `u64` entry count, then the chunk
//! byte offsets and the absolute positions as two parallel arrays of little-endian `u64`.

use std::{io::Write, path::Path};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{IndexError, Result};
use crate::utils::{read_maybe_gzip, write_gzip};

/// Magic bytes identifying an index file ("ALNI")
pub const INDEX_MAGIC: [u8; 4] = *b"ALNI";

/// Size of the index preamble in bytes
pub const SIZE_INDEX_HEADER: usize = 12;

/// One chunk boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Synthetic position of the first record of the chunk
    pub absolute_position: u64,
    /// Byte offset of the chunk in the entries file
    pub offset: u64,
}

/// Ordered table of chunk boundaries keyed by synthetic absolute position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionIndex {
    /// Absolute position of the first base of each target
    target_offsets: Vec<u64>,
    offsets: Vec<u64>,
    absolute_positions: Vec<u64>,
}
impl PositionIndex {
    /// Creates an empty index over targets with the given lengths
    #[must_use]
    pub fn new(target_lengths: &[u32]) -> Self {
        let mut target_offsets = Vec::with_capacity(target_lengths.len());
        let mut running = 0u64;
        for len in target_lengths {
            target_offsets.push(running);
            running += u64::from(*len);
        }
        Self {
            target_offsets,
            offsets: Vec::new(),
            absolute_positions: Vec::new(),
        }
    }

    /// Builds an index from `(target, position, byte offset)` chunk boundaries
    pub fn build(target_lengths: &[u32], boundaries: &[(u32, u32, u64)]) -> Result<Self> {
        let mut index = Self::new(target_lengths);
        for (target, position, offset) in boundaries {
            index.push(*target, *position, *offset)?;
        }
        Ok(index)
    }

    /// Appends a chunk boundary; positions must not decrease
    pub fn push(&mut self, target: u32, position: u32, offset: u64) -> Result<()> {
        let absolute = self.absolute_position(target, position)?;
        if self
            .absolute_positions
            .last()
            .is_some_and(|last| *last > absolute)
        {
            return Err(IndexError::Unsorted(self.absolute_positions.len()).into());
        }
        self.absolute_positions.push(absolute);
        self.offsets.push(offset);
        Ok(())
    }

    /// Synthetic absolute position of `(target, position)`
    pub fn absolute_position(&self, target: u32, position: u32) -> Result<u64> {
        self.target_offsets
            .get(target as usize)
            .map(|base| base + u64::from(position))
            .ok_or_else(|| IndexError::TargetOutOfRange(target, self.target_offsets.len()).into())
    }

    /// Converts an absolute position back into `(target, position)`
    #[must_use]
    pub fn decode_absolute(&self, absolute: u64) -> Option<(u32, u32)> {
        let target = self
            .target_offsets
            .partition_point(|start| *start <= absolute)
            .checked_sub(1)?;
        let position = u32::try_from(absolute - self.target_offsets[target]).ok()?;
        Some((target as u32, position))
    }

    /// Byte offset of a chunk relative to the chunk that may hold `(target, position)`
    ///
    /// The search finds the first chunk whose first record is at or after the queried
    /// position and steps back one chunk, since the preceding chunk may still hold records
    /// at that position. `chunk_offset` then moves forward by whole chunks; `1` yields the
    /// first chunk that cannot hold anything before the queried position.
    ///
    /// Returns `None` when the stepped-back chunk would precede the first chunk (nothing
    /// in the archive lies before the queried position), `Some(u64::MAX)` when `target` is
    /// past the last target, and a value just past the start of the last chunk when the
    /// requested chunk lies past the end of the index.
    #[must_use]
    pub fn locate(&self, target: u32, position: u32, chunk_offset: usize) -> Option<u64> {
        let Ok(absolute) = self.absolute_position(target, position) else {
            return Some(u64::MAX);
        };
        let size = self.offsets.len();
        if size == 0 {
            return None;
        }
        let found = self.absolute_positions.partition_point(|p| *p < absolute);
        // Index of the chunk to step back to; -1 means before the first chunk.
        let base = if found >= size {
            size as isize - 1
        } else {
            found as isize - 1
        };
        let shifted = base + chunk_offset as isize;
        if shifted < 0 {
            return None;
        }
        let shifted = shifted as usize;
        if shifted < size {
            Some(self.offsets[shifted])
        } else {
            Some(self.offsets[base.max(0) as usize] + 1)
        }
    }

    /// Byte window `[start, end)` covering every chunk that may hold records between
    /// `start` and `end` inclusive
    #[must_use]
    pub fn locate_range(&self, start: (u32, u32), end: (u32, u32)) -> (u64, u64) {
        let start_offset = self.locate(start.0, start.1, 0).unwrap_or(0);
        let end_offset = self
            .locate(end.0, end.1.saturating_add(1), 1)
            .unwrap_or(u64::MAX);
        (start_offset, end_offset)
    }

    /// Offset to seek to when skipping forward to `(target, position)`
    #[must_use]
    pub fn seek_offset(&self, target: u32, position: u32) -> Option<u64> {
        match self.locate(target, position, 0) {
            None => self.offsets.first().copied(),
            Some(u64::MAX) => None,
            Some(offset) => Some(offset),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    #[must_use]
    pub fn absolute_positions(&self) -> &[u64] {
        &self.absolute_positions
    }

    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.absolute_positions
            .iter()
            .zip(self.offsets.iter())
            .map(|(absolute_position, offset)| IndexEntry {
                absolute_position: *absolute_position,
                offset: *offset,
            })
    }

    /// Serializes the uncompressed index body
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&INDEX_MAGIC)?;
        writer.write_u64::<LittleEndian>(self.offsets.len() as u64)?;
        let mut buf = vec![0u64; self.offsets.len()];
        for values in [&self.offsets, &self.absolute_positions] {
            LittleEndian::write_u64_into(values, bytemuck::cast_slice_mut(&mut buf));
            writer.write_all(bytemuck::cast_slice(&buf))?;
        }
        Ok(())
    }

    /// Parses an uncompressed index body
    pub fn from_bytes(bytes: &[u8], target_lengths: &[u32]) -> Result<Self> {
        if bytes.len() < SIZE_INDEX_HEADER {
            return Err(IndexError::Empty.into());
        }
        let mut magic = [0; 4];
        magic.copy_from_slice(&bytes[..4]);
        if magic != INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(magic).into());
        }
        let n = LittleEndian::read_u64(&bytes[4..12]) as usize;
        let body = &bytes[SIZE_INDEX_HEADER..];
        if body.len() != 16 * n {
            return Err(IndexError::LengthMismatch {
                offsets: n,
                positions: (body.len() / 8).saturating_sub(n),
            }
            .into());
        }
        let read_array = |bytes: &[u8]| -> Vec<u64> {
            let mut values: Vec<u64> = bytemuck::pod_collect_to_vec(bytes);
            values.iter_mut().for_each(|v| *v = u64::from_le(*v));
            values
        };
        let mut index = Self::new(target_lengths);
        index.offsets = read_array(&body[..8 * n]);
        index.absolute_positions = read_array(&body[8 * n..]);
        if let Some(i) = index
            .absolute_positions
            .windows(2)
            .position(|w| w[0] > w[1])
        {
            return Err(IndexError::Unsorted(i + 1).into());
        }
        Ok(index)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut body = Vec::new();
        self.write_bytes(&mut body)?;
        write_gzip(path, &body)?;
        Ok(())
    }

    /// Loads an index; target lengths come from the archive header
    pub fn from_path<P: AsRef<Path>>(path: P, target_lengths: &[u32]) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(IndexError::Missing(path.as_ref().display().to_string()).into());
        }
        let bytes = read_maybe_gzip(path)?;
        Self::from_bytes(&bytes, target_lengths)
    }

    /// Writes the index as a tab-separated table
    pub fn pprint<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "absolute_position\toffset")?;
        for entry in self.entries() {
            writeln!(writer, "{}\t{}", entry.absolute_position, entry.offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Targets of length 1000 and 2000; chunks start at the listed coordinates.
    fn sample_index() -> PositionIndex {
        PositionIndex::build(
            &[1000, 2000],
            &[
                (0, 10, 0),
                (0, 500, 100),
                (0, 500, 200),
                (1, 0, 300),
                (1, 700, 400),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_target_offsets() -> Result<()> {
        let index = sample_index();
        assert_eq!(index.absolute_position(1, 5)?, 1005);
        assert_eq!(index.absolute_positions(), &[10, 500, 500, 1000, 1700]);
        assert!(index.absolute_position(2, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_locate_steps_back_one_chunk() {
        let index = sample_index();
        // strictly inside the second chunk
        assert_eq!(index.locate(0, 600, 0), Some(200));
        // coinciding with a chunk start: the previous chunk may hold the position too
        assert_eq!(index.locate(1, 0, 0), Some(200));
        // ties resolve to the first of the chunks that start at the same position
        assert_eq!(index.locate(0, 500, 0), Some(0));
    }

    #[test]
    fn test_locate_before_first_chunk() {
        let index = sample_index();
        assert_eq!(index.locate(0, 10, 0), None);
        assert_eq!(index.locate(0, 0, 0), None);
        assert_eq!(index.locate(0, 0, 1), Some(0));
    }

    #[test]
    fn test_locate_past_last_chunk() {
        let index = sample_index();
        assert_eq!(index.locate(1, 1999, 0), Some(400));
        assert_eq!(index.locate(1, 1999, 1), Some(401));
        assert_eq!(index.locate(2, 0, 0), Some(u64::MAX));
    }

    #[test]
    fn test_locate_range_same_chunk() {
        let index = sample_index();
        // both ends in the chunk at 300: the end must extend to the next chunk start
        assert_eq!(index.locate_range((1, 100), (1, 200)), (300, 400));
        // an end that coincides with a chunk start keeps that chunk
        assert_eq!(index.locate_range((1, 100), (1, 700)), (300, 401));
    }

    #[test]
    fn test_seek_offset() {
        let index = sample_index();
        assert_eq!(index.seek_offset(0, 0), Some(0));
        assert_eq!(index.seek_offset(1, 800), Some(400));
        assert_eq!(index.seek_offset(5, 0), None);
    }

    #[test]
    fn test_decode_absolute() {
        let index = sample_index();
        assert_eq!(index.decode_absolute(1700), Some((1, 700)));
        assert_eq!(index.decode_absolute(999), Some((0, 999)));
        assert_eq!(index.decode_absolute(1000), Some((1, 0)));
    }

    #[test]
    fn test_unsorted_push_is_rejected() {
        let mut index = PositionIndex::new(&[100]);
        index.push(0, 50, 0).unwrap();
        assert!(index.push(0, 40, 10).is_err());
    }

    #[test]
    fn test_file_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.index");
        let index = sample_index();
        index.save_to_path(&path)?;
        assert_eq!(PositionIndex::from_path(&path, &[1000, 2000])?, index);
        Ok(())
    }

    #[test]
    fn test_pprint_table() -> Result<()> {
        let index = sample_index();
        let mut out = Vec::new();
        index.pprint(&mut out)?;
        let table = String::from_utf8(out)?;
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), index.len() + 1);
        assert_eq!(lines[0], "absolute_position\toffset");
        assert_eq!(lines[1], "10\t0");
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = PositionIndex::from_path("/nonexistent/a.index", &[1]).unwrap_err();
        assert!(err.is_index_unavailable());
    }

    proptest! {
        #[test]
        fn prop_locate_never_overshoots(
            starts in proptest::collection::vec(0u32..5000, 1..40),
            query in 0u32..5000,
        ) {
            let mut starts = starts;
            starts.sort_unstable();
            let boundaries = starts
                .iter()
                .enumerate()
                .map(|(i, p)| (0, *p, i as u64 * 10))
                .collect::<Vec<_>>();
            let index = PositionIndex::build(&[5000], &boundaries).unwrap();
            let offset = index.locate(0, query, 0).unwrap_or(0);
            let chunk = (offset / 10) as usize;
            // the located chunk starts at or before the query, so a forward scan reaches it
            prop_assert!(starts[chunk] <= query || chunk == 0);
            // no later chunk starting strictly before the query is skipped over
            prop_assert!(starts[..chunk].iter().all(|s| *s <= query));
        }
    }
}
