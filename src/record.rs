//! # Alignment records
//!
//! An [`AlignmentRecord`] describes where one read (the *query*) aligned on one reference
//! sequence (the *target*). Only the differences between the read and the reference are
//! stored, as a list of [`SequenceVariation`]s; every other aligned base is implied to match.
//!
//! Records are grouped into batches that form the payload of one chunk of the entries
//! stream. A batch is a `u32` record count followed by the records, all little endian.

use std::cmp::Ordering;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ChunkError, Result, WriteError};

/// Symbol used on either side of a variation to mark a gap
pub const GAP: u8 = b'-';

const FLAG_REVERSE: u8 = 1;
const FLAG_MAPPING_QUALITY: u8 = 1 << 1;
const FLAG_PAIR: u8 = 1 << 2;
const FLAG_SPLICE: u8 = 1 << 3;
const FLAG_COMPRESSED: u8 = 1 << 4;

/// One difference between the read and the reference
///
/// `from` holds reference bases and `to` holds read bases. A `-` in `from` marks an
/// insertion in the read, a `-` in `to` marks a deletion from the read. Both
/// `position` and `read_index` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceVariation {
    /// Reference side of the variation
    pub from: Vec<u8>,
    /// Read side of the variation
    pub to: Vec<u8>,
    /// 1-based position of the first variant base, relative to the alignment start
    pub position: u32,
    /// 1-based index of the first variant base in the read
    pub read_index: u32,
    /// Optional base qualities of the read-side bases
    pub to_quality: Vec<u8>,
}
impl SequenceVariation {
    #[must_use]
    pub fn new(from: &[u8], to: &[u8], position: u32, read_index: u32) -> Self {
        Self {
            from: from.to_vec(),
            to: to.to_vec(),
            position,
            read_index,
            to_quality: Vec::new(),
        }
    }

    /// Attaches per-base qualities for the read-side bases
    #[must_use]
    pub fn with_quality(mut self, quality: &[u8]) -> Self {
        self.to_quality = quality.to_vec();
        self
    }

    /// Checks `len(from) == len(to)` and that no offset carries a gap on both sides
    pub fn validate(&self) -> Result<()> {
        if self.from.len() != self.to.len() {
            return Err(WriteError::InvalidVariation {
                position: self.position,
                reason: "from and to differ in length",
            }
            .into());
        }
        if self
            .from
            .iter()
            .zip(self.to.iter())
            .any(|(f, t)| *f == GAP && *t == GAP)
        {
            return Err(WriteError::InvalidVariation {
                position: self.position,
                reason: "gap on both sides at the same offset",
            }
            .into());
        }
        Ok(())
    }

    /// Number of read bases inserted relative to the reference
    #[must_use]
    pub fn num_insertions(&self) -> u32 {
        self.from.iter().filter(|b| **b == GAP).count() as u32
    }

    /// Number of reference bases missing from the read
    #[must_use]
    pub fn num_deletions(&self) -> u32 {
        self.to.iter().filter(|b| **b == GAP).count() as u32
    }

    /// True when the variation contains any gap
    #[must_use]
    pub fn is_indel(&self) -> bool {
        self.from.contains(&GAP) || self.to.contains(&GAP)
    }
}

/// A read aligned to a reference position
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    /// Index of the read in the query namespace of the archive
    pub query_index: u32,
    /// Index of the reference sequence
    pub target_index: u32,
    /// 0-based start of the alignment on the target
    pub position: u32,
    /// Number of read bases clipped before the alignment starts
    pub query_position: u32,
    /// Length of the read
    pub query_length: u32,
    /// Number of reference bases covered by the alignment
    pub target_aligned_length: u32,
    /// Aligner score
    pub score: f32,
    /// Number of identical reads collapsed into this record
    pub multiplicity: u32,
    /// The read aligned on the reverse strand
    pub matching_reverse_strand: bool,
    /// Phred-scaled mapping quality
    pub mapping_quality: Option<u32>,
    /// Pair flag bitfield
    pub pair_flags: Option<u32>,
    /// Splice flag bitfield
    pub splice_flags: Option<u32>,
    /// Index of the sample this record belongs to
    pub sample_index: u32,
    /// Differences between read and reference
    pub sequence_variations: Vec<SequenceVariation>,
    /// Fields packed by an entry codec
    pub compressed_data: Option<Vec<u8>>,
}
impl Default for AlignmentRecord {
    fn default() -> Self {
        Self {
            query_index: 0,
            target_index: 0,
            position: 0,
            query_position: 0,
            query_length: 0,
            target_aligned_length: 0,
            score: 0.0,
            multiplicity: 1,
            matching_reverse_strand: false,
            mapping_quality: None,
            pair_flags: None,
            splice_flags: None,
            sample_index: 0,
            sequence_variations: Vec::new(),
            compressed_data: None,
        }
    }
}
impl AlignmentRecord {
    /// Creates a record with the coordinates that matter for sorting and indexing
    #[must_use]
    pub fn new(query_index: u32, target_index: u32, position: u32) -> Self {
        Self {
            query_index,
            target_index,
            position,
            ..Self::default()
        }
    }

    /// Compares two records by genomic coordinate only
    #[must_use]
    pub fn genomic_cmp(&self, other: &Self) -> Ordering {
        (self.target_index, self.position).cmp(&(other.target_index, other.position))
    }

    /// True when the record lies at or after `(target, position)`
    #[must_use]
    pub fn is_at_or_after(&self, target: u32, position: u32) -> bool {
        (self.target_index, self.position) >= (target, position)
    }

    /// Validates every sequence variation
    pub fn validate(&self) -> Result<()> {
        self.sequence_variations
            .iter()
            .try_for_each(SequenceVariation::validate)
    }

    /// Total inserted read bases over all variations
    #[must_use]
    pub fn num_insertions(&self) -> u32 {
        self.sequence_variations
            .iter()
            .map(SequenceVariation::num_insertions)
            .sum()
    }

    /// Total deleted reference bases over all variations
    #[must_use]
    pub fn num_deletions(&self) -> u32 {
        self.sequence_variations
            .iter()
            .map(SequenceVariation::num_deletions)
            .sum()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.matching_reverse_strand {
            flags |= FLAG_REVERSE;
        }
        if self.mapping_quality.is_some() {
            flags |= FLAG_MAPPING_QUALITY;
        }
        if self.pair_flags.is_some() {
            flags |= FLAG_PAIR;
        }
        if self.splice_flags.is_some() {
            flags |= FLAG_SPLICE;
        }
        if self.compressed_data.is_some() {
            flags |= FLAG_COMPRESSED;
        }
        flags
    }

    /// Appends the serialized record to `buf`
    pub fn write_bytes(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<LittleEndian>(self.query_index)?;
        buf.write_u32::<LittleEndian>(self.target_index)?;
        buf.write_u32::<LittleEndian>(self.position)?;
        buf.write_u32::<LittleEndian>(self.query_position)?;
        buf.write_u32::<LittleEndian>(self.query_length)?;
        buf.write_u32::<LittleEndian>(self.target_aligned_length)?;
        buf.write_f32::<LittleEndian>(self.score)?;
        buf.write_u32::<LittleEndian>(self.multiplicity)?;
        buf.write_u32::<LittleEndian>(self.sample_index)?;
        buf.write_u8(self.flags())?;
        for value in [self.mapping_quality, self.pair_flags, self.splice_flags]
            .into_iter()
            .flatten()
        {
            buf.write_u32::<LittleEndian>(value)?;
        }
        buf.write_u32::<LittleEndian>(self.sequence_variations.len() as u32)?;
        for var in &self.sequence_variations {
            write_short_bytes(buf, "from", &var.from)?;
            write_short_bytes(buf, "to", &var.to)?;
            buf.write_u32::<LittleEndian>(var.position)?;
            buf.write_u32::<LittleEndian>(var.read_index)?;
            write_short_bytes(buf, "to_quality", &var.to_quality)?;
        }
        if let Some(data) = &self.compressed_data {
            let len = u32::try_from(data.len()).map_err(|_| WriteError::FieldTooLong {
                field: "compressed_data",
                len: data.len(),
            })?;
            buf.write_u32::<LittleEndian>(len)?;
            buf.extend_from_slice(data);
        }
        Ok(())
    }

    /// Reads one record from the cursor
    pub fn from_reader(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let start = cursor.position() as usize;
        Self::read_fields(cursor).map_err(|_| ChunkError::MalformedRecord(start).into())
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut record = Self {
            query_index: cursor.read_u32::<LittleEndian>()?,
            target_index: cursor.read_u32::<LittleEndian>()?,
            position: cursor.read_u32::<LittleEndian>()?,
            query_position: cursor.read_u32::<LittleEndian>()?,
            query_length: cursor.read_u32::<LittleEndian>()?,
            target_aligned_length: cursor.read_u32::<LittleEndian>()?,
            score: cursor.read_f32::<LittleEndian>()?,
            multiplicity: cursor.read_u32::<LittleEndian>()?,
            sample_index: cursor.read_u32::<LittleEndian>()?,
            ..Self::default()
        };
        let flags = cursor.read_u8()?;
        record.matching_reverse_strand = flags & FLAG_REVERSE != 0;
        if flags & FLAG_MAPPING_QUALITY != 0 {
            record.mapping_quality = Some(cursor.read_u32::<LittleEndian>()?);
        }
        if flags & FLAG_PAIR != 0 {
            record.pair_flags = Some(cursor.read_u32::<LittleEndian>()?);
        }
        if flags & FLAG_SPLICE != 0 {
            record.splice_flags = Some(cursor.read_u32::<LittleEndian>()?);
        }
        let n_variations = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..n_variations {
            let from = read_short_bytes(cursor)?;
            let to = read_short_bytes(cursor)?;
            let position = cursor.read_u32::<LittleEndian>()?;
            let read_index = cursor.read_u32::<LittleEndian>()?;
            let to_quality = read_short_bytes(cursor)?;
            record.sequence_variations.push(SequenceVariation {
                from,
                to,
                position,
                read_index,
                to_quality,
            });
        }
        if flags & FLAG_COMPRESSED != 0 {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut data = vec![0; len];
            cursor.read_exact(&mut data)?;
            record.compressed_data = Some(data);
        }
        Ok(record)
    }
}

/// Writes a `u16` length prefix and the bytes; longer fields are rejected
fn write_short_bytes(buf: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| WriteError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.write_u16::<LittleEndian>(len)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_short_bytes(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec<u8>> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Serializes a batch of records into a chunk payload
pub fn write_batch(records: &[AlignmentRecord], buf: &mut Vec<u8>) -> Result<()> {
    buf.write_u32::<LittleEndian>(records.len() as u32)?;
    for record in records {
        record.write_bytes(buf)?;
    }
    Ok(())
}

/// Deserializes a chunk payload into its records
pub fn read_batch(payload: &[u8]) -> Result<Vec<AlignmentRecord>> {
    let mut cursor = Cursor::new(payload);
    let count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| ChunkError::MalformedRecord(0))?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(AlignmentRecord::from_reader(&mut cursor)?);
    }
    Ok(records)
}
