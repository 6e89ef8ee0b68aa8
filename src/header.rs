//! # Archive header
//!
//! The `.header` sibling file describes an archive: identifier names, reference lengths,
//! query lengths, the range of query indices it holds, and whether its entries are sorted
//! and indexed. It is written once when the archive is closed and is read-only afterwards.
//!
//! The file is gzip compressed. Readers fall back to parsing it uncompressed when the gzip
//! framing is absent, which is how archives written before compression was introduced
//! store their header.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, HeaderError, Result};
use crate::utils::{read_maybe_gzip, read_string, read_u32_vec, write_gzip, write_string, write_u32_slice};

/// Magic bytes identifying an archive header ("ALNH")
pub const MAGIC: [u8; 4] = *b"ALNH";

/// Current binary layout of the header
pub const FORMAT: u8 = 1;

/// Version string stamped into headers written by this library
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const FLAG_SORTED: u8 = 1;
const FLAG_INDEXED: u8 = 1 << 1;

/// Lengths of the queries (reads) of an archive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryLengths {
    /// No query lengths were provided
    #[default]
    Unknown,
    /// Every query has the same length
    Constant(u32),
    /// One length per query index, starting at `first`
    Range { first: u32, lengths: Vec<u32> },
}
impl QueryLengths {
    /// Compacts lengths indexed by query index
    ///
    /// A constant length is stored once; otherwise only the `[smallest, largest]` slice of
    /// query indices actually present in the archive is kept.
    #[must_use]
    pub fn compact(lengths: &[u32], smallest: u32, largest: u32) -> Self {
        if lengths.is_empty() {
            return Self::Unknown;
        }
        let first = lengths[0];
        if lengths.iter().all(|l| *l == first) {
            return Self::Constant(first);
        }
        let lo = (smallest as usize).min(lengths.len());
        let hi = (largest as usize + 1).clamp(lo, lengths.len());
        Self::Range {
            first: lo as u32,
            lengths: lengths[lo..hi].to_vec(),
        }
    }

    /// Length of the query with the given index, if known
    #[must_use]
    pub fn get(&self, query_index: u32) -> Option<u32> {
        match self {
            Self::Unknown => None,
            Self::Constant(len) => Some(*len),
            Self::Range { first, lengths } => query_index
                .checked_sub(*first)
                .and_then(|i| lengths.get(i as usize).copied()),
        }
    }
}

/// Metadata of one alignment archive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveHeader {
    /// Version of the library that wrote (or last upgraded) the archive
    pub version: String,
    /// Query names by query index (may be empty)
    pub query_names: Vec<String>,
    /// Target names by target index (may be empty)
    pub target_names: Vec<String>,
    /// Target lengths by target index
    pub target_lengths: Vec<u32>,
    /// Query lengths
    pub query_lengths: QueryLengths,
    /// Smallest query index present in the archive
    pub smallest_query_index: u32,
    /// Largest query index present in the archive
    pub largest_query_index: u32,
    /// Number of queries the aligner was given
    pub number_of_queries: u32,
    /// Number of records written
    pub number_of_aligned_reads: u64,
    /// Entries are sorted by (target, position)
    pub sorted: bool,
    /// A position index was written next to the entries
    pub indexed: bool,
    pub aligner_name: String,
    pub aligner_version: String,
    /// Free-form statistics
    pub statistics: BTreeMap<String, String>,
}
impl ArchiveHeader {
    #[must_use]
    pub fn new(target_lengths: Vec<u32>) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            target_lengths,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn number_of_targets(&self) -> usize {
        self.target_lengths.len()
    }

    #[must_use]
    pub fn target_name(&self, target_index: u32) -> Option<&str> {
        self.target_names.get(target_index as usize).map(String::as_str)
    }

    #[must_use]
    pub fn target_index(&self, name: &str) -> Option<u32> {
        self.target_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    #[must_use]
    pub fn query_name(&self, query_index: u32) -> Option<&str> {
        self.query_names.get(query_index as usize).map(String::as_str)
    }

    pub fn query_length(&self, query_index: u32) -> Result<u32> {
        self.query_lengths
            .get(query_index)
            .ok_or_else(|| HeaderError::MissingQueryLength(query_index).into())
    }

    /// Serializes the uncompressed header body
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(FORMAT)?;
        write_string(writer, &self.version)?;
        write_string(writer, &self.aligner_name)?;
        write_string(writer, &self.aligner_version)?;
        let mut flags = 0;
        if self.sorted {
            flags |= FLAG_SORTED;
        }
        if self.indexed {
            flags |= FLAG_INDEXED;
        }
        writer.write_u8(flags)?;
        writer.write_u32::<LittleEndian>(self.smallest_query_index)?;
        writer.write_u32::<LittleEndian>(self.largest_query_index)?;
        writer.write_u32::<LittleEndian>(self.number_of_queries)?;
        writer.write_u64::<LittleEndian>(self.number_of_aligned_reads)?;
        write_u32_slice(writer, &self.target_lengths)?;
        for names in [&self.target_names, &self.query_names] {
            writer.write_u32::<LittleEndian>(names.len() as u32)?;
            names.iter().try_for_each(|n| write_string(writer, n))?;
        }
        match &self.query_lengths {
            QueryLengths::Unknown => writer.write_u8(0)?,
            QueryLengths::Constant(len) => {
                writer.write_u8(1)?;
                writer.write_u32::<LittleEndian>(*len)?;
            }
            QueryLengths::Range { first, lengths } => {
                writer.write_u8(2)?;
                writer.write_u32::<LittleEndian>(*first)?;
                write_u32_slice(writer, lengths)?;
            }
        }
        writer.write_u32::<LittleEndian>(self.statistics.len() as u32)?;
        for (key, value) in &self.statistics {
            write_string(writer, key)?;
            write_string(writer, value)?;
        }
        Ok(())
    }

    /// Parses an uncompressed header body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| HeaderError::Truncated(0))?;
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagicNumber(magic).into());
        }
        Self::read_body(&mut cursor).map_err(|err| match err {
            Error::IoError(_) => HeaderError::Truncated(cursor.position() as usize).into(),
            other => other,
        })
    }

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let format = cursor.read_u8()?;
        if format != FORMAT {
            return Err(HeaderError::InvalidFormatVersion(format).into());
        }
        let mut header = Self {
            version: read_string(cursor)?,
            aligner_name: read_string(cursor)?,
            aligner_version: read_string(cursor)?,
            ..Self::default()
        };
        let flags = cursor.read_u8()?;
        header.sorted = flags & FLAG_SORTED != 0;
        header.indexed = flags & FLAG_INDEXED != 0;
        header.smallest_query_index = cursor.read_u32::<LittleEndian>()?;
        header.largest_query_index = cursor.read_u32::<LittleEndian>()?;
        header.number_of_queries = cursor.read_u32::<LittleEndian>()?;
        header.number_of_aligned_reads = cursor.read_u64::<LittleEndian>()?;
        header.target_lengths = read_u32_vec(cursor)?;
        for names in [&mut header.target_names, &mut header.query_names] {
            let n = cursor.read_u32::<LittleEndian>()?;
            for _ in 0..n {
                names.push(read_string(cursor)?);
            }
        }
        header.query_lengths = match cursor.read_u8()? {
            1 => QueryLengths::Constant(cursor.read_u32::<LittleEndian>()?),
            2 => QueryLengths::Range {
                first: cursor.read_u32::<LittleEndian>()?,
                lengths: read_u32_vec(cursor)?,
            },
            _ => QueryLengths::Unknown,
        };
        let n_stats = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..n_stats {
            let key = read_string(cursor)?;
            let value = read_string(cursor)?;
            header.statistics.insert(key, value);
        }
        Ok(header)
    }

    /// Writes the gzip compressed header to `path`
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut body = Vec::new();
        self.write_bytes(&mut body)?;
        write_gzip(path, &body)?;
        Ok(())
    }

    /// Reads a header, accepting both gzip compressed and legacy uncompressed files
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = read_maybe_gzip(path)?;
        Self::from_bytes(&bytes)
    }
}
