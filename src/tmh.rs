//! # Too-many-hits side table
//!
//! Aligners drop reads that match more reference locations than an ambiguity threshold.
//! The optional `.tmh` sibling file records, per query index, how many locations the
//! read matched and the length of the match, along with the threshold itself. When the
//! file is absent every query is considered unambiguous.

use std::{
    collections::HashMap,
    io::{Cursor, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::utils::{read_maybe_gzip, write_gzip};

/// Magic bytes identifying a too-many-hits table ("ALNT")
pub const TMH_MAGIC: [u8; 4] = *b"ALNT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hits {
    count: u32,
    length_of_match: u32,
}

/// Per-query ambiguous hit counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TooManyHits {
    threshold: u32,
    hits: HashMap<u32, Hits>,
}
impl TooManyHits {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            hits: HashMap::new(),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records that `query_index` matched `count` locations
    pub fn insert(&mut self, query_index: u32, count: u32, length_of_match: u32) {
        self.hits.insert(
            query_index,
            Hits {
                count,
                length_of_match,
            },
        );
    }

    #[must_use]
    pub fn number_of_hits(&self, query_index: u32) -> Option<u32> {
        self.hits.get(&query_index).map(|h| h.count)
    }

    #[must_use]
    pub fn length_of_match(&self, query_index: u32) -> Option<u32> {
        self.hits.get(&query_index).map(|h| h.length_of_match)
    }

    /// A query is ambiguous when it matched at least `threshold` locations
    #[must_use]
    pub fn is_ambiguous(&self, query_index: u32) -> bool {
        self.number_of_hits(query_index)
            .is_some_and(|count| count >= self.threshold)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&TMH_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.threshold)?;
        writer.write_u32::<LittleEndian>(self.hits.len() as u32)?;
        let mut queries = self.hits.keys().copied().collect::<Vec<_>>();
        queries.sort_unstable();
        for query in queries {
            let hits = self.hits[&query];
            writer.write_u32::<LittleEndian>(query)?;
            writer.write_u32::<LittleEndian>(hits.count)?;
            writer.write_u32::<LittleEndian>(hits.length_of_match)?;
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0; 4];
        cursor.read_exact(&mut magic)?;
        if magic != TMH_MAGIC {
            return Err(anyhow::anyhow!("invalid too-many-hits magic: {magic:?}").into());
        }
        let mut table = Self::new(cursor.read_u32::<LittleEndian>()?);
        let n = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..n {
            let query = cursor.read_u32::<LittleEndian>()?;
            let count = cursor.read_u32::<LittleEndian>()?;
            let length = cursor.read_u32::<LittleEndian>()?;
            table.insert(query, count, length);
        }
        Ok(table)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut body = Vec::new();
        self.write_bytes(&mut body)?;
        write_gzip(path, &body)?;
        Ok(())
    }

    /// Loads the table; a missing file yields an empty table
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            log::debug!(
                "no too-many-hits table at {}, all queries are unambiguous",
                path.as_ref().display()
            );
            return Ok(Self::default());
        }
        Self::from_bytes(&read_maybe_gzip(path)?)
    }
}
