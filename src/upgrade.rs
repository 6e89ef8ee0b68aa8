//! Rebuilding the position index of an existing archive.
//!
//! Archives written by older versions may carry an index with repeated absolute positions,
//! which sends `skip_to` to the wrong chunk, or no index at all. The rebuild rescans the
//! entries and derives the index from the first record of every chunk.

use std::fs;
use std::path::Path;

use crate::{
    basename::{basename, sibling},
    chunk::ChunkReader,
    codec::{EntryCodec, VariationCodec},
    error::{ReadError, Result},
    header::{ArchiveHeader, CURRENT_VERSION},
    index::PositionIndex,
    reader::MappedEntries,
};

/// Rescans the entries of a sorted archive and rewrites its `.index`
///
/// Only chunks whose first record strictly increases the absolute position get an
/// entry. The previous index, if any, is kept as `.index.bak`. The header is marked
/// indexed and stamped with the current version.
pub fn rebuild_index<P: AsRef<Path>>(path: P) -> Result<PositionIndex> {
    let basename = basename(path);
    let header_path = sibling(&basename, ".header");
    let mut header = ArchiveHeader::from_path(&header_path)?;
    if !header.sorted {
        return Err(ReadError::NotIndexed.into());
    }

    let mut chunks = ChunkReader::new(MappedEntries::open(sibling(&basename, ".entries"))?);
    let mut codec = VariationCodec::new();
    let mut index = PositionIndex::new(&header.target_lengths);
    let mut last = None;
    while let Some((offset, records)) = chunks.next_batch()? {
        codec.new_chunk();
        let Some(first) = records.into_iter().next() else {
            continue;
        };
        let first = codec.decode(&first)?.unwrap_or(first);
        let absolute = index.absolute_position(first.target_index, first.position)?;
        if last.is_some_and(|l| absolute <= l) {
            continue;
        }
        let offset = if last.is_none() { 0 } else { offset };
        index.push(first.target_index, first.position, offset)?;
        last = Some(absolute);
    }

    let index_path = sibling(&basename, ".index");
    if index_path.exists() {
        fs::copy(&index_path, sibling(&basename, ".index.bak"))?;
    }
    index.save_to_path(&index_path)?;

    header.indexed = !index.is_empty();
    header.version = CURRENT_VERSION.to_string();
    header.save_to_path(&header_path)?;
    log::info!(
        "rebuilt index of {} with {} entries",
        basename.display(),
        index.len()
    );
    Ok(index)
}
