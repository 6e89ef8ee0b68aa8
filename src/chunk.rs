//! # Chunked record stream
//!
//! The `.entries` file is a sequence of independently decodable chunks. Each chunk holds
//! one batch of [`AlignmentRecord`]s and is the minimum unit of I/O, which also makes it
//! the minimum seek granularity of the position index.
//!
//! ```text
//! ┌──────────┬────────────────────┬──────────────┬──────────────────────┐
//! │ codec u8 │ delimiter 8 × 0xFF │ length u32le │ payload (length B)   │
//! └──────────┴────────────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! A chunk with a zero length terminates the stream. A reader opened at an arbitrary byte
//! offset resynchronizes by searching forward for the delimiter, so byte windows derived
//! from the index (or chosen arbitrarily by a partitioned scan) never split a chunk: a
//! chunk belongs to the window that contains its first byte.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use memchr::memmem;

use crate::error::{ChunkError, Result};
use crate::record::{read_batch, write_batch, AlignmentRecord};

/// Number of 0xFF bytes separating the codec byte from the chunk length
pub const DELIMITER_LENGTH: usize = 8;

/// The chunk delimiter
pub const DELIMITER: [u8; DELIMITER_LENGTH] = [0xFF; DELIMITER_LENGTH];

/// Bytes preceding every chunk payload
pub const SIZE_CHUNK_PREFIX: usize = 1 + DELIMITER_LENGTH + 4;

/// Default number of records per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Compression applied to each chunk payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkCompression {
    /// Payload is stored as-is
    None,
    /// Payload is gzip compressed
    #[default]
    Gzip,
    /// Payload is zstd compressed
    Zstd,
}
impl ChunkCompression {
    /// Code written in the first byte of every chunk
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Zstd => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zstd),
            _ => Err(ChunkError::UnknownCodec(code).into()),
        }
    }

    fn compress(self, ubuf: &[u8], zbuf: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::None => zbuf.extend_from_slice(ubuf),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(zbuf, Compression::default());
                encoder.write_all(ubuf)?;
                encoder.finish()?;
            }
            Self::Zstd => {
                let mut encoder = zstd::Encoder::new(zbuf, 3)?;
                encoder.write_all(ubuf)?;
                encoder.finish()?;
            }
        }
        Ok(())
    }

    // A fresh decoder per chunk; decompression streams are never shared across chunks.
    fn decompress(self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::None => out.extend_from_slice(payload),
            Self::Gzip => {
                GzDecoder::new(payload).read_to_end(out)?;
            }
            Self::Zstd => {
                zstd::Decoder::with_buffer(payload)?.read_to_end(out)?;
            }
        }
        Ok(())
    }
}

/// Writes batches of records as chunks
///
/// The writer tracks the byte position of the stream so that callers can record the
/// start offset of every chunk in the position index.
pub struct ChunkWriter<W: Write> {
    inner: W,
    compression: ChunkCompression,
    position: u64,
    /// Uncompressed buffer
    ubuf: Vec<u8>,
    /// Compressed buffer
    zbuf: Vec<u8>,
    finished: bool,
}
impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W, compression: ChunkCompression) -> Self {
        Self {
            inner,
            compression,
            position: 0,
            ubuf: Vec::new(),
            zbuf: Vec::new(),
            finished: false,
        }
    }

    /// Byte offset at which the next chunk will start
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Serializes and writes one chunk, returning the offset it was written at
    pub fn write_chunk(&mut self, records: &[AlignmentRecord]) -> Result<u64> {
        let start = self.position;
        write_batch(records, &mut self.ubuf)?;
        self.compression.compress(&self.ubuf, &mut self.zbuf)?;
        self.write_frame(self.zbuf.len() as u32)?;
        self.inner.write_all(&self.zbuf)?;
        self.position += self.zbuf.len() as u64;
        self.clear();
        Ok(start)
    }

    fn write_frame(&mut self, len: u32) -> Result<()> {
        self.inner.write_u8(self.compression.code())?;
        self.inner.write_all(&DELIMITER)?;
        self.inner.write_u32::<LittleEndian>(len)?;
        self.position += SIZE_CHUNK_PREFIX as u64;
        Ok(())
    }

    fn clear(&mut self) {
        self.ubuf.clear();
        self.zbuf.clear();
    }

    /// Writes the terminal empty chunk and flushes the inner writer
    ///
    /// Calling `finish` more than once has no further effect.
    pub fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.write_frame(0)?;
            self.inner.flush()?;
            self.finished = true;
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.inner)
    }
}

/// Reads chunks from an in-memory or memory-mapped entries stream
///
/// The reader is restricted to the byte window `[start, end)`: only chunks whose first
/// byte lies inside the window are returned.
pub struct ChunkReader<B: AsRef<[u8]>> {
    data: B,
    pos: usize,
    start: usize,
    end: usize,
    /// Decompression buffer reused across chunks
    buffer: Vec<u8>,
}
impl<B: AsRef<[u8]>> ChunkReader<B> {
    /// Opens a reader over the whole stream
    pub fn new(data: B) -> Self {
        Self {
            data,
            pos: 0,
            start: 0,
            end: usize::MAX,
            buffer: Vec::new(),
        }
    }

    /// Opens a reader over the byte window `[start, end)`
    pub fn with_window(data: B, start: u64, end: u64) -> Self {
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let end = usize::try_from(end).unwrap_or(usize::MAX);
        let mut reader = Self {
            data,
            pos: 0,
            start,
            end,
            buffer: Vec::new(),
        };
        reader.pos = reader.resync(start);
        reader
    }

    /// Current byte offset
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Start of the window this reader is restricted to
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.start as u64
    }

    /// Moves to the first chunk starting at or after `offset`
    pub fn seek(&mut self, offset: u64) {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        self.pos = self.resync(offset);
        log::debug!("seek to byte {offset} resynced at {}", self.pos);
    }

    /// Finds the start of the first well-formed chunk at or after `from`
    fn resync(&self, from: usize) -> usize {
        let data = self.data.as_ref();
        let mut search = from.saturating_add(1);
        while search < data.len() {
            let Some(found) = memmem::find(&data[search..], &DELIMITER) else {
                break;
            };
            let delimiter = search + found;
            let chunk_start = delimiter - 1;
            if Self::is_frame_at(data, chunk_start) {
                return chunk_start;
            }
            search = delimiter + 1;
        }
        data.len()
    }

    fn is_frame_at(data: &[u8], start: usize) -> bool {
        if start + SIZE_CHUNK_PREFIX > data.len() {
            return false;
        }
        if ChunkCompression::from_code(data[start]).is_err() {
            return false;
        }
        let len = LittleEndian::read_u32(&data[start + 1 + DELIMITER_LENGTH..]) as usize;
        start + SIZE_CHUNK_PREFIX + len <= data.len()
    }

    /// Reads the next chunk payload, decompressed
    ///
    /// Returns the start offset of the chunk along with its payload, or `None` at the
    /// terminal chunk, at the end of the data or past the end of the window.
    pub fn read_chunk(&mut self) -> Result<Option<(u64, &[u8])>> {
        let data = self.data.as_ref();
        if self.pos >= data.len() || self.pos >= self.end {
            return Ok(None);
        }
        let start = self.pos;
        if start + SIZE_CHUNK_PREFIX > data.len() {
            return Err(ChunkError::Truncated {
                offset: start,
                expected: SIZE_CHUNK_PREFIX,
                available: data.len() - start,
            }
            .into());
        }
        let compression = ChunkCompression::from_code(data[start])?;
        if data[start + 1..start + 1 + DELIMITER_LENGTH] != DELIMITER {
            return Err(ChunkError::MissingDelimiter(start + 1).into());
        }
        let len = LittleEndian::read_u32(&data[start + 1 + DELIMITER_LENGTH..]) as usize;
        if len == 0 {
            self.pos = data.len();
            return Ok(None);
        }
        let payload_start = start + SIZE_CHUNK_PREFIX;
        if payload_start + len > data.len() {
            return Err(ChunkError::Truncated {
                offset: start,
                expected: len,
                available: data.len() - payload_start,
            }
            .into());
        }
        self.buffer.clear();
        compression.decompress(&data[payload_start..payload_start + len], &mut self.buffer)?;
        self.pos = payload_start + len;
        Ok(Some((start as u64, &self.buffer)))
    }

    /// Reads and deserializes the next chunk
    pub fn next_batch(&mut self) -> Result<Option<(u64, Vec<AlignmentRecord>)>> {
        match self.read_chunk()? {
            Some((offset, payload)) => Ok(Some((offset, read_batch(payload)?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(start: u32, n: u32) -> Vec<AlignmentRecord> {
        (start..start + n)
            .map(|i| AlignmentRecord::new(i, 0, i * 10))
            .collect()
    }

    fn write_stream(compression: ChunkCompression, chunks: u32) -> Result<(Vec<u8>, Vec<u64>)> {
        let mut writer = ChunkWriter::new(Vec::new(), compression);
        let mut offsets = Vec::new();
        for c in 0..chunks {
            offsets.push(writer.write_chunk(&batch(c * 5, 5))?);
        }
        Ok((writer.into_inner()?, offsets))
    }

    #[test]
    fn test_round_trip_all_codecs() -> Result<()> {
        for compression in [
            ChunkCompression::None,
            ChunkCompression::Gzip,
            ChunkCompression::Zstd,
        ] {
            let (bytes, offsets) = write_stream(compression, 3)?;
            let mut reader = ChunkReader::new(bytes.as_slice());
            let mut seen = Vec::new();
            while let Some((offset, records)) = reader.next_batch()? {
                seen.push(offset);
                assert_eq!(records.len(), 5);
            }
            assert_eq!(seen, offsets);
        }
        Ok(())
    }

    #[test]
    fn test_position_tracks_bytes_written() -> Result<()> {
        let mut writer = ChunkWriter::new(Vec::new(), ChunkCompression::None);
        writer.write_chunk(&batch(0, 2))?;
        let position = writer.position();
        let bytes = writer.into_inner()?;
        assert_eq!(position as usize + SIZE_CHUNK_PREFIX, bytes.len());
        Ok(())
    }

    #[test]
    fn test_window_resyncs_from_mid_chunk() -> Result<()> {
        let (bytes, offsets) = write_stream(ChunkCompression::Gzip, 4)?;

        // start inside the first chunk: the first chunk belongs to an earlier window
        let mut reader = ChunkReader::with_window(bytes.as_slice(), offsets[0] + 3, offsets[3]);
        let (first, records) = reader.next_batch()?.unwrap();
        assert_eq!(first, offsets[1]);
        assert_eq!(records[0].query_index, 5);
        let (second, _) = reader.next_batch()?.unwrap();
        assert_eq!(second, offsets[2]);
        assert!(reader.next_batch()?.is_none());
        Ok(())
    }

    #[test]
    fn test_adjacent_windows_partition_chunks() -> Result<()> {
        let (bytes, _) = write_stream(ChunkCompression::None, 6)?;
        let split = bytes.len() as u64 / 2;
        let mut total = 0;
        for (start, end) in [(0, split), (split, bytes.len() as u64)] {
            let mut reader = ChunkReader::with_window(bytes.as_slice(), start, end);
            while let Some((_, records)) = reader.next_batch()? {
                total += records.len();
            }
        }
        assert_eq!(total, 30);
        Ok(())
    }

    #[test]
    fn test_seek_to_chunk_start() -> Result<()> {
        let (bytes, offsets) = write_stream(ChunkCompression::Zstd, 3)?;
        let mut reader = ChunkReader::new(bytes.as_slice());
        reader.seek(offsets[2]);
        let (offset, records) = reader.next_batch()?.unwrap();
        assert_eq!(offset, offsets[2]);
        assert_eq!(records[0].query_index, 10);
        Ok(())
    }

    #[test]
    fn test_truncated_chunk_is_an_error() -> Result<()> {
        let (mut bytes, _) = write_stream(ChunkCompression::None, 1)?;
        // drop the terminal chunk and part of the payload
        bytes.truncate(bytes.len() - SIZE_CHUNK_PREFIX - 4);
        let mut reader = ChunkReader::new(bytes.as_slice());
        let err = reader.next_batch().unwrap_err();
        assert!(err.is_corrupt_chunk());
        Ok(())
    }

    #[test]
    fn test_unknown_codec_is_an_error() -> Result<()> {
        let (mut bytes, _) = write_stream(ChunkCompression::None, 1)?;
        bytes[0] = 9;
        let mut reader = ChunkReader::new(bytes.as_slice());
        assert!(reader.next_batch().unwrap_err().is_corrupt_chunk());
        Ok(())
    }

    #[test]
    fn test_empty_stream() -> Result<()> {
        let bytes = ChunkWriter::new(Vec::new(), ChunkCompression::Gzip).into_inner()?;
        assert_eq!(bytes.len(), SIZE_CHUNK_PREFIX);
        let mut reader = ChunkReader::new(bytes.as_slice());
        assert!(reader.next_batch()?.is_none());
        Ok(())
    }
}
