//! # alnseq
//!
//! A compact, seekable archive format for genomic read alignments.
//!
//! An archive is a basename plus sibling files: `.header`, `.entries`, and the optional
//! `.index`, `.tmh` and `.stats`. Records are stored in self-delimiting, compressed
//! chunks so that a reader can start at any byte offset and resynchronize. Sorted archives
//! carry a position index that maps genomic coordinates to chunk offsets.
//!
//! On top of single archives the crate provides a k-way [`merge::SortedMergeReader`] and
//! a [`pileup`] pipeline that turns a sorted record stream into filtered per-sample allele
//! counts.
//!
//! ```no_run
//! use alnseq::{AlignmentRecord, ArchiveReader, ArchiveWriterBuilder};
//!
//! # fn main() -> alnseq::Result<()> {
//! let mut writer = ArchiveWriterBuilder::default()
//!     .target_lengths(vec![1_000])
//!     .sorted(true)
//!     .build("sample")?;
//! writer.append(AlignmentRecord::new(0, 0, 42))?;
//! writer.finish()?;
//!
//! for record in ArchiveReader::open("sample")? {
//!     println!("{:?}", record?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod basename;
pub mod chunk;
pub mod codec;
mod error;
pub mod header;
pub mod index;
pub mod merge;
mod parallel;
pub mod pileup;
pub mod reader;
pub mod record;
pub mod source;
pub mod stats;
pub mod tmh;
pub mod upgrade;
mod utils;
pub mod writer;

pub use error::{
    ChunkError, Error, HeaderError, IndexError, MergeError, PipelineError, ReadError, Result,
    WriteError,
};
pub use header::ArchiveHeader;
pub use index::PositionIndex;
pub use merge::{ConcatReader, MergeBuilder, SortedMergeReader};
pub use parallel::{ParallelProcessor, ParallelReader};
pub use reader::{ArchiveReader, CoordinateWindow};
pub use record::{AlignmentRecord, SequenceVariation};
pub use source::{AlignmentSink, AlignmentSource};
pub use writer::{ArchiveWriter, ArchiveWriterBuilder};
