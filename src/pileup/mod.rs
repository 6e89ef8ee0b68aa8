//! # Pileup and genotype filtering
//!
//! Turns a position-sorted record stream into per-position, per-sample allele counts.
//!
//! 1. [`PileupIterator`] replays every record over the reference and emits one
//!    [`PositionData`] per covered position, holding the base observations and the indel
//!    candidates that start there.
//! 2. [`GenotypePipeline`] counts the observations of each sample into
//!    [`SampleCountInfo`], runs the configured [`GenotypeFilter`] chain and reconciles
//!    the result with a [`CountFixer`].
//!
//! ```no_run
//! use alnseq::{merge::MergeBuilder, pileup::{PileupIterator, PipelineConfig}};
//!
//! # fn main() -> alnseq::Result<()> {
//! let merged = MergeBuilder::default().sorted_merge(&["a", "b"])?;
//! let mut pipeline = PipelineConfig::default().build(merged.num_archives());
//! for call in pipeline.calls(PileupIterator::new(merged)) {
//!     let call = call?;
//!     println!("{}:{} {}", call.target_index, call.position, call.variant_samples());
//! }
//! # Ok(())
//! # }
//! ```

mod config;
pub mod counts;
pub mod filters;
mod fixer;
mod genome;
mod observation;
mod pipeline;
mod walk;

pub use config::{CountFixerKind, PipelineConfig};
pub use counts::SampleCountInfo;
pub use filters::GenotypeFilter;
pub use fixer::{CountFixer, NoThresholdingEffectCountFixer, SimpleCountFixer};
pub use genome::{InMemoryGenome, RandomAccessSequence};
pub use observation::{EquivalentIndelRegion, PositionData, PositionObservation, Strand};
pub use pipeline::{GenotypePipeline, PositionCall};
pub use walk::PileupIterator;
