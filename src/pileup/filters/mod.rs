//! # Genotype filters
//!
//! A filter inspects the observations and counts of one position and removes the alleles
//! it considers sequencing errors. Removing an observation marks it filtered, takes one
//! off its allele count and is tallied per sample as a reference or variant removal;
//! the tallies are taken off `ref_count`/`var_count` once the filter is done. Indel
//! candidates are removed by marking them filtered.
//!
//! Counts are unsigned and a removal that would take a count below zero is refused and
//! logged as an error.

use std::collections::BTreeSet;

use super::{
    counts::SampleCountInfo,
    observation::{PositionData, PositionObservation},
};

mod diploid;
mod indel;
mod leftover;
mod quality;
mod quarter;
mod strand;

pub use diploid::DiploidFilter;
pub use indel::{CommonIndelArtifactFilter, EntropicIndelArtifactFilter};
pub use leftover::LeftOverFilter;
pub use quality::{QualityScoreFilter, DEFAULT_QUALITY_THRESHOLD};
pub use quarter::QuarterFrequencyFilter;
pub use strand::StrandBiasFilter;

/// A stage of the genotype filter chain
pub trait GenotypeFilter: Send {
    /// Short description of the filtering criterion
    fn describe(&self) -> String;

    /// Removes likely errors from `data` and `counts`
    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]);

    /// Running totals of this filter
    fn state(&self) -> &FilterState;

    /// Share of screened observations removed so far, in percent
    fn percent_filtered_out(&self) -> f64 {
        let state = self.state();
        if state.screened == 0 {
            0.0
        } else {
            state.filtered as f64 / state.screened as f64 * 100.0
        }
    }
}

/// Removal bookkeeping shared by the filters
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    var_removed: Vec<u32>,
    ref_removed: Vec<u32>,
    /// Observations and indels looked at over the whole run
    pub screened: u64,
    /// Observations and indels removed over the whole run
    pub filtered: u64,
}
impl FilterState {
    /// Clears the per-position tallies
    pub fn reset(&mut self, num_samples: usize) {
        self.var_removed.clear();
        self.var_removed.resize(num_samples, 0);
        self.ref_removed.clear();
        self.ref_removed.resize(num_samples, 0);
    }

    /// Removes one observation from its sample's counts
    ///
    /// Observations that are already filtered are left alone.
    pub fn remove(
        &mut self,
        observation: &mut PositionObservation,
        counts: &mut [SampleCountInfo],
    ) -> bool {
        if observation.filtered {
            return false;
        }
        let sample = observation.sample_index;
        let Some(info) = counts.get_mut(sample) else {
            return false;
        };
        if !info.remove(observation) {
            return false;
        }
        observation.filtered = true;
        let tally = if observation.matches_reference {
            &mut self.ref_removed
        } else {
            &mut self.var_removed
        };
        if let Some(removed) = tally.get_mut(sample) {
            *removed += 1;
        }
        self.filtered += 1;
        true
    }

    /// Takes the tallied removals off every sample's reference and variant counts
    pub fn adjust_ref_var_counts(&self, counts: &mut [SampleCountInfo]) {
        for info in counts {
            let sample = info.sample_index;
            let var_removed = self.var_removed.get(sample).copied().unwrap_or(0);
            let ref_removed = self.ref_removed.get(sample).copied().unwrap_or(0);
            info.var_count = info.var_count.checked_sub(var_removed).unwrap_or_else(|| {
                log::error!("sample {sample}: variant count would become negative");
                0
            });
            info.ref_count = info.ref_count.checked_sub(ref_removed).unwrap_or_else(|| {
                log::error!("sample {sample}: reference count would become negative");
                0
            });
        }
    }

    /// Removes indels whose frequency is below their sample's threshold
    ///
    /// Indels are only removed when every sample carrying indels has one to remove, so
    /// that an indel kept in one sample stays comparable across samples.
    pub fn filter_indels<F: Fn(usize) -> u32>(
        &mut self,
        counts: &mut [SampleCountInfo],
        threshold: F,
    ) {
        let samples_with_indels = counts.iter().filter(|c| c.has_indels()).count();
        let mut failing = Vec::new();
        let mut failing_samples = BTreeSet::new();
        for info in counts.iter() {
            for (i, indel) in info.indels().iter().enumerate() {
                if !indel.is_filtered() && indel.frequency() < threshold(info.sample_index) {
                    failing.push((info.sample_index, i));
                    failing_samples.insert(info.sample_index);
                }
            }
        }
        if failing.is_empty() || failing_samples.len() != samples_with_indels {
            return;
        }
        for (sample, i) in failing {
            if let Some(indel) = counts[sample].indels_mut().get_mut(i) {
                indel.mark_filtered();
                self.filtered += 1;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::pileup::{
        counts::SampleCountInfo,
        observation::{PositionData, PositionObservation, Strand},
    };

    /// Builds a position from `(sample, base, quality, strand)` tuples over reference `A`
    pub fn position(
        num_samples: usize,
        bases: &[(usize, u8, u8, Strand)],
    ) -> (PositionData, Vec<SampleCountInfo>) {
        let mut data = PositionData::new(0, 10);
        data.reference_base = Some(b'A');
        for (read, (sample, base, quality, strand)) in bases.iter().enumerate() {
            data.observations.push(PositionObservation {
                sample_index: *sample,
                read_index: read as u32 + 1,
                from: b'A',
                to: *base,
                matches_reference: *base == b'A',
                quality: *quality,
                strand: *strand,
                filtered: false,
            });
        }
        let mut counts = (0..num_samples)
            .map(|s| SampleCountInfo::new(s, b'A'))
            .collect::<Vec<_>>();
        for observation in &data.observations {
            counts[observation.sample_index].observe(observation);
        }
        (data, counts)
    }

    /// `n` forward observations of `base` in `sample` at quality 40
    pub fn repeat(sample: usize, base: u8, n: usize) -> Vec<(usize, u8, u8, Strand)> {
        vec![(sample, base, 40, Strand::Forward); n]
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{position, repeat};
    use super::*;
    use crate::pileup::{counts::BASE_C_INDEX, observation::EquivalentIndelRegion};

    #[test]
    fn test_remove_is_idempotent() {
        let (mut data, mut counts) = position(1, &repeat(0, b'C', 2));
        let mut state = FilterState::default();
        state.reset(1);
        assert!(state.remove(&mut data.observations[0], &mut counts));
        assert!(!state.remove(&mut data.observations[0], &mut counts));
        state.adjust_ref_var_counts(&mut counts);
        assert_eq!(counts[0].counts[BASE_C_INDEX], 1);
        assert_eq!(counts[0].var_count, 1);
    }

    #[test]
    fn test_indels_removed_only_when_consistent() {
        let (_, mut counts) = position(2, &[]);
        counts[0].add_indel(EquivalentIndelRegion::new(0, 10, b"A", b"-", 0));
        counts[1].add_indel(EquivalentIndelRegion::new(0, 10, b"A", b"-", 1));
        counts[1].add_indel(EquivalentIndelRegion::new(0, 10, b"A", b"-", 1));

        let mut state = FilterState::default();
        state.reset(2);
        state.filter_indels(&mut counts, |_| 2);
        assert!(!counts[0].indels()[0].is_filtered());

        state.filter_indels(&mut counts, |_| 3);
        assert!(counts[0].indels()[0].is_filtered());
        assert!(counts[1].indels()[0].is_filtered());
    }
}
