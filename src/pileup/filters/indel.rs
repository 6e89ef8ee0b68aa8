use std::collections::HashMap;

use super::{FilterState, GenotypeFilter};
use crate::{
    pileup::{
        counts::SampleCountInfo,
        observation::{EquivalentIndelRegion, PositionData},
    },
    record::GAP,
};

/// Indels with a Poisson p-value above this are considered artifacts
const P_VALUE_CUTOFF: f64 = 0.05;

/// Cumulative Poisson probability `P(X <= k)` for a mean of `lambda`
fn poisson_cdf(lambda: f64, k: u32) -> f64 {
    let mut term = (-lambda).exp();
    let mut sum = term;
    for i in 1..=k {
        term *= lambda / f64::from(i);
        sum += term;
    }
    sum.min(1.0)
}

/// Number of bases equal to their predecessor, gaps excluded
fn count_repetitive_bases(bases: &[u8]) -> u32 {
    bases
        .windows(2)
        .filter(|w| w[0] == w[1] && w[1] != GAP)
        .count() as u32
}

/// Repeat length of the inserted or deleted bases
fn repeat_length(indel: &EquivalentIndelRegion) -> u32 {
    if indel.from.contains(&GAP) {
        count_repetitive_bases(&indel.to)
    } else {
        count_repetitive_bases(&indel.from)
    }
}

/// Drops indels no more frequent than their repeat context predicts
///
/// Sequencers slip in homopolymer runs, so the expected number of indel reads grows
/// with the repeat length. The expectation uses a rate of indel reads per repeat base
/// learned from every indel kept so far.
#[derive(Debug, Clone)]
pub struct CommonIndelArtifactFilter {
    cumulative_repeat_length: u64,
    cumulative_frequency: u64,
    rate: f64,
    p_values: HashMap<(u32, u32), f64>,
    state: FilterState,
}
impl Default for CommonIndelArtifactFilter {
    fn default() -> Self {
        Self {
            cumulative_repeat_length: 1,
            cumulative_frequency: 1,
            rate: 1.0,
            p_values: HashMap::new(),
            state: FilterState::default(),
        }
    }
}
impl CommonIndelArtifactFilter {
    /// Current indel reads per repeat base
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn expected_frequency(&self, repeat_length: u32) -> u32 {
        (self.rate * f64::from(repeat_length)).floor() as u32
    }

    fn p_value(&mut self, actual: u32, expected: u32) -> f64 {
        *self
            .p_values
            .entry((actual, expected))
            .or_insert_with(|| poisson_cdf(f64::from(actual), expected))
    }
}
impl GenotypeFilter for CommonIndelArtifactFilter {
    fn describe(&self) -> String {
        "indel frequency expected from repeat length".to_string()
    }

    fn filter_genotypes(&mut self, _data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        if !counts.iter().any(SampleCountInfo::has_indels) {
            return;
        }
        for info in counts.iter_mut() {
            for indel in info.indels_mut() {
                if indel.is_filtered() {
                    continue;
                }
                self.state.screened += 1;
                let repeat = repeat_length(indel);
                let expected = self.expected_frequency(repeat);
                if expected == 0 {
                    continue;
                }
                let actual = indel.frequency();
                self.cumulative_repeat_length += u64::from(repeat) * u64::from(actual);
                self.cumulative_frequency += u64::from(actual);
                let p_value = self.p_value(actual, expected);
                if actual <= expected || p_value > P_VALUE_CUTOFF {
                    log::trace!(
                        "indel {}/{} at {}: expected {expected}, observed {actual}, p={p_value:.3}",
                        String::from_utf8_lossy(&indel.from),
                        String::from_utf8_lossy(&indel.to),
                        indel.start
                    );
                    indel.mark_filtered();
                    self.state.filtered += 1;
                }
            }
        }
        self.rate = self.cumulative_frequency as f64 / self.cumulative_repeat_length as f64;
    }

    fn state(&self) -> &FilterState {
        &self.state
    }
}

/// Drops every indel at a site where the samples disagree on the indel
#[derive(Debug, Clone)]
pub struct EntropicIndelArtifactFilter {
    max_indels_per_site: usize,
    sample_fraction: f64,
    state: FilterState,
}
impl Default for EntropicIndelArtifactFilter {
    fn default() -> Self {
        Self::new(1, 0.25)
    }
}
impl EntropicIndelArtifactFilter {
    /// Filters a site carrying more than `max_indels_per_site` distinct indels, or where at
    /// least `sample_fraction` of the samples carry several distinct indels
    #[must_use]
    pub fn new(max_indels_per_site: usize, sample_fraction: f64) -> Self {
        Self {
            max_indels_per_site,
            sample_fraction,
            state: FilterState::default(),
        }
    }
}
impl GenotypeFilter for EntropicIndelArtifactFilter {
    fn describe(&self) -> String {
        format!(
            "more than {} distinct indels per site or in {}% of samples",
            self.max_indels_per_site,
            self.sample_fraction * 100.0
        )
    }

    fn filter_genotypes(&mut self, _data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        let mut sites: Vec<&EquivalentIndelRegion> = Vec::new();
        let mut artifact_samples = 0usize;
        for info in counts.iter() {
            let supported = info.indels().iter().filter(|i| i.frequency() > 0);
            let mut distinct_in_sample = 0;
            for indel in supported {
                distinct_in_sample += 1;
                self.state.screened += 1;
                if !sites.iter().any(|s| s.same_site(indel)) {
                    sites.push(indel);
                }
            }
            if distinct_in_sample > 1 {
                artifact_samples += 1;
            }
        }
        let num_sites = sites.len();
        let too_many_sites = num_sites > self.max_indels_per_site;
        let widespread = artifact_samples > 0
            && artifact_samples as f64 >= counts.len() as f64 * self.sample_fraction;
        if !(too_many_sites || widespread) {
            return;
        }
        log::trace!("{num_sites} distinct indels, {artifact_samples} samples with several");
        for info in counts.iter_mut() {
            for indel in info.indels_mut() {
                if !indel.is_filtered() {
                    indel.mark_filtered();
                    self.state.filtered += 1;
                }
            }
        }
    }

    fn state(&self) -> &FilterState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pileup::filters::testing::position;

    fn with_indel(info: &mut SampleCountInfo, from: &[u8], to: &[u8], frequency: u32) {
        let mut indel = EquivalentIndelRegion::new(0, 10, from, to, info.sample_index);
        indel.set_frequency(frequency);
        info.add_indel(indel);
    }

    #[test]
    fn test_poisson_cdf() {
        assert!((poisson_cdf(1.0, 0) - (-1.0f64).exp()).abs() < 1e-12);
        let expected = (-10.0f64).exp() * (1.0 + 10.0 + 50.0);
        assert!((poisson_cdf(10.0, 2) - expected).abs() < 1e-12);
        assert!(poisson_cdf(3.0, 100) <= 1.0);
    }

    #[test]
    fn test_repeat_length() {
        assert_eq!(count_repetitive_bases(b"AAAT"), 2);
        assert_eq!(count_repetitive_bases(b"--"), 0);
        assert_eq!(count_repetitive_bases(b""), 0);
        let insertion = EquivalentIndelRegion::new(0, 1, b"--", b"TT", 0);
        assert_eq!(repeat_length(&insertion), 1);
        let deletion = EquivalentIndelRegion::new(0, 1, b"CCC", b"---", 0);
        assert_eq!(repeat_length(&deletion), 2);
    }

    #[test]
    fn test_expected_indel_is_filtered() {
        let (mut data, mut counts) = position(1, &[]);
        with_indel(&mut counts[0], b"CCC", b"---", 2);
        let mut filter = CommonIndelArtifactFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert!(counts[0].indels()[0].is_filtered());
    }

    #[test]
    fn test_frequent_indel_is_kept_and_updates_rate() {
        let (mut data, mut counts) = position(1, &[]);
        with_indel(&mut counts[0], b"CCC", b"---", 10);
        let mut filter = CommonIndelArtifactFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert!(!counts[0].indels()[0].is_filtered());
        assert!((filter.rate() - 11.0 / 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_repetitive_indel_is_not_judged() {
        let (mut data, mut counts) = position(1, &[]);
        with_indel(&mut counts[0], b"-", b"G", 1);
        let mut filter = CommonIndelArtifactFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert!(!counts[0].indels()[0].is_filtered());
        assert_eq!(filter.state().screened, 1);
        assert!((filter.rate() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_shared_indel_is_kept() {
        let (mut data, mut counts) = position(4, &[]);
        with_indel(&mut counts[0], b"AC", b"--", 3);
        with_indel(&mut counts[2], b"AC", b"--", 4);
        let mut filter = EntropicIndelArtifactFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert!(!counts[0].indels()[0].is_filtered());
        assert!(!counts[2].indels()[0].is_filtered());
    }

    #[test]
    fn test_competing_indels_are_filtered() {
        let (mut data, mut counts) = position(4, &[]);
        with_indel(&mut counts[0], b"AC", b"--", 3);
        with_indel(&mut counts[1], b"-", b"T", 3);
        let mut filter = EntropicIndelArtifactFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert!(counts[0].indels()[0].is_filtered());
        assert!(counts[1].indels()[0].is_filtered());
        assert_eq!(filter.state().filtered, 2);
    }
}
