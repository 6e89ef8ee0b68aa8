use super::{FilterState, GenotypeFilter};
use crate::pileup::{counts::SampleCountInfo, observation::PositionData};

/// Phred score below which variant bases are dropped
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 30;

/// Drops variant bases with a low quality score
///
/// Deleted bases carry no quality and are kept.
#[derive(Debug, Clone)]
pub struct QualityScoreFilter {
    threshold: u8,
    state: FilterState,
}
impl Default for QualityScoreFilter {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY_THRESHOLD)
    }
}
impl QualityScoreFilter {
    #[must_use]
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            state: FilterState::default(),
        }
    }
}
impl GenotypeFilter for QualityScoreFilter {
    fn describe(&self) -> String {
        format!("q<{}", self.threshold)
    }

    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        for observation in &mut data.observations {
            self.state.screened += 1;
            if !observation.matches_reference
                && !observation.is_deletion()
                && observation.quality < self.threshold
            {
                self.state.remove(observation, counts);
            }
        }
        self.state.adjust_ref_var_counts(counts);
    }

    fn state(&self) -> &FilterState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pileup::{
        counts::{BASE_A_INDEX, BASE_C_INDEX, BASE_OTHER_INDEX},
        filters::testing::position,
        observation::Strand,
    };

    #[test]
    fn test_low_quality_variants_are_removed() {
        let (mut data, mut counts) = position(
            1,
            &[
                (0, b'A', 0, Strand::Forward),
                (0, b'C', 12, Strand::Forward),
                (0, b'C', 38, Strand::Forward),
                (0, b'-', 0, Strand::Forward),
            ],
        );
        let mut filter = QualityScoreFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert_eq!(counts[0].counts[BASE_A_INDEX], 1);
        assert_eq!(counts[0].counts[BASE_C_INDEX], 1);
        assert_eq!(counts[0].counts[BASE_OTHER_INDEX], 1);
        assert_eq!((counts[0].ref_count, counts[0].var_count), (1, 2));
        assert_eq!(data.num_filtered(), 1);
        assert!((filter.percent_filtered_out() - 25.0).abs() < 1e-9);
    }
}
