use super::{FilterState, GenotypeFilter};
use crate::pileup::{
    counts::{base_index, SampleCountInfo},
    observation::PositionData,
};

/// Drops genotypes seen less than a quarter as often as the sample's most frequent one
#[derive(Debug, Clone, Default)]
pub struct QuarterFrequencyFilter {
    state: FilterState,
}
impl GenotypeFilter for QuarterFrequencyFilter {
    fn describe(&self) -> String {
        "count(allele) < max(count)/4".to_string()
    }

    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        let maxima = counts
            .iter()
            .map(SampleCountInfo::max_genotype_count)
            .collect::<Vec<_>>();
        let rare = counts
            .iter()
            .map(|info| info.counts.map(|count| count * 4 < maxima[info.sample_index]))
            .collect::<Vec<_>>();

        for observation in &mut data.observations {
            self.state.screened += 1;
            if rare
                .get(observation.sample_index)
                .is_some_and(|rare| rare[base_index(observation.base())])
            {
                self.state.remove(observation, counts);
            }
        }
        self.state.filter_indels(counts, |s| maxima[s].div_ceil(4));
        self.state.adjust_ref_var_counts(counts);
    }

    fn state(&self) -> &FilterState {
        &self.state
    }
}
