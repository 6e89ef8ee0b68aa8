use super::{FilterState, GenotypeFilter};
use crate::pileup::{
    counts::{base_index, SampleCountInfo, BASE_MAX_INDEX},
    observation::PositionData,
};

/// Drops variant alleles that only one strand supports
///
/// An allele needs `min_support` observations before its strand balance is judged.
#[derive(Debug, Clone)]
pub struct StrandBiasFilter {
    min_support: u32,
    state: FilterState,
}
impl Default for StrandBiasFilter {
    fn default() -> Self {
        Self::new(2)
    }
}
impl StrandBiasFilter {
    #[must_use]
    pub fn new(min_support: u32) -> Self {
        Self {
            min_support,
            state: FilterState::default(),
        }
    }
}
impl GenotypeFilter for StrandBiasFilter {
    fn describe(&self) -> String {
        format!("single strand support with count >= {}", self.min_support)
    }

    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        let biased = counts
            .iter()
            .map(|info| {
                let mut biased = [false; BASE_MAX_INDEX];
                for (index, flag) in biased.iter_mut().enumerate() {
                    let forward = info.forward_counts[index];
                    let reverse = info.reverse_counts[index];
                    *flag = forward + reverse >= self.min_support && (forward == 0 || reverse == 0);
                }
                biased
            })
            .collect::<Vec<_>>();

        for observation in &mut data.observations {
            self.state.screened += 1;
            if observation.matches_reference || observation.is_deletion() {
                continue;
            }
            if biased
                .get(observation.sample_index)
                .is_some_and(|b| b[base_index(observation.base())])
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
