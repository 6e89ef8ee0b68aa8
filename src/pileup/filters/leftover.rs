use super::{FilterState, GenotypeFilter};
use crate::pileup::{
    counts::{base_index, SampleCountInfo, BASE_MAX_INDEX},
    observation::PositionData,
};

/// Removal threshold grows by this factor over the removals already made
const MULTIPLIER: u32 = 2;

/// Drops alleles left with fewer calls than earlier filters removed
///
/// Runs after other filters. Each sample's threshold is the minimum variation support
/// plus everything already removed in that sample, doubled. An allele under the
/// threshold is only removed when every sample carrying it is under its threshold.
#[derive(Debug, Clone)]
pub struct LeftOverFilter {
    min_variation_support: u32,
    thresholds: Vec<u32>,
    state: FilterState,
}
impl LeftOverFilter {
    #[must_use]
    pub fn new(min_variation_support: u32) -> Self {
        Self {
            min_variation_support,
            thresholds: Vec::new(),
            state: FilterState::default(),
        }
    }

    fn compute_thresholds(&mut self, data: &PositionData, counts: &[SampleCountInfo]) {
        self.thresholds.clear();
        self.thresholds.resize(counts.len(), self.min_variation_support);
        for observation in data.observations.iter().filter(|o| o.filtered) {
            if let Some(threshold) = self.thresholds.get_mut(observation.sample_index) {
                *threshold += 1;
            }
        }
        for info in counts {
            let filtered = info.indels().iter().filter(|i| i.is_filtered()).count() as u32;
            self.thresholds[info.sample_index] += filtered;
        }
        for threshold in &mut self.thresholds {
            *threshold *= MULTIPLIER;
        }
    }
}
impl GenotypeFilter for LeftOverFilter {
    fn describe(&self) -> String {
        format!("count(allele) < ({MULTIPLIER} * filtered)")
    }

    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        self.compute_thresholds(data, counts);
        for info in counts.iter_mut() {
            info.clear_filtered_genotypes();
        }

        let mut candidates = Vec::new();
        for (i, observation) in data.observations.iter().enumerate() {
            if observation.filtered {
                continue;
            }
            self.state.screened += 1;
            let Some(info) = counts.get_mut(observation.sample_index) else {
                continue;
            };
            let genotype = base_index(observation.base());
            let count = info.counts[genotype];
            if count > 0 && count < self.thresholds[observation.sample_index] {
                info.suggest_removing_genotype(genotype);
                candidates.push((genotype, i));
            }
        }

        for genotype in 0..BASE_MAX_INDEX {
            let carriers = counts.iter().filter(|c| c.counts[genotype] > 0).count();
            let suggesting = counts
                .iter()
                .filter(|c| c.has_filtered_genotype(genotype))
                .count();
            if suggesting == 0 {
                continue;
            }
            if carriers == suggesting {
                for (_, i) in candidates.iter().filter(|(g, _)| *g == genotype) {
                    self.state.remove(&mut data.observations[*i], counts);
                }
            } else {
                for info in counts.iter_mut() {
                    info.clear_filtered_genotype(genotype);
                }
            }
        }

        let thresholds = &self.thresholds;
        self.state.filter_indels(counts, |s| thresholds[s]);
        self.state.adjust_ref_var_counts(counts);
    }

    fn state(&self) -> &FilterState {
        &self.state
    }
}
