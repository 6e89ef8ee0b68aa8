use super::{FilterState, GenotypeFilter};
use crate::pileup::{
    counts::{base_index, SampleCountInfo, BASE_MAX_INDEX},
    observation::PositionData,
};

/// Keeps the two most frequent genotypes of every sample
///
/// When more than two genotypes share the top two counts, only the most frequent ones
/// are kept.
#[derive(Debug, Clone, Default)]
pub struct DiploidFilter {
    first_max: Vec<u32>,
    second_max: Vec<Option<u32>>,
    state: FilterState,
}
impl DiploidFilter {
    fn threshold_for_sample(&self, sample: usize) -> u32 {
        match self.second_max.get(sample) {
            Some(Some(second)) => *second,
            _ => self.first_max.get(sample).copied().unwrap_or(0),
        }
    }

    fn find_maxima(&mut self, counts: &[SampleCountInfo]) {
        self.first_max.clear();
        self.second_max.clear();
        for info in counts {
            let genotypes = (0..info.genotype_max_index())
                .map(|g| info.genotype_count(g))
                .filter(|c| *c > 0)
                .collect::<Vec<_>>();
            let first = genotypes.iter().copied().max().unwrap_or(0);
            let second = genotypes.iter().copied().filter(|c| *c < first).max();
            let tied = genotypes
                .iter()
                .filter(|c| **c == first || Some(**c) == second)
                .count();
            self.first_max.push(first);
            self.second_max.push(if tied > 2 { None } else { second });
        }
    }
}
impl GenotypeFilter for DiploidFilter {
    fn describe(&self) -> String {
        "diploid genome".to_string()
    }

    fn filter_genotypes(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        self.state.reset(counts.len());
        self.find_maxima(counts);

        let keep = counts
            .iter()
            .map(|info| {
                let mut keep = [true; BASE_MAX_INDEX];
                for (index, kept) in keep.iter_mut().enumerate() {
                    let count = info.counts[index];
                    *kept = count == self.first_max[info.sample_index]
                        || Some(count) == self.second_max[info.sample_index];
                }
                keep
            })
            .collect::<Vec<_>>();

        for observation in &mut data.observations {
            self.state.screened += 1;
            let Some(keep) = keep.get(observation.sample_index) else {
                continue;
            };
            if !keep[base_index(observation.base())] {
                self.state.remove(observation, counts);
            }
        }
        let thresholds = (0..counts.len())
            .map(|s| self.threshold_for_sample(s))
            .collect::<Vec<_>>();
        self.state.filter_indels(counts, |s| thresholds[s]);
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
        counts::{BASE_A_INDEX, BASE_C_INDEX, BASE_G_INDEX, BASE_T_INDEX},
        filters::testing::{position, repeat},
    };

    #[test]
    fn test_two_alleles_are_kept() {
        let bases = [repeat(0, b'A', 8), repeat(0, b'C', 2)].concat();
        let (mut data, mut counts) = position(1, &bases);
        let mut filter = DiploidFilter::default();
        filter.filter_genotypes(&mut data, &mut counts);
        assert_eq!(counts[0].counts[BASE_A_INDEX], 8);
        assert_eq!(counts[0].counts[BASE_C_INDEX], 2);
        assert_eq!(data.num_filtered(), 0);
        assert_eq!((counts[0].ref_count, counts[0].var_count), (8, 2));
    }

    #[test]
    fn test_third_allele_is_removed() {
        let bases = [repeat(0, b'A', 8), repeat(0, b'C', 3), repeat(0, b'G', 1)].concat();
        let (mut data, mut counts) = position(1, &bases);
        DiploidFilter::default().filter_genotypes(&mut data, &mut counts);
        assert_eq!(counts[0].counts[BASE_G_INDEX], 0);
        assert_eq!(counts[0].counts[BASE_C_INDEX], 3);
        assert_eq!(counts[0].var_count, 3);
    }

    #[test]
    fn test_tied_second_alleles_are_dropped() {
        let bases = [repeat(0, b'A', 8), repeat(0, b'C', 2), repeat(0, b'T', 2)].concat();
        let (mut data, mut counts) = position(1, &bases);
        DiploidFilter::default().filter_genotypes(&mut data, &mut counts);
        assert_eq!(counts[0].counts[BASE_A_INDEX], 8);
        assert_eq!(counts[0].counts[BASE_C_INDEX], 0);
        assert_eq!(counts[0].counts[BASE_T_INDEX], 0);
        assert_eq!(counts[0].var_count, 0);
    }
}
