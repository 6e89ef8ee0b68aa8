//! Reconciliation of filtered observations with the final counts.

use super::{
    counts::{base_index, SampleCountInfo},
    observation::{PositionData, Strand},
};

/// Last stage of the filter chain
pub trait CountFixer: Send {
    /// Called with the unfiltered counts, before the first filter runs
    fn preserve_counts(&mut self, _counts: &[SampleCountInfo]) {}

    /// Drops what the filters removed and records it as failed
    fn fix(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]);
}

/// Drops every filtered observation and indel
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCountFixer;
impl CountFixer for SimpleCountFixer {
    fn fix(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        for observation in data.observations.iter().filter(|o| o.filtered) {
            if let Some(info) = counts.get_mut(observation.sample_index) {
                info.failed_count += 1;
            }
        }
        for info in counts.iter_mut() {
            info.failed_count += info.remove_filtered_indels() as u32;
        }
        data.observations.retain(|o| !o.filtered);
    }
}

/// Restores genotypes that survived filtering in at least one sample
///
/// Thresholds computed per sample remove an allele in shallow samples while keeping it in
/// deep ones, so the number of samples sharing an allele changes with coverage. A genotype
/// still present in some sample after filtering gets its original counts back in every
/// sample before the filtered remainder is dropped.
#[derive(Debug, Clone, Default)]
pub struct NoThresholdingEffectCountFixer {
    preserved: Vec<Vec<u32>>,
}
impl CountFixer for NoThresholdingEffectCountFixer {
    fn preserve_counts(&mut self, counts: &[SampleCountInfo]) {
        self.preserved = counts
            .iter()
            .map(|info| {
                (0..info.genotype_max_index())
                    .map(|g| info.genotype_count(g))
                    .collect::<Vec<_>>()
            })
            .collect();
    }

    fn fix(&mut self, data: &mut PositionData, counts: &mut [SampleCountInfo]) {
        let max_genotypes = counts
            .iter()
            .map(SampleCountInfo::genotype_max_index)
            .max()
            .unwrap_or(0);
        for genotype in 0..max_genotypes {
            let before = self
                .preserved
                .iter()
                .any(|p| p.get(genotype).copied().unwrap_or(0) > 0);
            let remaining = counts.iter().any(|c| c.genotype_count(genotype) > 0);
            if !(before && remaining) {
                continue;
            }
            for (info, preserved) in counts.iter_mut().zip(&self.preserved) {
                if let Some(count) = preserved.get(genotype) {
                    info.set_genotype_count(genotype, *count);
                }
            }
            for observation in data.observations.iter_mut().filter(|o| o.filtered) {
                if base_index(observation.base()) != genotype {
                    continue;
                }
                let Some(info) = counts.get_mut(observation.sample_index) else {
                    continue;
                };
                observation.filtered = false;
                match observation.strand {
                    Strand::Forward => info.forward_counts[genotype] += 1,
                    Strand::Reverse => info.reverse_counts[genotype] += 1,
                }
                if observation.matches_reference {
                    info.ref_count += 1;
                } else {
                    info.var_count += 1;
                }
            }
        }
        SimpleCountFixer.fix(data, counts);
    }
}
