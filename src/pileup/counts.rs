//! Per-sample allele counts at one position.
//!
//! Genotypes are numbered with the five base slots first, followed by the indel
//! candidates of the sample in the order they were added.

use std::collections::BTreeSet;

use super::observation::{EquivalentIndelRegion, PositionObservation, Strand};

pub const BASE_A_INDEX: usize = 0;
pub const BASE_T_INDEX: usize = 1;
pub const BASE_C_INDEX: usize = 2;
pub const BASE_G_INDEX: usize = 3;
pub const BASE_OTHER_INDEX: usize = 4;
/// Number of base slots
pub const BASE_MAX_INDEX: usize = BASE_OTHER_INDEX + 1;

/// Slot of a base; anything but A, C, T or G counts as other
#[must_use]
pub fn base_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => BASE_A_INDEX,
        b'T' => BASE_T_INDEX,
        b'C' => BASE_C_INDEX,
        b'G' => BASE_G_INDEX,
        _ => BASE_OTHER_INDEX,
    }
}

/// Base of a slot
#[must_use]
pub fn base_char(index: usize) -> u8 {
    match index {
        BASE_A_INDEX => b'A',
        BASE_T_INDEX => b'T',
        BASE_C_INDEX => b'C',
        BASE_G_INDEX => b'G',
        _ => b'N',
    }
}

/// Allele counts of one sample at one position
#[derive(Debug, Clone, Default)]
pub struct SampleCountInfo {
    pub sample_index: usize,
    pub reference_base: u8,
    pub counts: [u32; BASE_MAX_INDEX],
    pub forward_counts: [u32; BASE_MAX_INDEX],
    pub reverse_counts: [u32; BASE_MAX_INDEX],
    pub ref_count: u32,
    pub var_count: u32,
    /// Observations and indels dropped as likely errors
    pub failed_count: u32,
    pub distinct_read_indices: BTreeSet<u32>,
    indels: Vec<EquivalentIndelRegion>,
    /// Genotypes a filter suggested removing
    filtered_genotypes: BTreeSet<usize>,
}
impl SampleCountInfo {
    #[must_use]
    pub fn new(sample_index: usize, reference_base: u8) -> Self {
        Self {
            sample_index,
            reference_base,
            ..Self::default()
        }
    }

    /// Counts one observation
    pub fn observe(&mut self, observation: &PositionObservation) {
        let index = base_index(observation.base());
        self.counts[index] += 1;
        match observation.strand {
            Strand::Forward => self.forward_counts[index] += 1,
            Strand::Reverse => self.reverse_counts[index] += 1,
        }
        if observation.matches_reference {
            self.ref_count += 1;
        } else {
            self.var_count += 1;
        }
        self.distinct_read_indices.insert(observation.read_index);
    }

    /// Uncounts one base of `observation`'s allele
    ///
    /// Returns false, leaving the counts untouched, when the allele has no count left.
    pub fn remove(&mut self, observation: &PositionObservation) -> bool {
        let index = base_index(observation.base());
        let Some(count) = self.counts[index].checked_sub(1) else {
            log::error!(
                "sample {}: removing {} would make its count negative",
                self.sample_index,
                observation.base() as char
            );
            return false;
        };
        self.counts[index] = count;
        let stranded = match observation.strand {
            Strand::Forward => &mut self.forward_counts[index],
            Strand::Reverse => &mut self.reverse_counts[index],
        };
        *stranded = stranded.saturating_sub(1);
        true
    }

    /// Adds an indel candidate, or bumps the frequency of an equal one
    pub fn add_indel(&mut self, indel: EquivalentIndelRegion) {
        match self.indels.iter_mut().find(|i| **i == indel) {
            Some(existing) => existing.set_frequency(existing.raw_frequency() + indel.raw_frequency()),
            None => self.indels.push(indel),
        }
    }

    #[must_use]
    pub fn has_indels(&self) -> bool {
        !self.indels.is_empty()
    }

    #[must_use]
    pub fn indels(&self) -> &[EquivalentIndelRegion] {
        &self.indels
    }

    pub fn indels_mut(&mut self) -> &mut [EquivalentIndelRegion] {
        &mut self.indels
    }

    /// Drops filtered indels and returns how many were dropped
    pub fn remove_filtered_indels(&mut self) -> usize {
        let before = self.indels.len();
        self.indels.retain(|i| !i.is_filtered());
        before - self.indels.len()
    }

    /// Number of genotypes: the base slots plus the indels
    #[must_use]
    pub fn genotype_max_index(&self) -> usize {
        BASE_MAX_INDEX + self.indels.len()
    }

    #[must_use]
    pub fn is_indel(&self, genotype: usize) -> bool {
        genotype >= BASE_MAX_INDEX
    }

    #[must_use]
    pub fn genotype_count(&self, genotype: usize) -> u32 {
        if genotype < BASE_MAX_INDEX {
            self.counts[genotype]
        } else {
            self.indels
                .get(genotype - BASE_MAX_INDEX)
                .map_or(0, EquivalentIndelRegion::frequency)
        }
    }

    /// Restores a genotype count; restoring an indel also clears its filtered flag
    pub fn set_genotype_count(&mut self, genotype: usize, count: u32) {
        if genotype < BASE_MAX_INDEX {
            self.counts[genotype] = count;
        } else if let Some(indel) = self.indels.get_mut(genotype - BASE_MAX_INDEX) {
            indel.set_frequency(count);
            indel.clear_filtered();
        }
    }

    /// Sum of the base counts
    #[must_use]
    pub fn sum_counts(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Count of the most frequent genotype
    #[must_use]
    pub fn max_genotype_count(&self) -> u32 {
        (0..self.genotype_max_index())
            .map(|g| self.genotype_count(g))
            .max()
            .unwrap_or(0)
    }

    pub fn suggest_removing_genotype(&mut self, genotype: usize) {
        self.filtered_genotypes.insert(genotype);
    }

    #[must_use]
    pub fn has_filtered_genotype(&self, genotype: usize) -> bool {
        self.filtered_genotypes.contains(&genotype)
    }

    pub fn clear_filtered_genotype(&mut self, genotype: usize) {
        self.filtered_genotypes.remove(&genotype);
    }

    pub fn clear_filtered_genotypes(&mut self) {
        self.filtered_genotypes.clear();
    }
}
