use crate::record::GAP;

/// Read strand an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

/// One base of one read at one reference position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionObservation {
    /// Sample (archive) the read belongs to
    pub sample_index: usize,
    /// 1-based index of the base in the read
    pub read_index: u32,
    /// Reference base
    pub from: u8,
    /// Read base; `-` for a deleted base
    pub to: u8,
    pub matches_reference: bool,
    pub quality: u8,
    pub strand: Strand,
    /// Set by a genotype filter when the observation is a likely sequencing error
    pub filtered: bool,
}
impl PositionObservation {
    /// The allele this observation votes for
    #[must_use]
    pub fn base(&self) -> u8 {
        if self.matches_reference {
            self.from
        } else {
            self.to
        }
    }

    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.to == GAP
    }
}

/// A candidate insertion or deletion observed in one sample
///
/// Two regions are the same candidate when they agree on start, end, from, to and
/// sample; repeated observations increase `frequency` instead of adding a new region.
#[derive(Debug, Clone)]
pub struct EquivalentIndelRegion {
    pub target_index: u32,
    /// Reference position the indel starts at
    pub start: u32,
    /// End of the reference span, exclusive
    pub end: u32,
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub sample_index: usize,
    frequency: u32,
    filtered: bool,
}
impl EquivalentIndelRegion {
    #[must_use]
    pub fn new(target_index: u32, start: u32, from: &[u8], to: &[u8], sample_index: usize) -> Self {
        let span = from.iter().filter(|b| **b != GAP).count() as u32;
        Self {
            target_index,
            start,
            end: start + span,
            from: from.to_vec(),
            to: to.to_vec(),
            sample_index,
            frequency: 1,
            filtered: false,
        }
    }

    /// Number of reads supporting the indel; zero once filtered
    #[must_use]
    pub fn frequency(&self) -> u32 {
        if self.filtered {
            0
        } else {
            self.frequency
        }
    }

    /// Number of supporting reads, ignoring the filtered flag
    #[must_use]
    pub fn raw_frequency(&self) -> u32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
    }

    pub fn increment_frequency(&mut self) {
        self.frequency += 1;
    }

    pub fn mark_filtered(&mut self) {
        self.filtered = true;
    }

    pub fn clear_filtered(&mut self) {
        self.filtered = false;
    }

    #[must_use]
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// Same indel, whatever the sample
    #[must_use]
    pub fn same_site(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.from == other.from
            && self.to == other.to
    }
}
impl PartialEq for EquivalentIndelRegion {
    fn eq(&self, other: &Self) -> bool {
        self.same_site(other) && self.sample_index == other.sample_index
    }
}
impl Eq for EquivalentIndelRegion {}

/// Everything observed at one reference position
#[derive(Debug, Clone, Default)]
pub struct PositionData {
    pub target_index: u32,
    pub position: u32,
    pub observations: Vec<PositionObservation>,
    /// Indel candidates starting at this position, across samples
    pub candidate_indels: Vec<EquivalentIndelRegion>,
    /// Reference base, from the genome or inferred from the observations
    pub reference_base: Option<u8>,
    /// Set when the observations disagree with the genome
    pub invalid: bool,
}
impl PositionData {
    #[must_use]
    pub fn new(target_index: u32, position: u32) -> Self {
        Self {
            target_index,
            position,
            ..Self::default()
        }
    }

    /// Adds an indel, merging it into an equal candidate if there is one
    pub fn observe_candidate_indel(&mut self, indel: EquivalentIndelRegion) {
        match self.candidate_indels.iter_mut().find(|c| **c == indel) {
            Some(existing) => existing.increment_frequency(),
            None => self.candidate_indels.push(indel),
        }
    }

    #[must_use]
    pub fn has_candidate_indels(&self) -> bool {
        !self.candidate_indels.is_empty()
    }

    /// Observations no filter has removed
    pub fn kept(&self) -> impl Iterator<Item = &PositionObservation> {
        self.observations.iter().filter(|o| !o.filtered)
    }

    pub fn num_filtered(&self) -> usize {
        self.observations.iter().filter(|o| o.filtered).count()
    }
}
