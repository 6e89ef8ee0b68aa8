//! Reconstruction of per-position observations from a sorted record stream.
//!
//! Records only store their differences to the reference. The walk replays each record
//! base by base: aligned bases between variations become reference observations, the
//! bases of a variation become variant observations and every variation with a gap
//! becomes an indel candidate at the position where it starts.
//!
//! Positions are kept pending until the stream has moved past them. Because the input is
//! sorted by start position, a record starting at `p` means no later record can add to a
//! position before `p`, so those positions are emitted.

use std::collections::{BTreeMap, VecDeque};

use super::{
    genome::RandomAccessSequence,
    observation::{EquivalentIndelRegion, PositionData, PositionObservation, Strand},
};
use crate::{
    error::{PipelineError, Result},
    record::{AlignmentRecord, SequenceVariation, GAP},
    source::AlignmentSource,
};

/// Placeholder for a reference base that is resolved when the position is emitted
const UNRESOLVED: u8 = 0;

/// Emits the observations of every covered position, in order
pub struct PileupIterator<S> {
    source: S,
    genome: Option<Box<dyn RandomAccessSequence + Send>>,
    pending: BTreeMap<u32, PositionData>,
    current_target: Option<u32>,
    last_start: Option<(u32, u32)>,
    ready: VecDeque<PositionData>,
    records: u64,
    done: bool,
}
impl<S: AlignmentSource> PileupIterator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            genome: None,
            pending: BTreeMap::new(),
            current_target: None,
            last_start: None,
            ready: VecDeque::new(),
            records: 0,
            done: false,
        }
    }

    /// Checks reference bases against a genome
    #[must_use]
    pub fn with_genome<G: RandomAccessSequence + Send + 'static>(mut self, genome: G) -> Self {
        self.genome = Some(Box::new(genome));
        self
    }

    /// Number of records walked so far
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Next position with at least one observation or indel candidate
    pub fn next_position(&mut self) -> Result<Option<PositionData>> {
        loop {
            if let Some(data) = self.ready.pop_front() {
                return Ok(Some(data));
            }
            if self.done {
                return Ok(None);
            }
            match self.source.next_record()? {
                Some(record) => self.advance(&record)?,
                None => {
                    self.flush_all();
                    self.done = true;
                    log::debug!("pileup walked {} records", self.records);
                }
            }
        }
    }

    fn advance(&mut self, record: &AlignmentRecord) -> Result<()> {
        let start = (record.target_index, record.position);
        if let Some(last) = self.last_start.filter(|last| start < *last) {
            return Err(PipelineError::UnsortedInput {
                target: start.0,
                position: start.1,
                last_target: last.0,
                last_position: last.1,
            }
            .into());
        }
        self.last_start = Some(start);
        if self.current_target == Some(record.target_index) {
            self.flush_before(record.position);
        } else {
            self.flush_all();
            self.current_target = Some(record.target_index);
        }
        self.records += 1;
        self.walk(record);
        Ok(())
    }

    fn flush_before(&mut self, position: u32) {
        let rest = self.pending.split_off(&position);
        let done = std::mem::replace(&mut self.pending, rest);
        for data in done.into_values() {
            let data = self.resolve_reference(data);
            self.ready.push_back(data);
        }
    }

    fn flush_all(&mut self) {
        for data in std::mem::take(&mut self.pending).into_values() {
            let data = self.resolve_reference(data);
            self.ready.push_back(data);
        }
    }

    /// Fills in the reference base of the reference observations
    ///
    /// Without a genome the base is taken from the variant observations; when none has
    /// one the reference observations count as other.
    fn resolve_reference(&self, mut data: PositionData) -> PositionData {
        let genome_base = self
            .genome
            .as_ref()
            .and_then(|g| g.base_at(data.target_index, data.position));
        let observed = data
            .observations
            .iter()
            .filter(|o| !o.matches_reference && o.from != GAP)
            .map(|o| o.from.to_ascii_uppercase())
            .collect::<Vec<_>>();
        if let Some(base) = genome_base {
            if let Some(mismatch) = observed.iter().find(|b| **b != base) {
                log::warn!(
                    "reference base mismatch at ({}, {}): genome has {}, reads imply {}",
                    data.target_index,
                    data.position,
                    base as char,
                    *mismatch as char
                );
                data.invalid = true;
            }
        }
        data.reference_base = genome_base.or_else(|| observed.first().copied());
        let base = data.reference_base.unwrap_or(b'N');
        for observation in data.observations.iter_mut().filter(|o| o.matches_reference) {
            observation.from = base;
            observation.to = base;
        }
        data
    }

    fn slot(&mut self, target: u32, position: u32) -> &mut PositionData {
        self.pending
            .entry(position)
            .or_insert_with(|| PositionData::new(target, position))
    }

    fn observe(&mut self, record: &AlignmentRecord, ref_pos: i64, observation: PositionObservation) {
        if let Ok(position) = u32::try_from(ref_pos) {
            self.slot(record.target_index, position)
                .observations
                .push(observation);
        }
    }

    fn observe_reference(&mut self, record: &AlignmentRecord, ref_pos: i64, read_index: i64) {
        let observation = PositionObservation {
            sample_index: record.sample_index as usize,
            read_index: read_index.max(0) as u32,
            from: UNRESOLVED,
            to: UNRESOLVED,
            matches_reference: true,
            quality: 0,
            strand: strand_of(record),
            filtered: false,
        };
        self.observe(record, ref_pos, observation);
    }

    fn observe_indel(&mut self, record: &AlignmentRecord, variation: &SequenceVariation) {
        let Some(end) = record.position.checked_add(variation.position) else {
            log::debug!(
                "indel of query {} starts past the end of target {}",
                record.query_index,
                record.target_index
            );
            return;
        };
        let start = end.saturating_sub(1);
        let indel = EquivalentIndelRegion::new(
            record.target_index,
            start,
            &variation.from,
            &variation.to,
            record.sample_index as usize,
        );
        self.slot(record.target_index, start)
            .observe_candidate_indel(indel);
    }

    /// Replays one record over the reference
    fn walk(&mut self, record: &AlignmentRecord) {
        let forward = !record.matching_reverse_strand;
        let step: i64 = if forward { 1 } else { -1 };
        let query_length = i64::from(record.query_length);
        let mut read_index = if forward { 0 } else { query_length + 1 };
        let mut ref_pos = i64::from(record.position) - 1;

        let left_padding = i64::from(record.query_position);
        let right_padding = (query_length + i64::from(record.num_deletions())
            - i64::from(record.target_aligned_length)
            - i64::from(record.num_insertions())
            - left_padding)
            .max(0);
        read_index += step * left_padding;

        let mut observed = 0i64;
        for variation in &record.sequence_variations {
            let before = if variation.from.first() == Some(&GAP) {
                i64::from(variation.position) - observed
            } else {
                i64::from(variation.position) - observed - 1
            };
            for _ in 0..before.max(0) {
                read_index += step;
                ref_pos += 1;
                self.observe_reference(record, ref_pos, read_index);
                observed += 1;
            }

            let len = variation.from.len().max(variation.to.len());
            for i in 0..len {
                let from = variation.from.get(i).copied().unwrap_or(GAP);
                let to = variation.to.get(i).copied().unwrap_or(GAP);
                if from != GAP {
                    observed += 1;
                    ref_pos += 1;
                }
                // a deletion does not consume read bases, except once on the reverse strand
                if to != GAP || (!forward && i == 0) {
                    read_index += step;
                }
                // inserted bases have no reference position of their own
                if from != GAP {
                    let observation = PositionObservation {
                        sample_index: record.sample_index as usize,
                        read_index: read_index.max(0) as u32,
                        from,
                        to,
                        matches_reference: false,
                        quality: variation.to_quality.get(i).copied().unwrap_or(0),
                        strand: strand_of(record),
                        filtered: false,
                    };
                    self.observe(record, ref_pos, observation);
                }
                if to == GAP && !forward && i == len - 1 {
                    read_index -= step;
                }
            }
            if variation.is_indel() {
                self.observe_indel(record, variation);
            }
        }

        while (forward && read_index < query_length - right_padding)
            || (!forward && read_index > 1 + right_padding)
        {
            read_index += step;
            ref_pos += 1;
            self.observe_reference(record, ref_pos, read_index);
        }
    }
}
impl<S: AlignmentSource> Iterator for PileupIterator<S> {
    type Item = Result<PositionData>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_position().transpose()
    }
}

fn strand_of(record: &AlignmentRecord) -> Strand {
    if record.matching_reverse_strand {
        Strand::Reverse
    } else {
        Strand::Forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pileup::genome::InMemoryGenome;

    struct VecSource(std::vec::IntoIter<AlignmentRecord>);
    impl AlignmentSource for VecSource {
        fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
            Ok(self.0.next())
        }
    }

    fn source(records: Vec<AlignmentRecord>) -> VecSource {
        VecSource(records.into_iter())
    }

    fn read(position: u32, length: u32) -> AlignmentRecord {
        let mut record = AlignmentRecord::new(0, 0, position);
        record.query_length = length;
        record.target_aligned_length = length;
        record
    }

    #[test]
    fn test_matching_read_covers_every_base() -> Result<()> {
        let positions = PileupIterator::new(source(vec![read(10, 4)])).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            positions.iter().map(|p| p.position).collect::<Vec<_>>(),
            vec![10, 11, 12, 13]
        );
        let read_indices = positions
            .iter()
            .map(|p| p.observations[0].read_index)
            .collect::<Vec<_>>();
        assert_eq!(read_indices, vec![1, 2, 3, 4]);
        assert!(positions.iter().all(|p| p.observations[0].matches_reference));
        Ok(())
    }

    #[test]
    fn test_reverse_strand_read_indices_count_down() -> Result<()> {
        let mut record = read(0, 3);
        record.matching_reverse_strand = true;
        let positions = PileupIterator::new(source(vec![record])).collect::<Result<Vec<_>>>()?;
        let read_indices = positions
            .iter()
            .map(|p| p.observations[0].read_index)
            .collect::<Vec<_>>();
        assert_eq!(read_indices, vec![3, 2, 1]);
        assert_eq!(positions[0].observations[0].strand, Strand::Reverse);
        Ok(())
    }

    #[test]
    fn test_mismatch_and_deletion() -> Result<()> {
        // read of 5 bases over 6 reference bases: a mismatch at 2 and a deletion at 4
        let mut record = read(100, 5);
        record.target_aligned_length = 6;
        record.sequence_variations = vec![
            SequenceVariation::new(b"A", b"G", 2, 2).with_quality(&[35]),
            SequenceVariation::new(b"T", b"-", 4, 4),
        ];
        let genome = InMemoryGenome::new(vec![[b"N".repeat(100), b"CATTTC".to_vec()].concat()]);
        let positions = PileupIterator::new(source(vec![record]))
            .with_genome(genome)
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(positions.len(), 6);

        let mismatch = &positions[1];
        assert_eq!(mismatch.position, 101);
        assert_eq!(mismatch.observations[0].to, b'G');
        assert_eq!(mismatch.observations[0].quality, 35);
        assert!(!mismatch.invalid);

        let deletion = &positions[3];
        assert!(deletion.observations[0].is_deletion());
        assert_eq!(deletion.candidate_indels.len(), 1);
        assert_eq!(deletion.candidate_indels[0].start, 103);

        let last = &positions[5];
        assert_eq!(last.reference_base, Some(b'C'));
        assert_eq!(last.observations[0].read_index, 5);
        Ok(())
    }

    #[test]
    fn test_insertion_does_not_advance_reference() -> Result<()> {
        let mut record = read(0, 5);
        record.target_aligned_length = 4;
        record.sequence_variations = vec![SequenceVariation::new(b"-", b"T", 2, 3)];
        let positions = PileupIterator::new(source(vec![record])).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            positions.iter().map(|p| p.position).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(positions[1].candidate_indels.len(), 1);
        assert_eq!(positions[2].observations[0].read_index, 4);
        Ok(())
    }

    #[test]
    fn test_indel_past_coordinate_range_is_skipped() -> Result<()> {
        let mut record = read(u32::MAX - 1, 5);
        record.target_aligned_length = 4;
        record.sequence_variations = vec![SequenceVariation::new(b"-", b"T", 4, 5)];
        let positions = PileupIterator::new(source(vec![record])).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            positions.iter().map(|p| p.position).collect::<Vec<_>>(),
            vec![u32::MAX - 1, u32::MAX]
        );
        assert!(positions.iter().all(|p| p.candidate_indels.is_empty()));
        Ok(())
    }

    #[test]
    fn test_reference_mismatch_flags_position() -> Result<()> {
        let mut record = read(0, 2);
        record.sequence_variations = vec![SequenceVariation::new(b"A", b"C", 1, 1)];
        let genome = InMemoryGenome::new(vec![b"GG".to_vec()]);
        let positions = PileupIterator::new(source(vec![record]))
            .with_genome(genome)
            .collect::<Result<Vec<_>>>()?;
        assert!(positions[0].invalid);
        assert!(!positions[1].invalid);
        Ok(())
    }

    #[test]
    fn test_positions_flush_in_order_across_reads() -> Result<()> {
        let mut second = read(2, 3);
        second.sample_index = 1;
        let mut other_target = read(0, 1);
        other_target.target_index = 1;
        let positions = PileupIterator::new(source(vec![read(0, 3), second, other_target]))
            .collect::<Result<Vec<_>>>()?;
        let keys = positions
            .iter()
            .map(|p| (p.target_index, p.position, p.observations.len()))
            .collect::<Vec<_>>();
        assert_eq!(keys, vec![(0, 0, 1), (0, 1, 1), (0, 2, 2), (0, 3, 1), (0, 4, 1), (1, 0, 1)]);
        Ok(())
    }

    #[test]
    fn test_unsorted_input_is_an_error() {
        let records = vec![read(10, 1), read(5, 1)];
        let result = PileupIterator::new(source(records)).collect::<Result<Vec<_>>>();
        assert!(matches!(
            result,
            Err(crate::Error::PipelineError(PipelineError::UnsortedInput { .. }))
        ));
    }
}
