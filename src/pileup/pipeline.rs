use super::{
    counts::SampleCountInfo,
    filters::GenotypeFilter,
    fixer::CountFixer,
    observation::{PositionData, PositionObservation},
    walk::PileupIterator,
};
use crate::{
    error::{PipelineError, Result},
    source::AlignmentSource,
};

/// Filtered counts of every sample at one position
#[derive(Debug, Clone)]
pub struct PositionCall {
    pub target_index: u32,
    pub position: u32,
    pub reference_base: u8,
    /// Counts, indexed by sample
    pub samples: Vec<SampleCountInfo>,
    /// Observations that passed every filter
    pub observations: Vec<PositionObservation>,
    /// The reads disagreed with the genome at this position
    pub invalid: bool,
}
impl PositionCall {
    /// Number of samples carrying a non-reference allele or an indel
    #[must_use]
    pub fn variant_samples(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.var_count > 0 || s.has_indels())
            .count()
    }
}

/// Counts the observations of each position and runs them through the filter chain
pub struct GenotypePipeline {
    num_samples: usize,
    filters: Vec<Box<dyn GenotypeFilter>>,
    fixer: Box<dyn CountFixer>,
    positions: u64,
}
impl GenotypePipeline {
    #[must_use]
    pub fn new(
        num_samples: usize,
        filters: Vec<Box<dyn GenotypeFilter>>,
        fixer: Box<dyn CountFixer>,
    ) -> Self {
        Self {
            num_samples,
            filters,
            fixer,
            positions: 0,
        }
    }

    /// Criteria of the filters, in the order they run
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.describe()).collect()
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Number of positions processed so far
    #[must_use]
    pub fn positions(&self) -> u64 {
        self.positions
    }

    /// Counts and filters one position
    pub fn process(&mut self, mut data: PositionData) -> Result<PositionCall> {
        let out_of_range = data
            .observations
            .iter()
            .map(|o| o.sample_index)
            .chain(data.candidate_indels.iter().map(|i| i.sample_index))
            .find(|s| *s >= self.num_samples);
        if let Some(sample) = out_of_range {
            return Err(PipelineError::SampleOutOfRange(sample, self.num_samples).into());
        }

        let reference_base = data.reference_base.unwrap_or(b'N');
        let mut counts = (0..self.num_samples)
            .map(|s| SampleCountInfo::new(s, reference_base))
            .collect::<Vec<_>>();
        for observation in &data.observations {
            counts[observation.sample_index].observe(observation);
        }
        for indel in data.candidate_indels.drain(..) {
            counts[indel.sample_index].add_indel(indel);
        }

        self.fixer.preserve_counts(&counts);
        for filter in &mut self.filters {
            filter.filter_genotypes(&mut data, &mut counts);
        }
        self.fixer.fix(&mut data, &mut counts);
        self.positions += 1;

        Ok(PositionCall {
            target_index: data.target_index,
            position: data.position,
            reference_base,
            samples: counts,
            observations: data.observations,
            invalid: data.invalid,
        })
    }

    /// Filtered calls of every position a pileup emits
    pub fn calls<'a, S: AlignmentSource + 'a>(
        &'a mut self,
        pileup: PileupIterator<S>,
    ) -> impl Iterator<Item = Result<PositionCall>> + 'a {
        pileup.map(move |data| data.and_then(|data| self.process(data)))
    }

    /// Logs the share of calls each filter removed
    pub fn log_summary(&self) {
        log::info!("genotype filters over {} positions", self.positions);
        for filter in &self.filters {
            let state = filter.state();
            log::info!(
                "{}: {} of {} removed ({:.2}%)",
                filter.describe(),
                state.filtered,
                state.screened,
                filter.percent_filtered_out()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        pileup::{
            config::{CountFixerKind, PipelineConfig},
            counts::{base_index, BASE_A_INDEX, BASE_C_INDEX, BASE_MAX_INDEX},
            filters::testing::{position, repeat},
            genome::InMemoryGenome,
            observation::{EquivalentIndelRegion, Strand},
        },
        record::{AlignmentRecord, SequenceVariation},
    };

    struct VecSource(std::vec::IntoIter<AlignmentRecord>);
    impl AlignmentSource for VecSource {
        fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
            Ok(self.0.next())
        }
    }

    #[test]
    fn test_major_minor_alleles_survive() -> Result<()> {
        let bases = [repeat(0, b'A', 8), repeat(0, b'C', 2)].concat();
        let (data, _) = position(1, &bases);
        let config = PipelineConfig {
            diploid: true,
            ..PipelineConfig::default()
        };
        let call = config.build(1).process(data)?;
        assert_eq!(call.samples[0].counts[BASE_A_INDEX], 8);
        assert_eq!(call.samples[0].counts[BASE_C_INDEX], 2);
        assert_eq!(call.samples[0].failed_count, 0);
        assert_eq!(call.observations.len(), 10);
        assert_eq!(call.variant_samples(), 1);
        Ok(())
    }

    #[test]
    fn test_sample_out_of_range() {
        let (data, _) = position(3, &repeat(2, b'A', 1));
        let err = PipelineConfig::default().build(2).process(data);
        assert!(matches!(
            err,
            Err(crate::Error::PipelineError(PipelineError::SampleOutOfRange(2, 2)))
        ));
    }

    #[test]
    fn test_calls_from_records() -> Result<()> {
        let genome = InMemoryGenome::new(vec![b"ACGTACGTAC".to_vec()]);
        let mut records = Vec::new();
        for sample in 0..2 {
            for _ in 0..3 {
                let mut record = AlignmentRecord::new(0, 0, 2);
                record.sample_index = sample;
                record.query_length = 4;
                record.target_aligned_length = 4;
                record
                    .sequence_variations
                    .push(SequenceVariation::new(b"T", b"A", 2, 2).with_quality(&[40]));
                records.push(record);
            }
        }
        let pileup = PileupIterator::new(VecSource(records.into_iter())).with_genome(genome);
        let mut pipeline = PipelineConfig::default().build(2);
        let calls = pipeline.calls(pileup).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            calls.iter().map(|c| c.position).collect::<Vec<_>>(),
            vec![2, 3, 4, 5]
        );
        let variant = &calls[1];
        assert_eq!(variant.reference_base, b'T');
        assert!(!variant.invalid);
        for sample in &variant.samples {
            assert_eq!(sample.counts[BASE_A_INDEX], 3);
            assert_eq!(sample.var_count, 3);
        }
        assert_eq!(pipeline.positions(), 4);
        Ok(())
    }

    fn random_position(rng: &mut SmallRng, num_samples: usize) -> PositionData {
        let mut data = PositionData::new(0, rng.random_range(0..1000));
        data.reference_base = Some(b'A');
        for read in 0..rng.random_range(0..60u32) {
            let to = b"AAAACGT-N"[rng.random_range(0..9)];
            data.observations.push(PositionObservation {
                sample_index: rng.random_range(0..num_samples),
                read_index: read + 1,
                from: b'A',
                to,
                matches_reference: to == b'A',
                quality: rng.random_range(0..45),
                strand: if rng.random_bool(0.5) {
                    Strand::Forward
                } else {
                    Strand::Reverse
                },
                filtered: false,
            });
        }
        for _ in 0..rng.random_range(0..4) {
            let (from, to) = if rng.random_bool(0.5) {
                (&b"AAA"[..], &b"---"[..])
            } else {
                (&b"--"[..], &b"CG"[..])
            };
            let sample = rng.random_range(0..num_samples);
            let indel = EquivalentIndelRegion::new(0, data.position, from, to, sample);
            data.observe_candidate_indel(indel);
        }
        data
    }

    fn assert_consistent(call: &PositionCall) {
        for sample in &call.samples {
            let kept = call
                .observations
                .iter()
                .filter(|o| o.sample_index == sample.sample_index)
                .collect::<Vec<_>>();
            for genotype in 0..BASE_MAX_INDEX {
                let observed = kept
                    .iter()
                    .filter(|o| base_index(o.base()) == genotype)
                    .count() as u32;
                assert_eq!(sample.counts[genotype], observed);
                assert_eq!(
                    sample.forward_counts[genotype] + sample.reverse_counts[genotype],
                    observed
                );
            }
            assert_eq!(sample.ref_count + sample.var_count, kept.len() as u32);
            assert!(sample.indels().iter().all(|i| !i.is_filtered()));
        }
        assert!(call.observations.iter().all(|o| !o.filtered));
    }

    #[test]
    fn test_counts_match_kept_observations() -> Result<()> {
        for fixer in [CountFixerKind::Simple, CountFixerKind::NoThresholdingEffect] {
            let mut rng = SmallRng::seed_from_u64(7);
            let config = PipelineConfig {
                diploid: true,
                strand_bias: true,
                count_fixer: fixer,
                ..PipelineConfig::default()
            };
            let mut pipeline = config.build(3);
            for _ in 0..500 {
                let call = pipeline.process(random_position(&mut rng, 3))?;
                assert_consistent(&call);
            }
        }
        Ok(())
    }
}
