use super::{
    filters::{
        CommonIndelArtifactFilter, DiploidFilter, EntropicIndelArtifactFilter, GenotypeFilter,
        LeftOverFilter, QualityScoreFilter, QuarterFrequencyFilter, StrandBiasFilter,
        DEFAULT_QUALITY_THRESHOLD,
    },
    fixer::{CountFixer, NoThresholdingEffectCountFixer, SimpleCountFixer},
    pipeline::GenotypePipeline,
};

/// How filtered calls are reconciled with the counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountFixerKind {
    /// Drop every filtered call
    #[default]
    Simple,
    /// Restore genotypes that survived in at least one sample
    NoThresholdingEffect,
}

/// Configuration of the genotype filter chain
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub quality_threshold: u8,
    pub min_variation_support: u32,
    pub diploid: bool,
    pub quarter_frequency: bool,
    pub strand_bias: bool,
    pub indel_filters: bool,
    pub max_indels_per_site: usize,
    pub indel_sample_fraction: f64,
    pub count_fixer: CountFixerKind,
}
impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            min_variation_support: 1,
            diploid: false,
            quarter_frequency: true,
            strand_bias: false,
            indel_filters: true,
            max_indels_per_site: 1,
            indel_sample_fraction: 0.25,
            count_fixer: CountFixerKind::default(),
        }
    }
}
impl PipelineConfig {
    /// Builds the filter chain for `num_samples` samples
    #[must_use]
    pub fn build(&self, num_samples: usize) -> GenotypePipeline {
        let mut filters: Vec<Box<dyn GenotypeFilter>> =
            vec![Box::new(QualityScoreFilter::new(self.quality_threshold))];
        if self.strand_bias {
            filters.push(Box::new(StrandBiasFilter::default()));
        }
        filters.push(Box::new(LeftOverFilter::new(self.min_variation_support)));
        if self.diploid {
            filters.push(Box::new(DiploidFilter::default()));
        }
        if self.indel_filters {
            filters.push(Box::new(CommonIndelArtifactFilter::default()));
            filters.push(Box::new(EntropicIndelArtifactFilter::new(
                self.max_indels_per_site,
                self.indel_sample_fraction,
            )));
        }
        if self.quarter_frequency {
            filters.push(Box::new(QuarterFrequencyFilter::default()));
        }
        let fixer: Box<dyn CountFixer> = match self.count_fixer {
            CountFixerKind::Simple => Box::new(SimpleCountFixer),
            CountFixerKind::NoThresholdingEffect => {
                Box::new(NoThresholdingEffectCountFixer::default())
            }
        };
        GenotypePipeline::new(num_samples, filters, fixer)
    }
}
