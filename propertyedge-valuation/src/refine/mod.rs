//! Comparable refinement chain
//!
//! Fixed order, each stage consuming the previous stage's output:
//!
//! 1. `enrichment`: energy-certificate merge, price per area, distance
//! 2. `type_inference`: fill in unclassified categories
//! 3. `outliers`: flag records that would distort the evidence
//! 4. `similarity`: score the survivors against the subject

pub mod enrichment;
pub mod outliers;
pub mod rules;
pub mod similarity;
pub mod type_inference;

pub use enrichment::{CertificateFacts, CertificateIndex, EnrichmentEngine};
pub use outliers::OutlierDetector;
pub use similarity::SimilarityScorer;
pub use type_inference::TypeInferencer;

use crate::types::{ComparableSale, SubjectProperty};
use chrono::NaiveDate;

/// The four refinement stages wired together
#[derive(Debug, Default, Clone)]
pub struct RefinementChain {
    pub inferencer: TypeInferencer,
    pub detector: OutlierDetector,
    pub scorer: SimilarityScorer,
}

impl RefinementChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run inference, outlier detection and scoring over enriched comparables
    pub fn refine(
        &self,
        comparables: Vec<ComparableSale>,
        subject: &SubjectProperty,
        as_of: NaiveDate,
    ) -> Vec<ComparableSale> {
        let comparables = self.inferencer.infer(comparables);
        let comparables = self.detector.detect(comparables, subject.category);
        self.scorer.score_all(comparables, subject, as_of)
    }
}
