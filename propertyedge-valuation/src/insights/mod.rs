//! Insights derived from the refined comparable set
//!
//! - `confidence`: evidence-quality diagnostics
//! - `negotiation`: buyer talking points
//! - `valuation`: fair value estimate and asking-price assessment

pub mod confidence;
pub mod negotiation;
pub mod valuation;

pub use confidence::{ConfidenceDriver, ConfidenceDriverBuilder, DriverKind};
pub use negotiation::NegotiationPointBuilder;
pub use valuation::{
    ComparablesEstimator, FairValue, OfferStrategy, PriceAssessment, ValuationOracle,
};

use crate::types::{EvidenceBundle, SubjectProperty};

impl EvidenceBundle {
    /// Copy of the bundle with asking-price dependent fields recomputed
    ///
    /// Used on every cache hit: the cached bundle may have been built for a
    /// different asking price.
    pub fn repriced(&self, subject: &SubjectProperty) -> EvidenceBundle {
        let mut bundle = self.clone();
        let mid = bundle.estimate.as_ref().map(|e| e.mid);

        bundle.negotiation_points = NegotiationPointBuilder::new().build(
            &bundle.comparables,
            &bundle.confidence_drivers,
            mid,
            subject.asking_price,
            subject.category,
        );
        bundle.assessment = bundle
            .estimate
            .as_ref()
            .and_then(|e| valuation::assess(subject, e, bundle.subject_energy_rating.as_deref()));
        bundle
    }
}
