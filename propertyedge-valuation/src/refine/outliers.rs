//! Outlier Detector
//!
//! Flags (never removes) comparables that would distort the evidence:
//!
//! - **Statistical:** price outside `[Q1 − 1.5·IQR, Q3 + 1.5·IQR]`
//! - **Non-residential:** address carries a farm/land/garage/etc. marker
//! - **Type mismatch:** category differs from the subject's AND price is
//!   more than 40% away from the batch median
//!
//! Reasons from several checks are joined with "; ". Batches smaller than
//! four records are returned unchanged.

use super::rules::{all_matches, NON_RESIDENTIAL_RULES};
use crate::stats::{median, percent_diff, quantile};
use crate::types::{ComparableSale, PropertyCategory};
use tracing::debug;

pub const MIN_RECORDS: usize = 4;
pub const IQR_MULTIPLIER: f64 = 1.5;
pub const TYPE_MISMATCH_THRESHOLD_PCT: f64 = 40.0;

#[derive(Debug, Clone)]
pub struct OutlierDetector {
    iqr_multiplier: f64,
    mismatch_threshold_pct: f64,
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self {
            iqr_multiplier: IQR_MULTIPLIER,
            mismatch_threshold_pct: TYPE_MISMATCH_THRESHOLD_PCT,
        }
    }
}

/// Price fences for one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceFences {
    pub lower: f64,
    pub upper: f64,
    pub median: f64,
}

impl OutlierDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// IQR fences and median, `None` below the minimum batch size
    pub fn fences(&self, comparables: &[ComparableSale]) -> Option<PriceFences> {
        if comparables.len() < MIN_RECORDS {
            return None;
        }
        let prices: Vec<f64> = comparables.iter().map(|c| c.price as f64).collect();
        let q1 = quantile(&prices, 0.25)?;
        let q3 = quantile(&prices, 0.75)?;
        let iqr = q3 - q1;
        Some(PriceFences {
            lower: q1 - self.iqr_multiplier * iqr,
            upper: q3 + self.iqr_multiplier * iqr,
            median: median(&prices)?,
        })
    }

    pub fn detect(
        &self,
        mut comparables: Vec<ComparableSale>,
        subject_category: PropertyCategory,
    ) -> Vec<ComparableSale> {
        let Some(fences) = self.fences(&comparables) else {
            return comparables;
        };

        let mut flagged = 0usize;
        for comp in comparables.iter_mut() {
            let price = comp.price as f64;
            let deviation = percent_diff(price, fences.median).unwrap_or(0.0);
            let mut reasons: Vec<String> = Vec::new();

            if price < fences.lower || price > fences.upper {
                let direction = if deviation >= 0.0 { "above" } else { "below" };
                reasons.push(format!(
                    "Extreme outlier: {:.0}% {} area median",
                    deviation.abs(),
                    direction
                ));
            }

            for marker in all_matches(NON_RESIDENTIAL_RULES, &comp.address) {
                reasons.push(format!("Non-residential address marker '{}'", marker));
            }

            if subject_category.is_known()
                && comp.category.is_known()
                && comp.category != subject_category
                && deviation.abs() > self.mismatch_threshold_pct
            {
                reasons.push(format!(
                    "Type mismatch: {} vs subject {} with {:.0}% price deviation",
                    comp.category_label(),
                    subject_category,
                    deviation.abs()
                ));
            }

            // Each run starts from a clean slate so repeated runs agree
            if reasons.is_empty() {
                comp.excluded = false;
                comp.exclusion_reason = None;
            } else {
                flagged += 1;
                comp.excluded = true;
                comp.exclusion_reason = Some(reasons.join("; "));
                comp.similarity = 0;
            }
        }

        debug!(
            comparables = comparables.len(),
            flagged,
            lower = fences.lower,
            upper = fences.upper,
            median = fences.median,
            "Outlier detection complete"
        );
        comparables
    }
}
