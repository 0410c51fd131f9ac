//! Similarity Scorer
//!
//! Scores each comparable 0-100 against the subject:
//!
//! | Term      | Points                                            |
//! |-----------|---------------------------------------------------|
//! | Base      | 50                                                |
//! | Category  | +30 same recorded category, +15 same but inferred |
//! | Price     | 30 − round(% gap to reference), floor 0           |
//! | Recency   | 20 − round(months since sale ÷ 3), floor 0        |
//! | Distance  | 20 − round(miles × 20), floor 0, when known       |
//!
//! Reference price is the median of non-excluded comparables. Excluded
//! comparables always score 0.
//!
//! The total is capped at 100, and a same-category comparable at the
//! reference price already reaches 110 before recency. Recency ordering is
//! therefore guaranteed by `recency_points`, not by the capped total.

use crate::stats::{median, months_between};
use crate::types::{ComparableSale, PropertyCategory, SubjectProperty};
use chrono::NaiveDate;

const BASE: i64 = 50;
const SAME_CATEGORY: i64 = 30;
const SAME_CATEGORY_INFERRED: i64 = 15;
const PRICE_MAX: i64 = 30;
const RECENCY_MAX: i64 = 20;
const DISTANCE_MAX: i64 = 20;

#[derive(Debug, Default, Clone)]
pub struct SimilarityScorer;

impl SimilarityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score one comparable
    ///
    /// Bedroom count is not yet part of the score; sold-price records carry
    /// no bedroom data.
    pub fn score(
        &self,
        comp: &ComparableSale,
        subject: &SubjectProperty,
        reference_price: f64,
        as_of: NaiveDate,
    ) -> u8 {
        if comp.excluded {
            return 0;
        }

        let category = category_points(comp, subject.category);

        let price = if reference_price > 0.0 {
            let gap_pct = (comp.price as f64 - reference_price).abs() / reference_price * 100.0;
            (PRICE_MAX - gap_pct.round() as i64).max(0)
        } else {
            0
        };

        let recency = recency_points(months_between(comp.sale_date, as_of));

        let distance = comp
            .distance_miles
            .map(|miles| (DISTANCE_MAX - (miles * 20.0).round() as i64).max(0))
            .unwrap_or(0);

        (BASE + category + price + recency + distance).clamp(0, 100) as u8
    }

    /// Score every comparable against the median of usable prices
    pub fn score_all(
        &self,
        mut comparables: Vec<ComparableSale>,
        subject: &SubjectProperty,
        as_of: NaiveDate,
    ) -> Vec<ComparableSale> {
        let usable_prices: Vec<f64> = comparables
            .iter()
            .filter(|c| c.is_usable())
            .map(|c| c.price as f64)
            .collect();
        let reference = median(&usable_prices).unwrap_or(0.0);

        for comp in comparables.iter_mut() {
            comp.similarity = self.score(comp, subject, reference, as_of);
        }
        comparables
    }
}

/// Recency term: one point lost per three months since the sale, floor 0
pub fn recency_points(months_since_sale: f64) -> i64 {
    (RECENCY_MAX - (months_since_sale / 3.0).round() as i64).max(0)
}

fn category_points(comp: &ComparableSale, subject: PropertyCategory) -> i64 {
    if !comp.category.is_known() || comp.category != subject {
        0
    } else if comp.category_inferred {
        SAME_CATEGORY_INFERRED
    } else {
        SAME_CATEGORY
    }
}
