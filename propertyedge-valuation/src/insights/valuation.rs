//! Fair value estimate and asking-price assessment
//!
//! The estimate is produced by a `ValuationOracle`. The default oracle works
//! purely from comparable quartiles; other oracles (e.g. a language-model
//! backed one) plug in behind the same trait.
//!
//! The assessment depends on the asking price and is therefore recomputed
//! for every caller, including on cache hits.

use crate::stats::{format_gbp, median, percent_diff, quantile, round_to_nearest};
use crate::types::{AreaData, ComparableSale, SubjectProperty, Tenure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Floor area the size adjustment is relative to
pub const BASELINE_FLOOR_AREA_SQM: f64 = 68.0;
const SIZE_ADJUSTMENT_MIN: f64 = 0.92;
const SIZE_ADJUSTMENT_MAX: f64 = 1.10;
const ROUNDING: i64 = 1000;

/// Low / mid / high fair value, rounded to £1,000
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValue {
    pub low: i64,
    pub mid: i64,
    pub high: i64,
    pub comps_used: usize,
    pub size_adjustment: f64,
    pub notes: Vec<String>,
}

/// Suggested opening offer and negotiating band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferStrategy {
    pub anchor: i64,
    pub band_low: i64,
    pub band_high: i64,
}

/// Asking price judged against the fair value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAssessment {
    pub asking_price: i64,
    pub asking_vs_mid_pct: f64,
    /// 0-100
    pub score: u8,
    pub label: String,
    pub offer: OfferStrategy,
    pub notes: Vec<String>,
}

/// Opaque source of a fair value estimate
#[async_trait]
pub trait ValuationOracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the oracle has nothing to go on
    async fn estimate(
        &self,
        subject: &SubjectProperty,
        comparables: &[ComparableSale],
        area: &AreaData,
    ) -> Option<FairValue>;
}

/// Quartile estimate over usable comparables with a light size adjustment
#[derive(Debug, Clone)]
pub struct ComparablesEstimator {
    baseline_area_sqm: f64,
}

impl Default for ComparablesEstimator {
    fn default() -> Self {
        Self {
            baseline_area_sqm: BASELINE_FLOOR_AREA_SQM,
        }
    }
}

impl ComparablesEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous core of the estimate
    pub fn estimate_from(
        &self,
        subject: &SubjectProperty,
        comparables: &[ComparableSale],
    ) -> Option<FairValue> {
        let prices: Vec<f64> = comparables
            .iter()
            .filter(|c| c.is_usable() && c.price > 0)
            .map(|c| c.price as f64)
            .collect();

        let mid = median(&prices)?;
        let q25 = quantile(&prices, 0.25)?;
        let q75 = quantile(&prices, 0.75)?;

        let mut notes = vec![format!(
            "Comparable quartiles (unadjusted): Q25 {}, median {}, Q75 {}",
            format_gbp(q25),
            format_gbp(mid),
            format_gbp(q75)
        )];

        let size_adjustment = match subject.floor_area_sqm {
            Some(area) if area > 0.0 => {
                let factor = (area / self.baseline_area_sqm)
                    .sqrt()
                    .clamp(SIZE_ADJUSTMENT_MIN, SIZE_ADJUSTMENT_MAX);
                notes.push(format!(
                    "Size adjustment {:.3} for {:.1} sqm against a {:.0} sqm baseline",
                    factor, area, self.baseline_area_sqm
                ));
                factor
            }
            _ => 1.0,
        };

        Some(FairValue {
            low: round_to_nearest((q25 * size_adjustment).trunc(), ROUNDING),
            mid: round_to_nearest((mid * size_adjustment).trunc(), ROUNDING),
            high: round_to_nearest((q75 * size_adjustment).trunc(), ROUNDING),
            comps_used: prices.len(),
            size_adjustment,
            notes,
        })
    }
}

#[async_trait]
impl ValuationOracle for ComparablesEstimator {
    fn name(&self) -> &'static str {
        "comparables"
    }

    async fn estimate(
        &self,
        subject: &SubjectProperty,
        comparables: &[ComparableSale],
        _area: &AreaData,
    ) -> Option<FairValue> {
        self.estimate_from(subject, comparables)
    }
}

/// Score the asking price against the estimate
///
/// `None` without an asking price or a positive mid value.
pub fn assess(
    subject: &SubjectProperty,
    estimate: &FairValue,
    energy_rating: Option<&str>,
) -> Option<PriceAssessment> {
    let asking = subject.asking_price?;
    let deviation = percent_diff(asking as f64, estimate.mid as f64)?;

    let price_component = (40 - (deviation.abs() / 15.0 * 40.0) as i64).max(0);
    let data_component = if subject.floor_area_sqm.is_some_and(|a| a > 0.0) { 10 } else { 0 }
        + estimate.comps_used.min(10) as i64;
    let tenure_component = match subject.tenure {
        Tenure::Freehold => 15,
        Tenure::Leasehold { .. } => 10,
    };
    let energy_component = match energy_rating.map(|r| r.trim().to_uppercase()) {
        Some(r) if r == "A" || r == "B" => 15,
        Some(r) if r == "C" => 12,
        Some(r) if r == "D" => 9,
        Some(r) if !r.is_empty() => 7,
        _ => 8,
    };
    let behaviour_component = 6;

    let total = price_component
        + data_component
        + tenure_component
        + energy_component
        + behaviour_component;
    let score = total.clamp(0, 100) as u8;

    Some(PriceAssessment {
        asking_price: asking,
        asking_vs_mid_pct: (deviation * 10.0).round() / 10.0,
        score,
        label: score_label(score).to_string(),
        offer: offer_strategy(estimate),
        notes: vec![format!(
            "Asking vs fair mid {:+.1}%, price component {}/40",
            deviation, price_component
        )],
    })
}

pub fn score_label(score: u8) -> &'static str {
    match score {
        80..=u8::MAX => "Reasonably priced",
        60..=79 => "Slight premium / negotiate",
        40..=59 => "Overpriced unless there's hidden value",
        _ => "Stretch pricing / proceed cautiously",
    }
}

/// Anchor near 95% of mid (never below 98% of low), band ±2%
pub fn offer_strategy(estimate: &FairValue) -> OfferStrategy {
    let anchor = ((estimate.mid as f64 * 0.95) as i64).max((estimate.low as f64 * 0.98) as i64);
    let band_low = (anchor as f64 * 0.98) as i64;
    let band_high = (anchor as f64 * 1.02) as i64;

    OfferStrategy {
        anchor: round_to_nearest(anchor as f64, ROUNDING),
        band_low: round_to_nearest(band_low as f64, ROUNDING),
        band_high: round_to_nearest(band_high as f64, ROUNDING),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyCategory;
    use chrono::NaiveDate;

    fn subject(asking: Option<i64>, area: Option<f64>) -> SubjectProperty {
        SubjectProperty {
            address: "10 Acacia Avenue".to_string(),
            postcode: "LS6 2AB".to_string(),
            category: PropertyCategory::Terraced,
            bedrooms: 3,
            floor_area_sqm: area,
            year_built: None,
            tenure: Tenure::Freehold,
            asking_price: asking,
        }
    }

    fn comps(prices: &[i64]) -> Vec<ComparableSale> {
        prices
            .iter()
            .map(|p| {
                ComparableSale::new(
                    *p,
                    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                    "1 Acacia Avenue",
                    "LS6 2AB",
                    PropertyCategory::Terraced,
                )
            })
            .collect()
    }

    #[test]
    fn test_estimate_quartiles() {
        let fv = ComparablesEstimator::new()
            .estimate_from(
                &subject(None, None),
                &comps(&[200_000, 210_000, 220_000, 230_000, 240_000]),
            )
            .unwrap();
        assert_eq!((fv.low, fv.mid, fv.high), (210_000, 220_000, 230_000));
        assert_eq!(fv.comps_used, 5);
        assert_eq!(fv.size_adjustment, 1.0);
    }

    #[test]
    fn test_size_adjustment_clamped() {
        let big = ComparablesEstimator::new()
            .estimate_from(&subject(None, Some(200.0)), &comps(&[200_000]))
            .unwrap();
        assert_eq!(big.size_adjustment, 1.10);
        assert_eq!(big.mid, 220_000);

        let small = ComparablesEstimator::new()
            .estimate_from(&subject(None, Some(30.0)), &comps(&[200_000]))
            .unwrap();
        assert_eq!(small.size_adjustment, 0.92);
        assert_eq!(small.mid, 184_000);
    }

    #[test]
    fn test_estimate_ignores_excluded_and_empty() {
        let estimator = ComparablesEstimator::new();
        assert!(estimator.estimate_from(&subject(None, None), &[]).is_none());

        let mut all_excluded = comps(&[200_000]);
        all_excluded[0].excluded = true;
        assert!(estimator.estimate_from(&subject(None, None), &all_excluded).is_none());
    }

    #[test]
    fn test_assess_at_fair_value() {
        let fv = ComparablesEstimator::new()
            .estimate_from(
                &subject(None, None),
                &comps(&[200_000, 210_000, 220_000, 230_000, 240_000]),
            )
            .unwrap();
        let a = assess(&subject(Some(220_000), None), &fv, Some("C")).unwrap();
        // 40 price + 5 data + 15 freehold + 12 energy + 6 behaviour
        assert_eq!(a.score, 78);
        assert_eq!(a.label, "Slight premium / negotiate");
        assert_eq!(a.asking_vs_mid_pct, 0.0);
    }

    #[test]
    fn test_assess_overpriced() {
        let fv = FairValue {
            low: 190_000,
            mid: 200_000,
            high: 210_000,
            comps_used: 2,
            size_adjustment: 1.0,
            notes: Vec::new(),
        };
        let a = assess(&subject(Some(240_000), None), &fv, None).unwrap();
        // 20% over: price 0, data 2, tenure 15, energy unknown 8, behaviour 6
        assert_eq!(a.score, 31);
        assert_eq!(a.label, "Stretch pricing / proceed cautiously");
        assert_eq!(a.asking_vs_mid_pct, 20.0);
    }

    #[test]
    fn test_assess_requires_asking_price() {
        let fv = FairValue {
            low: 1,
            mid: 2,
            high: 3,
            comps_used: 1,
            size_adjustment: 1.0,
            notes: Vec::new(),
        };
        assert!(assess(&subject(None, None), &fv, None).is_none());
    }

    #[test]
    fn test_offer_strategy() {
        let fv = FairValue {
            low: 190_000,
            mid: 200_000,
            high: 210_000,
            comps_used: 5,
            size_adjustment: 1.0,
            notes: Vec::new(),
        };
        let offer = offer_strategy(&fv);
        // max(190_000, 186_200) = 190_000; band 186_200 / 193_800
        assert_eq!(offer.anchor, 190_000);
        assert_eq!(offer.band_low, 186_000);
        assert_eq!(offer.band_high, 194_000);
    }

    #[test]
    fn test_score_labels() {
        assert_eq!(score_label(80), "Reasonably priced");
        assert_eq!(score_label(60), "Slight premium / negotiate");
        assert_eq!(score_label(40), "Overpriced unless there's hidden value");
        assert_eq!(score_label(39), "Stretch pricing / proceed cautiously");
    }
}
