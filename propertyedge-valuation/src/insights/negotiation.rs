//! Negotiation Point Builder
//!
//! Turns the refined evidence into at most three buyer talking points:
//! the interquartile price cluster, evidence weaknesses re-stated as
//! leverage, and the gap between asking price and estimate.

use super::confidence::{ConfidenceDriver, DriverKind};
use crate::stats::{format_gbp, percent_diff, quantile};
use crate::types::{ComparableSale, PropertyCategory};

pub const MAX_POINTS: usize = 3;

#[derive(Debug, Default, Clone)]
pub struct NegotiationPointBuilder;

impl NegotiationPointBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        comparables: &[ComparableSale],
        drivers: &[ConfidenceDriver],
        valuation: Option<i64>,
        asking_price: Option<i64>,
        category: PropertyCategory,
    ) -> Vec<String> {
        let mut points = Vec::new();

        let prices: Vec<f64> = comparables
            .iter()
            .filter(|c| c.is_usable())
            .map(|c| c.price as f64)
            .collect();
        if prices.len() >= 3 {
            if let (Some(q1), Some(q3)) = (quantile(&prices, 0.25), quantile(&prices, 0.75)) {
                let subject = if category.is_known() {
                    format!("{} sales", category)
                } else {
                    "sales".to_string()
                };
                points.push(format!(
                    "Most comparable {} cluster between {} and {}",
                    subject,
                    format_gbp(q1),
                    format_gbp(q3)
                ));
            }
        }

        for driver in drivers {
            let leverage = match driver.kind {
                DriverKind::NoStreetComps => {
                    "No sales on the street itself, so a street premium is unproven"
                }
                DriverKind::WideVariance => {
                    "Comparable prices vary widely, which supports an offer toward the lower end"
                }
                DriverKind::FewRecentSales => {
                    "Few sales in the last year, so current demand at this price is untested"
                }
                _ => continue,
            };
            points.push(leverage.to_string());
        }

        if let (Some(asking), Some(value)) = (asking_price, valuation) {
            if asking > value {
                if let Some(gap) = percent_diff(asking as f64, value as f64) {
                    points.push(format!(
                        "Asking price is {:.1}% above the estimated value of {}",
                        gap,
                        format_gbp(value as f64)
                    ));
                }
            }
        }

        points.truncate(MAX_POINTS);
        points
    }
}
