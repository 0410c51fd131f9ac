//! Confidence Driver Builder
//!
//! Short diagnostics explaining how far the estimate can be trusted.
//! Checks always run in the same order, so identical inputs give identical
//! output:
//!
//! 1. Fewer than 5 usable comparables
//! 2. No usable comparables of the subject's category
//! 3. Only 1-2 usable comparables of the subject's category
//! 4. No comparable on the subject's street
//! 5. Price spread (max − min) above 40% of the mean
//! 6. Fewer than 3 sales in the last 12 months
//! 7. Outliers excluded

use crate::stats::months_between;
use crate::types::{ComparableSale, SubjectProperty};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    FewComparables,
    NoSameCategory,
    FewSameCategory,
    NoStreetComps,
    WideVariance,
    FewRecentSales,
    OutliersExcluded,
}

/// One diagnostic, typed so other builders can react to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDriver {
    pub kind: DriverKind,
    pub message: String,
}

impl ConfidenceDriver {
    fn new(kind: DriverKind, message: String) -> Self {
        Self { kind, message }
    }
}

#[derive(Debug, Clone)]
pub struct ConfidenceDriverBuilder {
    pub min_usable: usize,
    pub spread_threshold: f64,
    pub recent_window_months: f64,
    pub min_recent: usize,
}

impl Default for ConfidenceDriverBuilder {
    fn default() -> Self {
        Self {
            min_usable: 5,
            spread_threshold: 0.40,
            recent_window_months: 12.0,
            min_recent: 3,
        }
    }
}

impl ConfidenceDriverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `comparables` is the full refined list, excluded records included
    pub fn build(
        &self,
        comparables: &[ComparableSale],
        subject: &SubjectProperty,
        as_of: NaiveDate,
    ) -> Vec<ConfidenceDriver> {
        let usable: Vec<&ComparableSale> = comparables.iter().filter(|c| c.is_usable()).collect();
        let mut drivers = Vec::new();

        if usable.len() < self.min_usable {
            drivers.push(ConfidenceDriver::new(
                DriverKind::FewComparables,
                format!(
                    "Very few comparable sales ({} usable), so the estimate rests on thin evidence",
                    usable.len()
                ),
            ));
        }

        // Category checks are meaningless for an unclassified subject
        if subject.category.is_known() {
            let same = usable.iter().filter(|c| c.category == subject.category).count();
            match same {
                0 => drivers.push(ConfidenceDriver::new(
                    DriverKind::NoSameCategory,
                    format!("No comparable {} sales nearby", subject.category),
                )),
                1 | 2 => drivers.push(ConfidenceDriver::new(
                    DriverKind::FewSameCategory,
                    format!("Only {} comparable {} sale(s) nearby", same, subject.category),
                )),
                _ => {}
            }
        }

        if let Some(street) = subject.street_name() {
            let needle = format!(" {} ", street);
            let on_street = usable.iter().any(|c| {
                let haystack = format!(" {} ", street_text(&c.address));
                haystack.contains(&needle)
            });
            if !on_street {
                drivers.push(ConfidenceDriver::new(
                    DriverKind::NoStreetComps,
                    format!("No recent sales found on {}", title_case(&street)),
                ));
            }
        }

        if let Some(spread) = price_spread(&usable) {
            if spread > self.spread_threshold {
                drivers.push(ConfidenceDriver::new(
                    DriverKind::WideVariance,
                    format!(
                        "Wide price variance across comparables ({:.0}% spread)",
                        spread * 100.0
                    ),
                ));
            }
        }

        let recent = usable
            .iter()
            .filter(|c| months_between(c.sale_date, as_of) <= self.recent_window_months)
            .count();
        if recent < self.min_recent {
            drivers.push(ConfidenceDriver::new(
                DriverKind::FewRecentSales,
                format!("Only {} sale(s) in the last 12 months", recent),
            ));
        }

        let excluded = comparables.len() - usable.len();
        if excluded > 0 {
            drivers.push(ConfidenceDriver::new(
                DriverKind::OutliersExcluded,
                format!("{} outlier sale(s) excluded from the evidence", excluded),
            ));
        }

        drivers
    }
}

/// (max − min) / mean over usable prices, `None` when empty
fn price_spread(usable: &[&ComparableSale]) -> Option<f64> {
    if usable.is_empty() {
        return None;
    }
    let prices: Vec<f64> = usable.iter().map(|c| c.price as f64).collect();
    let max = prices.iter().copied().fold(f64::MIN, f64::max);
    let min = prices.iter().copied().fold(f64::MAX, f64::min);
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    if mean <= 0.0 {
        None
    } else {
        Some((max - min) / mean)
    }
}

fn street_text(address: &str) -> String {
    address
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
