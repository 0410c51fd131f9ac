//! Type Inferencer
//!
//! Assigns a best-guess category to comparables the source left unclassified.
//! Address markers are tried first (see `rules::CATEGORY_RULES`), then a price
//! heuristic: anything well above the median of directly-classified sales is
//! assumed detached.
//!
//! Records with a recorded category are never touched. Inferred categories
//! are tagged so downstream scoring can weight them lower.

use super::rules::{first_match, CATEGORY_RULES};
use crate::stats::median;
use crate::types::{ComparableSale, PropertyCategory};
use tracing::debug;

/// Price above `multiplier × median` implies a detached property
pub const DEFAULT_PRICE_MULTIPLIER: f64 = 1.8;

#[derive(Debug, Clone)]
pub struct TypeInferencer {
    price_multiplier: f64,
}

impl Default for TypeInferencer {
    fn default() -> Self {
        Self {
            price_multiplier: DEFAULT_PRICE_MULTIPLIER,
        }
    }
}

impl TypeInferencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price_multiplier(mut self, multiplier: f64) -> Self {
        self.price_multiplier = multiplier;
        self
    }

    pub fn infer(&self, mut comparables: Vec<ComparableSale>) -> Vec<ComparableSale> {
        // Median over directly-classified, non-excluded records, taken before
        // any inference so the result does not depend on record order
        let known_prices: Vec<f64> = comparables
            .iter()
            .filter(|c| c.category.is_known() && !c.category_inferred && !c.excluded)
            .map(|c| c.price as f64)
            .collect();
        let known_median = median(&known_prices);

        let mut inferred = 0usize;
        for comp in comparables.iter_mut() {
            if comp.category.is_known() {
                continue;
            }

            let guess = first_match(CATEGORY_RULES, &comp.address).or_else(|| {
                known_median
                    .filter(|m| comp.price as f64 > m * self.price_multiplier)
                    .map(|_| PropertyCategory::Detached)
            });

            if let Some(category) = guess {
                comp.category = category;
                comp.category_inferred = true;
                inferred += 1;
            }
        }

        debug!(
            comparables = comparables.len(),
            inferred,
            median = ?known_median,
            "Type inference complete"
        );
        comparables
    }
}
