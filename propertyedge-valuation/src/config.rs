//! Runtime configuration for the valuation pipeline
//!
//! Derived from the shared `TomlConfig`; seconds become `Duration`s and
//! values that would make the pipeline meaningless are rejected up front.

use propertyedge_common::config::TomlConfig;
use propertyedge_common::{Error, Result};
use std::time::Duration;

/// Per-source call timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTimeouts {
    pub geocoding: Duration,
    pub sold_prices: Duration,
    pub energy: Duration,
    pub crime: Duration,
    pub flood: Duration,
    pub price_index: Duration,
    pub planning: Duration,
    pub earnings: Duration,
    pub deprivation: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuationConfig {
    pub timeouts: SourceTimeouts,
    /// Upper bound for one whole pipeline run
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,
    pub lookback_years: u32,
    pub max_records: usize,
}

impl ValuationConfig {
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let secs = Duration::from_secs;
        let t = &config.timeouts;

        let all_timeouts = [
            ("geocoding_secs", t.geocoding_secs),
            ("sold_prices_secs", t.sold_prices_secs),
            ("energy_secs", t.energy_secs),
            ("crime_secs", t.crime_secs),
            ("flood_secs", t.flood_secs),
            ("price_index_secs", t.price_index_secs),
            ("planning_secs", t.planning_secs),
            ("earnings_secs", t.earnings_secs),
            ("deprivation_secs", t.deprivation_secs),
            ("request_secs", t.request_secs),
        ];
        if let Some((name, _)) = all_timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("[timeouts] {} must be greater than zero", name)));
        }
        if config.cache.ttl_secs == 0 || config.cache.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "[cache] ttl_secs and sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if config.comparables.lookback_years == 0 || config.comparables.max_records == 0 {
            return Err(Error::Config(
                "[comparables] lookback_years and max_records must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(Self {
            timeouts: SourceTimeouts {
                geocoding: secs(t.geocoding_secs),
                sold_prices: secs(t.sold_prices_secs),
                energy: secs(t.energy_secs),
                crime: secs(t.crime_secs),
                flood: secs(t.flood_secs),
                price_index: secs(t.price_index_secs),
                planning: secs(t.planning_secs),
                earnings: secs(t.earnings_secs),
                deprivation: secs(t.deprivation_secs),
            },
            request_timeout: secs(t.request_secs),
            cache_ttl: secs(config.cache.ttl_secs),
            sweep_interval: secs(config.cache.sweep_interval_secs),
            lookback_years: config.comparables.lookback_years,
            max_records: config.comparables.max_records,
        })
    }
}

impl Default for ValuationConfig {
    fn default() -> Self {
        // Compiled defaults always pass validation
        Self::from_toml(&TomlConfig::default()).unwrap_or_else(|_| unreachable!())
    }
}
