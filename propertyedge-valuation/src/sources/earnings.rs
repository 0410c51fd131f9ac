//! Earnings lookup (ONS Annual Survey of Hours and Earnings via Nomis)
//!
//! Median gross annual pay of full-time workers resident in the local
//! authority. Combined with the price index into an affordability ratio.

use super::{get_json, json, AreaLookup};
use crate::error::SourceError;
use crate::types::{AffordabilitySummary, DataSource, LocationContext, PriceIndexSummary};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// ASHE resident analysis dataset
const ASHE_DATASET: &str = "NM_30_1";

/// Median gross annual pay for one area
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualEarnings {
    pub area_name: String,
    pub median_annual_earnings: f64,
}

pub struct EarningsClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl EarningsClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for EarningsClient {
    type Output = AnnualEarnings;

    fn source(&self) -> DataSource {
        DataSource::Earnings
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let location = ctx
            .location
            .as_ref()
            .ok_or_else(|| SourceError::NotAvailable("no location".to_string()))?;
        let code = location
            .admin_district_code
            .clone()
            .ok_or_else(|| SourceError::NotAvailable("no local authority code".to_string()))?;
        let fallback_name = location.admin_district.clone().unwrap_or_else(|| code.clone());

        let url = format!("{}/dataset/{}.data.json", self.base_url, ASHE_DATASET);
        let params = [
            ("geography", code),
            ("date", "latest".to_string()),
            // full-time workers, median, annual gross pay, value
            ("sex", "8".to_string()),
            ("item", "2".to_string()),
            ("pay", "7".to_string()),
            ("measures", "20100".to_string()),
        ];
        let body = get_json(&self.client, &url, &params).await?;
        parse_earnings(&body, fallback_name)
    }
}

pub fn parse_earnings(body: &Value, fallback_name: String) -> Result<AnnualEarnings, SourceError> {
    let observation = body
        .get("obs")
        .and_then(Value::as_array)
        .and_then(|obs| obs.first())
        .ok_or_else(|| SourceError::NotAvailable("no earnings observation".to_string()))?;

    let value = observation
        .get("obs_value")
        .and_then(|v| json::f64_field(v, "value"))
        .filter(|v| *v > 0.0)
        .ok_or_else(|| SourceError::Parse("earnings: missing obs_value".to_string()))?;

    let area_name = observation
        .get("geography")
        .and_then(|g| json::str_field(g, "description"))
        .unwrap_or(fallback_name);

    Ok(AnnualEarnings {
        area_name,
        median_annual_earnings: value,
    })
}

/// Price-to-earnings ratio when both figures are known
pub fn affordability(
    earnings: Option<AnnualEarnings>,
    price_index: Option<&PriceIndexSummary>,
) -> Option<AffordabilitySummary> {
    let earnings = earnings?;
    let ratio = price_index
        .and_then(|p| p.average_price)
        .map(|price| (price / earnings.median_annual_earnings * 10.0).round() / 10.0);

    Some(AffordabilitySummary {
        area_name: earnings.area_name,
        median_annual_earnings: earnings.median_annual_earnings,
        affordability_ratio: ratio,
    })
}
