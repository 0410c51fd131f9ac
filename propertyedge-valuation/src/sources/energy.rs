//! Energy certificate lookup (EPC Open Data Communities)
//!
//! Certificates for the subject's postcode feed two consumers: the
//! enrichment engine (rating and floor area per address) and the area
//! energy summary.

use super::location::canonical_postcode;
use super::{json, AreaLookup};
use crate::error::SourceError;
use crate::stats::median;
use crate::types::{DataSource, EnergyCertificate, EnergySummary, LocationContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

const PAGE_SIZE: usize = 100;
const COST_FIELDS: [&str; 3] = [
    "heating-cost-current",
    "hot-water-cost-current",
    "lighting-cost-current",
];

pub struct EpcClient {
    client: Client,
    base_url: String,
    /// Base64 "email:key"; without it the API refuses every request
    token: Option<String>,
    timeout: Duration,
}

impl EpcClient {
    pub fn new(client: Client, base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for EpcClient {
    type Output = Vec<EnergyCertificate>;

    fn source(&self) -> DataSource {
        DataSource::EnergyCertificates
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SourceError::NotAvailable("no EPC API token configured".to_string()))?;
        let postcode = canonical_postcode(&ctx.postcode)
            .ok_or_else(|| {
                SourceError::NotAvailable(format!("{} is not a full postcode", ctx.postcode))
            })?;

        let url = format!("{}/domestic/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Basic {}", token))
            .query(&[("postcode", postcode.clone()), ("size", PAGE_SIZE.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Api(status.as_u16(), "EPC domestic search".to_string()));
        }

        // The API answers "no certificates" with an empty 200 body
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Err(SourceError::NotAvailable(format!("no certificates for {}", postcode)));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))?;

        let certificates = parse_certificates(&body)?;
        debug!(postcode = %postcode, certificates = certificates.len(), "EPC certificates fetched");
        if certificates.is_empty() {
            return Err(SourceError::NotAvailable(format!("no certificates for {}", postcode)));
        }
        Ok(certificates)
    }
}

pub fn parse_certificates(body: &Value) -> Result<Vec<EnergyCertificate>, SourceError> {
    let rows = body
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Parse("EPC: missing rows".to_string()))?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let address = json::str_field(row, "address")
                .or_else(|| json::str_field(row, "address1"))?;
            let costs: Vec<f64> = COST_FIELDS
                .iter()
                .filter_map(|key| json::f64_field(row, key))
                .collect();

            Some(EnergyCertificate {
                address,
                postcode: json::str_field(row, "postcode").unwrap_or_default(),
                rating: json::str_field(row, "current-energy-rating").map(|r| r.to_uppercase()),
                floor_area_sqm: json::f64_field(row, "total-floor-area").filter(|a| *a > 0.0),
                heating_fuel: json::str_field(row, "main-fuel"),
                annual_energy_cost: (!costs.is_empty()).then(|| costs.iter().sum()),
                property_type: json::str_field(row, "property-type"),
                age_band: json::str_field(row, "construction-age-band"),
            })
        })
        .collect())
}

/// Area summary over all certificates, `None` when there are none
pub fn summarize(certificates: &[EnergyCertificate]) -> Option<EnergySummary> {
    if certificates.is_empty() {
        return None;
    }

    let mut rating_distribution = BTreeMap::new();
    for rating in certificates.iter().filter_map(|c| c.rating.as_ref()) {
        *rating_distribution.entry(rating.clone()).or_insert(0) += 1;
    }

    let areas: Vec<f64> = certificates.iter().filter_map(|c| c.floor_area_sqm).collect();
    let costs: Vec<f64> = certificates.iter().filter_map(|c| c.annual_energy_cost).collect();

    Some(EnergySummary {
        certificate_count: certificates.len(),
        rating_distribution,
        median_floor_area_sqm: median(&areas),
        median_annual_energy_cost: median(&costs),
        common_heating_fuel: most_common(
            certificates.iter().filter_map(|c| c.heating_fuel.as_deref()),
        ),
        common_property_type: most_common(
            certificates.iter().filter_map(|c| c.property_type.as_deref()),
        ),
        common_age_band: most_common(certificates.iter().filter_map(|c| c.age_band.as_deref())),
    })
}

/// Most frequent value; ties go to the alphabetically first
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}
