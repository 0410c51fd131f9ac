//! Street-level crime lookup (data.police.uk)
//!
//! Uses the month two months before the reference date, the most recent one
//! the police API reliably has published.

use super::{get_json, AreaLookup};
use crate::error::SourceError;
use crate::types::{CrimeLevel, CrimeSummary, DataSource, LocationContext};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Incidents per month within the one-mile street radius
const LOW_BELOW: usize = 40;
const AVERAGE_BELOW: usize = 120;
const PUBLICATION_LAG_MONTHS: u32 = 2;
const TOP_CATEGORIES: usize = 3;

pub struct PoliceClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl PoliceClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for PoliceClient {
    type Output = CrimeSummary;

    fn source(&self) -> DataSource {
        DataSource::Crime
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let location = ctx
            .location
            .as_ref()
            .ok_or_else(|| SourceError::NotAvailable("no coordinates".to_string()))?;
        let month = report_month(ctx.as_of);

        let url = format!("{}/crimes-street/all-crime", self.base_url);
        let params = [
            ("lat", location.latitude.to_string()),
            ("lng", location.longitude.to_string()),
            ("date", month.clone()),
        ];
        let body = get_json(&self.client, &url, &params).await?;
        summarize(&body, month)
    }
}

/// "YYYY-MM" of the latest month expected to be published
pub fn report_month(as_of: NaiveDate) -> String {
    as_of
        .checked_sub_months(Months::new(PUBLICATION_LAG_MONTHS))
        .unwrap_or(as_of)
        .format("%Y-%m")
        .to_string()
}

pub fn classify(incidents: usize) -> CrimeLevel {
    if incidents < LOW_BELOW {
        CrimeLevel::Low
    } else if incidents < AVERAGE_BELOW {
        CrimeLevel::Average
    } else {
        CrimeLevel::High
    }
}

pub fn summarize(body: &Value, month: String) -> Result<CrimeSummary, SourceError> {
    let incidents = body
        .as_array()
        .ok_or_else(|| SourceError::Parse("crime: expected an array".to_string()))?;

    let mut by_category: HashMap<String, usize> = HashMap::new();
    for incident in incidents {
        let category = incident
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("other-crime");
        *by_category.entry(category.to_string()).or_insert(0) += 1;
    }

    let mut top_categories: Vec<(String, usize)> = by_category.into_iter().collect();
    top_categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_categories.truncate(TOP_CATEGORIES);

    Ok(CrimeSummary {
        month,
        total_incidents: incidents.len(),
        level: classify(incidents.len()),
        top_categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_month_lags_two_months() {
        assert_eq!(report_month(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()), "2024-11");
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(classify(0), CrimeLevel::Low);
        assert_eq!(classify(39), CrimeLevel::Low);
        assert_eq!(classify(40), CrimeLevel::Average);
        assert_eq!(classify(120), CrimeLevel::High);
    }

    #[test]
    fn test_summarize_counts_categories() {
        let body = json!([
            {"category": "burglary"},
            {"category": "anti-social-behaviour"},
            {"category": "burglary"},
            {"category": "vehicle-crime"},
            {"category": "shoplifting"}
        ]);
        let summary = summarize(&body, "2024-11".to_string()).unwrap();
        assert_eq!(summary.total_incidents, 5);
        assert_eq!(summary.level, CrimeLevel::Low);
        assert_eq!(summary.top_categories[0], ("burglary".to_string(), 2));
        assert_eq!(summary.top_categories.len(), 3);
        assert_eq!(summary.top_categories[1].0, "anti-social-behaviour");

        assert!(summarize(&json!({"error": true}), "2024-11".to_string()).is_err());
    }
}
