//! Planning applications lookup (PlanIt)

use super::location::canonical_postcode;
use super::{get_json, json, AreaLookup};
use crate::error::SourceError;
use crate::types::{DataSource, LocationContext, PlanningApplication, PlanningSummary};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const RADIUS_KM: &str = "0.5";
const RECENT_DAYS: u32 = 365;
const MAX_RECORDS: usize = 50;
const RECENT_SHOWN: usize = 5;

/// Description phrases that indicate a large development
const LARGE_DEVELOPMENT_KEYWORDS: &[&str] = &[
    "dwellings",
    "residential development",
    "mixed use",
    "mixed-use",
    "apartments",
    "storey building",
    "student accommodation",
];

pub struct PlanningClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl PlanningClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for PlanningClient {
    type Output = PlanningSummary;

    fn source(&self) -> DataSource {
        DataSource::Planning
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let postcode = canonical_postcode(&ctx.postcode)
            .ok_or_else(|| {
                SourceError::NotAvailable(format!("{} is not a full postcode", ctx.postcode))
            })?;

        let url = format!("{}/applics/json", self.base_url);
        let params = [
            ("pcode", postcode),
            ("krad", RADIUS_KM.to_string()),
            ("recent", RECENT_DAYS.to_string()),
            ("pg_sz", MAX_RECORDS.to_string()),
        ];
        let body = get_json(&self.client, &url, &params).await?;
        parse_applications(&body)
    }
}

pub fn is_large_development(app_size: Option<&str>, description: &str) -> bool {
    if app_size.is_some_and(|s| s.eq_ignore_ascii_case("large")) {
        return true;
    }
    let description = description.to_lowercase();
    LARGE_DEVELOPMENT_KEYWORDS.iter().any(|k| description.contains(k))
}

pub fn parse_applications(body: &Value) -> Result<PlanningSummary, SourceError> {
    let records = body
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Parse("planning: missing records".to_string()))?;

    let mut large_development_count = 0;
    let mut applications = Vec::with_capacity(records.len());
    for record in records {
        let description = json::str_field(record, "description").unwrap_or_default();
        if is_large_development(json::str_field(record, "app_size").as_deref(), &description) {
            large_development_count += 1;
        }
        applications.push(PlanningApplication {
            reference: json::str_field(record, "uid")
                .or_else(|| json::str_field(record, "name"))
                .unwrap_or_default(),
            description,
            status: json::str_field(record, "app_state"),
            decided: json::str_field(record, "decided_date"),
            address: json::str_field(record, "address"),
        });
    }

    let total_applications = json::f64_field(body, "total")
        .map(|t| t as usize)
        .unwrap_or(applications.len())
        .max(applications.len());
    applications.truncate(RECENT_SHOWN);

    Ok(PlanningSummary {
        total_applications,
        large_development_count,
        recent_applications: applications,
    })
}
