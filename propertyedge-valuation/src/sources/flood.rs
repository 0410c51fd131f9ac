//! Flood risk lookup (Environment Agency real-time flood monitoring)
//!
//! Risk bands from live warnings and monitoring stations within the search
//! radius:
//! - severity 1 or 2 warning in force → High
//! - severity 3 alert in force → Medium
//! - monitoring stations nearby → Low
//! - otherwise → Very Low

use super::{get_json, AreaLookup};
use crate::error::SourceError;
use crate::types::{DataSource, FloodRisk, FloodRiskLevel, LocationContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const SEARCH_RADIUS_KM: u32 = 5;

pub struct FloodClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl FloodClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for FloodClient {
    type Output = FloodRisk;

    fn source(&self) -> DataSource {
        DataSource::Flood
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let location = ctx
            .location
            .as_ref()
            .ok_or_else(|| SourceError::NotAvailable("no coordinates".to_string()))?;
        let params = [
            ("lat", location.latitude.to_string()),
            ("long", location.longitude.to_string()),
            ("dist", SEARCH_RADIUS_KM.to_string()),
        ];

        let warnings_url = format!("{}/id/floods", self.base_url);
        let stations_url = format!("{}/id/stations", self.base_url);
        let (warnings, stations) = tokio::join!(
            get_json(&self.client, &warnings_url, &params),
            get_json(&self.client, &stations_url, &params),
        );

        Ok(assess(&warnings?, &stations?))
    }
}

fn items(body: &Value) -> &[Value] {
    body.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn assess(warnings: &Value, stations: &Value) -> FloodRisk {
    let severities: Vec<i64> = items(warnings)
        .iter()
        .filter_map(|w| w.get("severityLevel").and_then(Value::as_i64))
        .filter(|s| (1..=3).contains(s))
        .collect();
    let nearby_stations = items(stations).len();

    let level = if severities.iter().any(|s| *s <= 2) {
        FloodRiskLevel::High
    } else if !severities.is_empty() {
        FloodRiskLevel::Medium
    } else if nearby_stations > 0 {
        FloodRiskLevel::Low
    } else {
        FloodRiskLevel::VeryLow
    };

    FloodRisk {
        level,
        active_warnings: severities.len(),
        nearby_stations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flood_bands() {
        let none = json!({"items": []});
        let stations = json!({"items": [{"label": "River Aire"}, {"label": "Meanwood Beck"}]});

        assert_eq!(assess(&none, &none).level, FloodRiskLevel::VeryLow);
        assert_eq!(assess(&none, &stations).level, FloodRiskLevel::Low);
        assert_eq!(
            assess(&json!({"items": [{"severityLevel": 3}]}), &stations).level,
            FloodRiskLevel::Medium
        );

        let warnings = json!({"items": [{"severityLevel": 3}, {"severityLevel": 2}]});
        let severe = assess(&warnings, &stations);
        assert_eq!(severe.level, FloodRiskLevel::High);
        assert_eq!(severe.active_warnings, 2);
        assert_eq!(severe.nearby_stations, 2);
    }

    #[test]
    fn test_lapsed_warnings_ignored() {
        let lapsed = json!({"items": [{"severityLevel": 4}]});
        let risk = assess(&lapsed, &json!({}));
        assert_eq!(risk.level, FloodRiskLevel::VeryLow);
        assert_eq!(risk.active_warnings, 0);
    }
}
