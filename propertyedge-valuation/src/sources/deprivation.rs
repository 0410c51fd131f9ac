//! English Indices of Deprivation 2019 lookup (ArcGIS feature service)

use super::{get_json, AreaLookup};
use crate::error::SourceError;
use crate::types::{DataSource, DeprivationSummary, LocationContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub struct DeprivationClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl DeprivationClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for DeprivationClient {
    type Output = DeprivationSummary;

    fn source(&self) -> DataSource {
        DataSource::Deprivation
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let lsoa = ctx
            .location
            .as_ref()
            .and_then(|l| l.lsoa_code.clone())
            .filter(|code| is_area_code(code))
            .ok_or_else(|| SourceError::NotAvailable("no LSOA code".to_string()))?;

        let url = format!("{}/query", self.base_url);
        let params = [
            ("where", format!("lsoa11cd='{}'", lsoa)),
            ("outFields", "lsoa11cd,IMDRank,IMDDecil".to_string()),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];
        let body = get_json(&self.client, &url, &params).await?;
        parse_features(&body, &lsoa)
    }
}

/// ONS area codes are one letter followed by eight digits
fn is_area_code(code: &str) -> bool {
    code.len() == 9
        && code.starts_with(|c: char| c.is_ascii_uppercase())
        && code[1..].chars().all(|c| c.is_ascii_digit())
}

pub fn parse_features(body: &Value, lsoa: &str) -> Result<DeprivationSummary, SourceError> {
    let attributes = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Parse("IMD: missing features".to_string()))?
        .first()
        .and_then(|f| f.get("attributes"))
        .ok_or_else(|| SourceError::NotAvailable(format!("no IMD row for {}", lsoa)))?;

    let rank = attributes.get("IMDRank").and_then(Value::as_u64);
    let decile = attributes.get("IMDDecil").and_then(Value::as_u64);
    match (rank, decile) {
        (Some(rank), Some(decile)) if (1..=10).contains(&decile) => Ok(DeprivationSummary {
            lsoa_code: lsoa.to_string(),
            rank: rank as u32,
            decile: decile as u8,
        }),
        _ => Err(SourceError::Parse(format!("IMD: bad rank/decile for {}", lsoa))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_area_code_validation() {
        assert!(is_area_code("E01011352"));
        assert!(!is_area_code("E0101135"));
        assert!(!is_area_code("E01011352' OR 1=1"));
    }

    #[test]
    fn test_parse_features() {
        let body = json!({"features": [
            {"attributes": {"lsoa11cd": "E01011352", "IMDRank": 15234, "IMDDecil": 5}}
        ]});
        let summary = parse_features(&body, "E01011352").unwrap();
        assert_eq!(summary.rank, 15_234);
        assert_eq!(summary.decile, 5);

        assert!(matches!(
            parse_features(&json!({"features": []}), "E01011352"),
            Err(SourceError::NotAvailable(_))
        ));
        assert!(matches!(
            parse_features(
                &json!({"features": [{"attributes": {"IMDRank": 1, "IMDDecil": 0}}]}),
                "E01011352"
            ),
            Err(SourceError::Parse(_))
        ));
    }
}
