//! UK House Price Index lookup
//!
//! Queried by local authority slug for the month three months before the
//! reference date (HPI publication lag).

use super::{get_json, json, AreaLookup};
use crate::error::SourceError;
use crate::types::{DataSource, LocationContext, PriceIndexSummary};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const PUBLICATION_LAG_MONTHS: u32 = 3;

pub struct PriceIndexClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl PriceIndexClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AreaLookup for PriceIndexClient {
    type Output = PriceIndexSummary;

    fn source(&self) -> DataSource {
        DataSource::PriceIndex
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError> {
        let region = ctx
            .location
            .as_ref()
            .and_then(|l| l.admin_district.clone())
            .ok_or_else(|| SourceError::NotAvailable("no local authority".to_string()))?;
        let month = index_month(ctx.as_of);

        let url = format!("{}/region/{}/month/{}.json", self.base_url, region_slug(&region), month);
        let body = get_json(&self.client, &url, &[]).await?;
        parse_index(&body, region, month)
    }
}

/// "Brighton and Hove" → "brighton-and-hove"
pub fn region_slug(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn index_month(as_of: NaiveDate) -> String {
    as_of
        .checked_sub_months(Months::new(PUBLICATION_LAG_MONTHS))
        .unwrap_or(as_of)
        .format("%Y-%m")
        .to_string()
}

pub fn parse_index(
    body: &Value,
    region: String,
    month: String,
) -> Result<PriceIndexSummary, SourceError> {
    let topic = body
        .pointer("/result/primaryTopic")
        .filter(|t| t.is_object())
        .ok_or_else(|| SourceError::Parse("HPI: missing result.primaryTopic".to_string()))?;

    let average_price = json::f64_field(topic, "averagePrice");
    if average_price.is_none() {
        return Err(SourceError::NotAvailable(format!("no HPI figures for {} {}", region, month)));
    }

    let mut by_property_type = BTreeMap::new();
    for (key, label) in [
        ("averagePriceDetached", "detached"),
        ("averagePriceSemiDetached", "semi-detached"),
        ("averagePriceTerraced", "terraced"),
        ("averagePriceFlatMaisonette", "flat"),
    ] {
        if let Some(price) = json::f64_field(topic, key) {
            by_property_type.insert(label.to_string(), price);
        }
    }

    Ok(PriceIndexSummary {
        region,
        month,
        average_price,
        annual_change_pct: json::f64_field(topic, "percentageAnnualChange"),
        monthly_change_pct: json::f64_field(topic, "percentageChange"),
        sales_volume: json::f64_field(topic, "salesVolume").map(|v| v as u64),
        by_property_type,
        first_time_buyer_price: json::f64_field(topic, "averagePriceFirstTimeBuyer"),
        former_owner_occupier_price: json::f64_field(topic, "averagePriceFormerOwnerOccupier"),
        new_build_price: json::f64_field(topic, "averagePriceNewBuild"),
        existing_property_price: json::f64_field(topic, "averagePriceExistingProperty"),
    })
}
