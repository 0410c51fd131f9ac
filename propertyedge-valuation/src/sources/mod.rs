//! External data sources
//!
//! Every source is an independent adapter over one public dataset. None of
//! them is allowed to fail the pipeline: the fan-in wraps each call in its
//! own timeout and converts any `SourceError` to "absent".
//!
//! Seams:
//! - `Geocoder` (location.rs): postcode lookup, search, autocomplete, bulk
//! - `SoldPriceSource` (sold_prices.rs): price paid transactions
//! - `AreaLookup`: one implementation per auxiliary dataset
//!
//! HTTP implementations keep response parsing in free functions so it can be
//! tested against JSON fixtures without a network.

pub mod crime;
pub mod deprivation;
pub mod earnings;
pub mod energy;
pub mod flood;
pub mod location;
pub mod planning;
pub mod price_index;
pub mod sold_prices;

use crate::error::SourceError;
use crate::types::{DataSource, LocationContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Auxiliary dataset keyed on the resolved location
#[async_trait]
pub trait AreaLookup: Send + Sync {
    type Output: Send;

    /// Provenance tag reported when this lookup contributes
    fn source(&self) -> DataSource;

    /// Upper bound for one lookup
    fn timeout(&self) -> Duration;

    async fn lookup(&self, ctx: &LocationContext) -> Result<Self::Output, SourceError>;
}

/// Run one source call under its own timeout, converting failure to `None`
pub async fn fetch_optional<T, F>(source: DataSource, timeout: Duration, call: F) -> Option<T>
where
    F: Future<Output = Result<T, SourceError>>,
{
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout.as_secs())),
    };

    match result {
        Ok(value) => Some(value),
        Err(SourceError::NotAvailable(reason)) => {
            debug!(source = ?source, reason = %reason, "Source has no data");
            None
        }
        Err(e) => {
            warn!(source = ?source, error = %e, "Source failed, continuing without it");
            None
        }
    }
}

/// `fetch_optional` driven by the lookup's own tag and timeout
pub async fn lookup_optional<L>(lookup: &L, ctx: &LocationContext) -> Option<L::Output>
where
    L: AreaLookup + ?Sized,
{
    fetch_optional(lookup.source(), lookup.timeout(), lookup.lookup(ctx)).await
}

/// Shared HTTP client with the standard user agent
///
/// The client-level timeout is only a backstop; per-source timeouts are
/// applied by `fetch_optional`.
pub fn build_http_client(user_agent: &str) -> Result<Client, SourceError> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| SourceError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// GET a JSON document, mapping non-success statuses to `SourceError::Api`
pub async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<Value, SourceError> {
    debug!(url = %url, "GET");
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Api(status.as_u16(), truncate(&body, 200)));
    }

    Ok(response.json::<Value>().await?)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Field helpers shared by the JSON parsers
pub(crate) mod json {
    use serde_json::Value;

    pub fn str_field(value: &Value, key: &str) -> Option<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Number that may arrive as a JSON number or a numeric string
    pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
        match value.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
