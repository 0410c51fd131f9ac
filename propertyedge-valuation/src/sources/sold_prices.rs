//! Comparables Fetcher
//!
//! Retrieves recent sold-price transactions for the subject's postcode, and
//! only when that yields nothing, for the whole postcode district. Both
//! attempts carry their own timeout. Total failure is an empty list.
//!
//! The HTTP implementation queries the HM Land Registry Price Paid linked
//! data SPARQL endpoint.

use super::fetch_optional;
use super::location::{canonical_postcode, outward_code};
use crate::error::SourceError;
use crate::types::{ComparableSale, DataSource, PropertyCategory};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Area a sold-price query is scoped to
///
/// Values are always grammar-checked postcode parts, so they are safe to
/// embed in a query literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleScope {
    /// Exact full postcode, e.g. "M3 4LQ"
    Postcode(String),
    /// Outward code, e.g. "M3"
    District(String),
}

impl fmt::Display for SaleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleScope::Postcode(p) => write!(f, "postcode {}", p),
            SaleScope::District(d) => write!(f, "district {}", d),
        }
    }
}

#[async_trait]
pub trait SoldPriceSource: Send + Sync {
    /// Sales in scope on or after `since`, newest first, at most `limit`
    async fn sales(
        &self,
        scope: &SaleScope,
        since: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ComparableSale>, SourceError>;
}

// ============================================================================
// Land Registry SPARQL client
// ============================================================================

pub struct LandRegistryClient {
    client: Client,
    sparql_url: String,
}

impl LandRegistryClient {
    pub fn new(client: Client, sparql_url: &str) -> Self {
        Self {
            client,
            sparql_url: sparql_url.to_string(),
        }
    }
}

#[async_trait]
impl SoldPriceSource for LandRegistryClient {
    async fn sales(
        &self,
        scope: &SaleScope,
        since: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ComparableSale>, SourceError> {
        let query = build_query(scope, since, limit);
        debug!(scope = %scope, since = %since, "Querying price paid data");

        let response = self
            .client
            .get(&self.sparql_url)
            .header("Accept", "application/sparql-results+json")
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let what = format!("price paid query for {}", scope);
            return Err(SourceError::Api(status.as_u16(), what));
        }

        let body: Value = response.json().await?;
        parse_bindings(&body)
    }
}

/// SPARQL for recent transactions in scope
pub fn build_query(scope: &SaleScope, since: NaiveDate, limit: usize) -> String {
    let scope_clause = match scope {
        SaleScope::Postcode(postcode) => {
            format!("?addr lrcommon:postcode \"{}\"^^xsd:string .", postcode)
        }
        SaleScope::District(outward) => format!(
            "?addr lrcommon:postcode ?postcode .\n  FILTER(STRSTARTS(?postcode, \"{} \"))",
            outward
        ),
    };

    format!(
        r#"PREFIX lrppi: <http://landregistry.data.gov.uk/def/ppi/>
PREFIX lrcommon: <http://landregistry.data.gov.uk/def/common/>
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
SELECT ?amount ?date ?propertyType ?newBuild ?paon ?saon ?street ?town ?postcode
WHERE {{
  ?tx lrppi:pricePaid ?amount ;
      lrppi:transactionDate ?date ;
      lrppi:propertyAddress ?addr ;
      lrppi:propertyType ?propertyType ;
      lrppi:newBuild ?newBuild .
  {scope_clause}
  OPTIONAL {{ ?addr lrcommon:postcode ?postcode }}
  OPTIONAL {{ ?addr lrcommon:paon ?paon }}
  OPTIONAL {{ ?addr lrcommon:saon ?saon }}
  OPTIONAL {{ ?addr lrcommon:street ?street }}
  OPTIONAL {{ ?addr lrcommon:town ?town }}
  FILTER(?date >= "{since}"^^xsd:date)
}}
ORDER BY DESC(?date)
LIMIT {limit}"#,
        scope_clause = scope_clause,
        since = since.format("%Y-%m-%d"),
        limit = limit,
    )
}

/// Rows of a SPARQL JSON result; malformed rows are skipped
pub fn parse_bindings(body: &Value) -> Result<Vec<ComparableSale>, SourceError> {
    let bindings = body
        .pointer("/results/bindings")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Parse("price paid: missing results.bindings".to_string()))?;

    let mut sales = Vec::with_capacity(bindings.len());
    for row in bindings {
        let field = |name: &str| {
            row.pointer(&format!("/{}/value", name))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let Some(price) = field("amount")
            .and_then(|a| a.parse::<f64>().ok())
            .map(|a| a as i64)
        else {
            continue;
        };
        let Some(date) = field("date")
            .and_then(|d| d.get(..10))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        let category = field("propertyType")
            .and_then(|uri| uri.rsplit('/').next())
            .and_then(|slug| slug.parse::<PropertyCategory>().ok())
            .unwrap_or(PropertyCategory::Unknown);
        let new_build = field("newBuild").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let street_line = [field("paon"), field("street")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let address = [
            field("saon").map(str::to_string),
            Some(street_line),
            field("town").map(str::to_string),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

        let postcode = field("postcode").unwrap_or_default().to_string();
        let sale = ComparableSale::new(price, date, address, postcode, category);
        sales.push(sale.with_new_build(new_build));
    }
    Ok(sales)
}

// ============================================================================
// Fetcher
// ============================================================================

pub struct ComparablesFetcher {
    source: Arc<dyn SoldPriceSource>,
    timeout: Duration,
    lookback_years: u32,
    max_records: usize,
}

impl ComparablesFetcher {
    pub fn new(
        source: Arc<dyn SoldPriceSource>,
        timeout: Duration,
        lookback_years: u32,
        max_records: usize,
    ) -> Self {
        Self {
            source,
            timeout,
            lookback_years,
            max_records,
        }
    }

    /// Raw comparables for the postcode; never fails
    pub async fn fetch(&self, postcode: &str, as_of: NaiveDate) -> Vec<ComparableSale> {
        let since = as_of
            .checked_sub_months(Months::new(self.lookback_years * 12))
            .unwrap_or(as_of);

        let mut sales = Vec::new();
        if let Some(full) = canonical_postcode(postcode) {
            sales = self.attempt(SaleScope::Postcode(full), since).await;
        }

        if sales.is_empty() {
            if let Some(outward) = outward_code(postcode) {
                sales = self.attempt(SaleScope::District(outward), since).await;
            }
        }

        sales.sort_by(|a, b| b.sale_date.cmp(&a.sale_date));
        sales.truncate(self.max_records);
        info!(postcode = %postcode, comparables = sales.len(), "Comparables fetched");
        sales
    }

    async fn attempt(&self, scope: SaleScope, since: NaiveDate) -> Vec<ComparableSale> {
        let result = fetch_optional(
            DataSource::SoldPrices,
            self.timeout,
            self.source.sales(&scope, since, self.max_records),
        )
        .await;
        debug!(scope = %scope, rows = ?result.as_ref().map(Vec::len), "Sold price attempt");
        result.unwrap_or_default()
    }
}
