//! Location Resolver
//!
//! Turns a full or partial postcode plus free-text address into a canonical
//! postcode and, when possible, its coordinates and administrative areas.
//!
//! Resolution order:
//! 1. Input already a full postcode → upper-cased as given, no external calls
//! 2. Free-text search on "address fragment", preferring a candidate in the
//!    same district as the fragment
//! 3. Autocomplete on the fragment alone, first suggestion
//! 4. The original fragment unchanged
//!
//! Failures at every step are logged and swallowed.

use super::{fetch_optional, get_json, json};
use crate::error::SourceError;
use crate::types::{DataSource, LocationContext, PostcodeLocation};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// Postcode grammar
// ============================================================================

/// Canonical "OUT IN" form when the input is a complete UK postcode
pub fn canonical_postcode(raw: &str) -> Option<String> {
    let compact = compact_upper(raw);
    if !(5..=7).contains(&compact.len()) || !compact.is_ascii() {
        return None;
    }
    let (outward, inward) = compact.split_at(compact.len() - 3);
    if is_outward_code(outward) && is_inward_code(inward) {
        Some(format!("{} {}", outward, inward))
    } else {
        None
    }
}

/// Outward (district) code of a full postcode or a bare outward fragment
pub fn outward_code(raw: &str) -> Option<String> {
    if let Some(full) = canonical_postcode(raw) {
        return full.split(' ').next().map(str::to_string);
    }
    let compact = compact_upper(raw);
    is_outward_code(&compact).then_some(compact)
}

/// `[A-Z]{1,2}[0-9][A-Z0-9]?`
pub fn is_outward_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if !(1..=2).contains(&letters) {
        return false;
    }
    let rest = &bytes[letters..];
    match rest {
        [d] => d.is_ascii_digit(),
        [d, x] => d.is_ascii_digit() && (x.is_ascii_digit() || x.is_ascii_uppercase()),
        _ => false,
    }
}

fn is_inward_code(code: &str) -> bool {
    matches!(
        code.as_bytes(),
        [d, a, b] if d.is_ascii_digit() && a.is_ascii_uppercase() && b.is_ascii_uppercase()
    )
}

fn compact_upper(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

// ============================================================================
// Geocoder seam
// ============================================================================

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Full details for one complete postcode
    async fn lookup(&self, postcode: &str) -> Result<PostcodeLocation, SourceError>;

    /// Candidate postcodes for a free-text query, best first
    async fn search(&self, query: &str) -> Result<Vec<String>, SourceError>;

    /// Completions for a partial postcode, best first
    async fn autocomplete(&self, fragment: &str) -> Result<Vec<String>, SourceError>;

    /// Coordinates keyed by upper-case canonical postcode; unknown codes are omitted
    async fn bulk_locate(
        &self,
        postcodes: &[String],
    ) -> Result<HashMap<String, (f64, f64)>, SourceError>;
}

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// postcodes.io for postcode data, Nominatim for free-text search
pub struct HttpGeocoder {
    client: Client,
    postcodes_base_url: String,
    nominatim_base_url: String,
    /// Nominatim usage policy: at most 1 request per second
    search_limiter: DirectLimiter,
}

const BULK_CHUNK: usize = 100;

impl HttpGeocoder {
    pub fn new(client: Client, postcodes_base_url: &str, nominatim_base_url: &str) -> Self {
        Self {
            client,
            postcodes_base_url: postcodes_base_url.trim_end_matches('/').to_string(),
            nominatim_base_url: nominatim_base_url.trim_end_matches('/').to_string(),
            search_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
        }
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn lookup(&self, postcode: &str) -> Result<PostcodeLocation, SourceError> {
        let url = format!("{}/postcodes/{}", self.postcodes_base_url, compact_upper(postcode));
        let body = get_json(&self.client, &url, &[]).await?;
        parse_lookup(&body)
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, SourceError> {
        self.search_limiter.until_ready().await;

        let url = format!("{}/search", self.nominatim_base_url);
        let params = [
            ("q", query.to_string()),
            ("format", "jsonv2".to_string()),
            ("addressdetails", "1".to_string()),
            ("countrycodes", "gb".to_string()),
            ("limit", "5".to_string()),
        ];
        let body = get_json(&self.client, &url, &params).await?;
        Ok(parse_search(&body))
    }

    async fn autocomplete(&self, fragment: &str) -> Result<Vec<String>, SourceError> {
        let url = format!(
            "{}/postcodes/{}/autocomplete",
            self.postcodes_base_url,
            compact_upper(fragment)
        );
        let body = get_json(&self.client, &url, &[]).await?;
        Ok(parse_autocomplete(&body))
    }

    async fn bulk_locate(
        &self,
        postcodes: &[String],
    ) -> Result<HashMap<String, (f64, f64)>, SourceError> {
        let url = format!("{}/postcodes", self.postcodes_base_url);
        let requests = postcodes.chunks(BULK_CHUNK).map(|chunk| {
            let payload = serde_json::json!({ "postcodes": chunk });
            let url = url.clone();
            async move {
                let response = self.client.post(&url).json(&payload).send().await?;
                let status = response.status();
                if !status.is_success() {
                    let what = "bulk postcode lookup".to_string();
                    return Err(SourceError::Api(status.as_u16(), what));
                }
                let body: Value = response.json().await?;
                Ok::<_, SourceError>(parse_bulk(&body))
            }
        });

        let mut located = HashMap::new();
        for chunk in join_all(requests).await {
            located.extend(chunk?);
        }
        Ok(located)
    }
}

// ============================================================================
// Response parsing
// ============================================================================

pub fn parse_lookup(body: &Value) -> Result<PostcodeLocation, SourceError> {
    let result = body
        .get("result")
        .filter(|r| r.is_object())
        .ok_or_else(|| SourceError::Parse("postcode lookup: missing result".to_string()))?;

    let postcode = json::str_field(result, "postcode")
        .ok_or_else(|| SourceError::Parse("postcode lookup: missing postcode".to_string()))?;
    let coordinates = (
        json::f64_field(result, "latitude"),
        json::f64_field(result, "longitude"),
    );
    let (latitude, longitude) = match coordinates {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return Err(SourceError::NotAvailable(format!("{} has no coordinates", postcode))),
    };
    let codes = result.get("codes").cloned().unwrap_or(Value::Null);

    Ok(PostcodeLocation {
        postcode,
        latitude,
        longitude,
        admin_district: json::str_field(result, "admin_district"),
        admin_district_code: json::str_field(&codes, "admin_district"),
        region: json::str_field(result, "region"),
        lsoa: json::str_field(result, "lsoa"),
        lsoa_code: json::str_field(&codes, "lsoa"),
    })
}

/// Canonical postcodes of Nominatim results that carry one
pub fn parse_search(body: &Value) -> Vec<String> {
    body.as_array()
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("address"))
                .filter_map(|a| json::str_field(a, "postcode"))
                .filter_map(|p| canonical_postcode(&p))
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_autocomplete(body: &Value) -> Vec<String> {
    body.get("result")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(canonical_postcode)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_bulk(body: &Value) -> HashMap<String, (f64, f64)> {
    let mut located = HashMap::new();
    let Some(items) = body.get("result").and_then(Value::as_array) else {
        return located;
    };
    for item in items {
        let Some(result) = item.get("result").filter(|r| r.is_object()) else {
            continue;
        };
        let postcode = json::str_field(result, "postcode").and_then(|p| canonical_postcode(&p));
        let lat = json::f64_field(result, "latitude");
        let lng = json::f64_field(result, "longitude");
        if let (Some(postcode), Some(lat), Some(lng)) = (postcode, lat, lng) {
            located.insert(postcode, (lat, lng));
        }
    }
    located
}

// ============================================================================
// Resolver
// ============================================================================

pub struct LocationResolver {
    geocoder: Arc<dyn Geocoder>,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, timeout: Duration) -> Self {
        Self { geocoder, timeout }
    }

    /// Best postcode for the input; always returns something
    ///
    /// A complete postcode comes back with only its case changed, spacing
    /// included. Lookups use `canonical_postcode` on it where they need it.
    pub async fn resolve_postcode(&self, raw: &str, address: &str) -> String {
        if canonical_postcode(raw).is_some() {
            return raw.trim().to_uppercase();
        }

        let fragment = compact_upper(raw);
        let query = format!("{} {}", address.trim(), raw.trim()).trim().to_string();

        if !query.is_empty() {
            let search = self.geocoder.search(&query);
            let candidates = fetch_optional(DataSource::Geocoding, self.timeout, search)
                .await
                .unwrap_or_default();
            let chosen = candidates
                .iter()
                .find(|c| outward_code(c).as_deref() == Some(fragment.as_str()))
                .or_else(|| candidates.first());
            if let Some(postcode) = chosen {
                info!(fragment = %raw, postcode = %postcode, "Resolved postcode by search");
                return postcode.clone();
            }
        }

        if !fragment.is_empty() {
            let autocomplete = self.geocoder.autocomplete(&fragment);
            let suggestions = fetch_optional(DataSource::Geocoding, self.timeout, autocomplete)
                .await
                .unwrap_or_default();
            if let Some(postcode) = suggestions.into_iter().next() {
                info!(fragment = %raw, postcode = %postcode, "Resolved postcode by autocomplete");
                return postcode;
            }
        }

        debug!(fragment = %raw, "Postcode unresolved, continuing with fragment");
        raw.trim().to_string()
    }

    /// Canonical postcode plus location details for auxiliary lookups
    pub async fn resolve(&self, raw: &str, address: &str, as_of: NaiveDate) -> LocationContext {
        let postcode = self.resolve_postcode(raw, address).await;

        let location = match canonical_postcode(&postcode) {
            Some(full) => {
                let lookup = self.geocoder.lookup(&full);
                fetch_optional(DataSource::Geocoding, self.timeout, lookup).await
            }
            None => None,
        };

        LocationContext {
            postcode,
            location,
            as_of,
        }
    }

    /// Coordinates for comparable postcodes; empty on failure
    pub async fn locate_all(&self, postcodes: &[String]) -> HashMap<String, (f64, f64)> {
        if postcodes.is_empty() {
            return HashMap::new();
        }
        fetch_optional(DataSource::Geocoding, self.timeout, self.geocoder.bulk_locate(postcodes))
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_canonical_postcode() {
        assert_eq!(canonical_postcode("m3 4lq").as_deref(), Some("M3 4LQ"));
        assert_eq!(canonical_postcode("SW1A1AA").as_deref(), Some("SW1A 1AA"));
        assert_eq!(canonical_postcode(" ec1v  9hx ").as_deref(), Some("EC1V 9HX"));
        assert_eq!(canonical_postcode("M3"), None);
        assert_eq!(canonical_postcode("LS6 2A"), None);
        assert_eq!(canonical_postcode("12345"), None);
    }

    #[test]
    fn test_outward_code() {
        assert_eq!(outward_code("M3 4LQ").as_deref(), Some("M3"));
        assert_eq!(outward_code("sw1a1aa").as_deref(), Some("SW1A"));
        assert_eq!(outward_code("ls6").as_deref(), Some("LS6"));
        assert_eq!(outward_code("Leeds"), None);
    }

    #[test]
    fn test_parse_lookup() {
        let body = json!({
            "status": 200,
            "result": {
                "postcode": "M3 4LQ",
                "latitude": 53.4839,
                "longitude": -2.2526,
                "admin_district": "Salford",
                "region": "North West",
                "lsoa": "Salford 030A",
                "codes": {"admin_district": "E08000006", "lsoa": "E01005712"}
            }
        });
        let loc = parse_lookup(&body).unwrap();
        assert_eq!(loc.postcode, "M3 4LQ");
        assert_eq!(loc.admin_district.as_deref(), Some("Salford"));
        assert_eq!(loc.admin_district_code.as_deref(), Some("E08000006"));
        assert_eq!(loc.lsoa_code.as_deref(), Some("E01005712"));

        assert!(matches!(parse_lookup(&json!({"status": 404})), Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_parse_search_and_autocomplete() {
        let search = json!([
            {"display_name": "Leeds", "address": {"city": "Leeds"}},
            {"display_name": "x", "address": {"postcode": "ls6 2ab"}}
        ]);
        assert_eq!(parse_search(&search), vec!["LS6 2AB"]);

        let auto = json!({"status": 200, "result": ["LS6 1AA", "LS6 1AB"]});
        assert_eq!(parse_autocomplete(&auto), vec!["LS6 1AA", "LS6 1AB"]);
        assert!(parse_autocomplete(&json!({"status": 200, "result": null})).is_empty());
    }

    #[test]
    fn test_parse_bulk_skips_unknown() {
        let body = json!({"result": [
            {
                "query": "LS6 2AB",
                "result": {"postcode": "LS6 2AB", "latitude": 53.8, "longitude": -1.57}
            },
            {"query": "ZZ1 1ZZ", "result": null}
        ]});
        let located = parse_bulk(&body);
        assert_eq!(located.len(), 1);
        assert_eq!(located.get("LS6 2AB"), Some(&(53.8, -1.57)));
    }

    /// Geocoder with canned answers that counts every call
    struct ScriptedGeocoder {
        search: Result<Vec<String>, ()>,
        autocomplete: Vec<String>,
        calls: AtomicUsize,
        looked_up: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Geocoder for ScriptedGeocoder {
        async fn lookup(&self, postcode: &str) -> Result<PostcodeLocation, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.looked_up.lock().unwrap().push(postcode.to_string());
            Err(SourceError::NotAvailable("scripted".to_string()))
        }
        async fn search(&self, _query: &str) -> Result<Vec<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.search
                .clone()
                .map_err(|_| SourceError::Network("down".to_string()))
        }
        async fn autocomplete(&self, _fragment: &str) -> Result<Vec<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.autocomplete.clone())
        }
        async fn bulk_locate(
            &self,
            _p: &[String],
        ) -> Result<HashMap<String, (f64, f64)>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        }
    }

    fn resolver(
        search: Result<Vec<String>, ()>,
        autocomplete: Vec<String>,
    ) -> (LocationResolver, Arc<ScriptedGeocoder>) {
        let geocoder = Arc::new(ScriptedGeocoder {
            search,
            autocomplete,
            calls: AtomicUsize::new(0),
            looked_up: std::sync::Mutex::new(Vec::new()),
        });
        (LocationResolver::new(geocoder.clone(), Duration::from_secs(1)), geocoder)
    }

    #[tokio::test]
    async fn test_full_postcode_needs_no_calls() {
        let (resolver, geocoder) = resolver(Ok(vec!["X1 1XX".to_string()]), Vec::new());
        assert_eq!(resolver.resolve_postcode("m3 4lq", "1 Any Street").await, "M3 4LQ");
        assert_eq!(resolver.resolve_postcode(" sw1a1aa ", "").await, "SW1A1AA");
        assert_eq!(resolver.resolve_postcode("Ec1v  9hx", "").await, "EC1V  9HX");
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unspaced_full_postcode_kept_but_looked_up_canonically() {
        let (resolver, geocoder) = resolver(Ok(Vec::new()), Vec::new());
        let ctx = resolver
            .resolve("sw1a1aa", "", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .await;

        assert_eq!(ctx.postcode, "SW1A1AA");
        assert_eq!(*geocoder.looked_up.lock().unwrap(), vec!["SW1A 1AA".to_string()]);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1, "lookup only, no search");
    }

    #[tokio::test]
    async fn test_search_prefers_same_district() {
        let (resolver, _) = resolver(
            Ok(vec!["LS16 5AA".to_string(), "LS6 2AB".to_string()]),
            Vec::new(),
        );
        assert_eq!(resolver.resolve_postcode("LS6", "12 Acacia Avenue").await, "LS6 2AB");
    }

    #[tokio::test]
    async fn test_search_falls_back_to_top_result() {
        let (resolver, _) = resolver(Ok(vec!["LS16 5AA".to_string()]), Vec::new());
        assert_eq!(resolver.resolve_postcode("LS6", "12 Acacia Avenue").await, "LS16 5AA");
    }

    #[tokio::test]
    async fn test_autocomplete_after_failed_search() {
        let (resolver, _) = resolver(Err(()), vec!["LS6 1AA".to_string()]);
        assert_eq!(resolver.resolve_postcode("ls6", "").await, "LS6 1AA");
    }

    #[tokio::test]
    async fn test_everything_fails_returns_fragment() {
        let (resolver, _) = resolver(Err(()), Vec::new());
        assert_eq!(resolver.resolve_postcode(" LS6 ", "12 Acacia Avenue").await, "LS6");

        let ctx = resolver
            .resolve("LS6", "", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .await;
        assert_eq!(ctx.postcode, "LS6");
        assert!(ctx.location.is_none());
    }
}
