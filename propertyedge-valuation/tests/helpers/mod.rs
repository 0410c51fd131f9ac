//! In-memory sources for driving the pipeline without a network
//!
//! Each fake counts its calls and can be slowed down to exercise timeouts,
//! cancellation and single-flight behaviour (use with `start_paused`).

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use propertyedge_valuation::error::SourceError;
use propertyedge_valuation::sources::location::Geocoder;
use propertyedge_valuation::sources::sold_prices::{SaleScope, SoldPriceSource};
use propertyedge_valuation::sources::AreaLookup;
use propertyedge_valuation::types::{
    ComparableSale, CrimeLevel, CrimeSummary, DataSource, DeprivationSummary, EnergyCertificate,
    FloodRisk, FloodRiskLevel, LocationContext, PlanningSummary, PostcodeLocation,
    PriceIndexSummary,
};
use propertyedge_valuation::sources::earnings::AnnualEarnings;
use propertyedge_valuation::{PipelineSources, PropertyCategory, SubjectProperty, Tenure};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SUBJECT_POSTCODE: &str = "M3 4LQ";

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn subject_flat(asking_price: Option<i64>) -> SubjectProperty {
    SubjectProperty {
        address: "Flat 4, 21 Deansgate, Manchester".to_string(),
        postcode: SUBJECT_POSTCODE.to_lowercase(),
        category: PropertyCategory::Flat,
        bedrooms: 2,
        floor_area_sqm: Some(64.0),
        year_built: Some(2004),
        tenure: Tenure::Leasehold {
            annual_service_charge: Some(1800.0),
            annual_ground_rent: Some(250.0),
            remaining_lease_years: Some(104),
        },
        asking_price,
    }
}

/// Five flats around £200k plus a £1M detached farm house
pub fn outlier_batch() -> Vec<ComparableSale> {
    let flat = |price: i64, address: &str, sold: NaiveDate| {
        ComparableSale::new(price, sold, address, "M3 4LR", PropertyCategory::Flat)
    };
    vec![
        flat(200_000, "Flat 1, 21 Deansgate, Manchester", date(2025, 1, 10)),
        flat(210_000, "Flat 7, 23 Deansgate, Manchester", date(2024, 11, 2)),
        flat(205_000, "Flat 2, 9 Bridge Street, Manchester", date(2024, 9, 20)),
        flat(195_000, "Flat 12, 40 Quay Street, Manchester", date(2024, 6, 5)),
        ComparableSale::new(
            1_000_000,
            date(2024, 5, 1),
            "Farm House, Moss Lane, Manchester",
            "M3 4LS",
            PropertyCategory::Detached,
        ),
        flat(208_000, "Flat 3, 25 Deansgate, Manchester", date(2024, 2, 14)),
    ]
}

fn subject_location() -> PostcodeLocation {
    PostcodeLocation {
        postcode: SUBJECT_POSTCODE.to_string(),
        latitude: 53.4808,
        longitude: -2.2484,
        admin_district: Some("Manchester".to_string()),
        admin_district_code: Some("E08000003".to_string()),
        region: Some("North West".to_string()),
        lsoa: Some("Manchester 054C".to_string()),
        lsoa_code: Some("E01033658".to_string()),
    }
}

// ============================================================================
// Geocoder
// ============================================================================

#[derive(Default)]
pub struct FakeGeocoder {
    pub lookups: AtomicUsize,
    pub searches: AtomicUsize,
    pub autocompletes: AtomicUsize,
    pub search_results: Vec<String>,
    pub coordinates: HashMap<String, (f64, f64)>,
}

impl FakeGeocoder {
    pub fn manchester() -> Self {
        let coordinates = HashMap::from([
            ("M3 4LR".to_string(), (53.4812, -2.2490)),
            ("M3 4LS".to_string(), (53.4900, -2.2600)),
        ]);
        Self {
            search_results: vec![SUBJECT_POSTCODE.to_string()],
            coordinates,
            ..Default::default()
        }
    }

    pub fn resolution_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst) + self.autocompletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn lookup(&self, postcode: &str) -> Result<PostcodeLocation, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if postcode == SUBJECT_POSTCODE {
            Ok(subject_location())
        } else {
            Err(SourceError::Api(404, "Postcode not found".to_string()))
        }
    }

    async fn search(&self, _query: &str) -> Result<Vec<String>, SourceError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.search_results.clone())
    }

    async fn autocomplete(&self, _fragment: &str) -> Result<Vec<String>, SourceError> {
        self.autocompletes.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn bulk_locate(
        &self,
        postcodes: &[String],
    ) -> Result<HashMap<String, (f64, f64)>, SourceError> {
        Ok(postcodes
            .iter()
            .filter_map(|p| self.coordinates.get(p).map(|c| (p.clone(), *c)))
            .collect())
    }
}

// ============================================================================
// Sold prices
// ============================================================================

pub struct FakeSoldPrices {
    pub sales: Vec<ComparableSale>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeSoldPrices {
    pub fn new(sales: Vec<ComparableSale>) -> Self {
        Self {
            sales,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(sales: Vec<ComparableSale>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(sales)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SoldPriceSource for FakeSoldPrices {
    async fn sales(
        &self,
        scope: &SaleScope,
        since: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ComparableSale>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        // Everything lives in the exact postcode; district queries find nothing more
        if matches!(scope, SaleScope::District(_)) {
            return Ok(Vec::new());
        }
        let mut sales: Vec<ComparableSale> = self
            .sales
            .iter()
            .filter(|s| s.sale_date >= since)
            .cloned()
            .collect();
        sales.truncate(limit);
        Ok(sales)
    }
}

// ============================================================================
// Area lookups
// ============================================================================

/// Returns a fixed value, fails, or stalls
pub struct StaticLookup<T> {
    source: DataSource,
    value: Option<T>,
    delay: Option<Duration>,
    timeout: Duration,
}

impl<T> StaticLookup<T> {
    pub fn ok(source: DataSource, value: T) -> Self {
        Self {
            source,
            value: Some(value),
            delay: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn failing(source: DataSource) -> Self {
        Self {
            source,
            value: None,
            delay: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Answers only after its own timeout has passed
    pub fn stalled(source: DataSource, value: T) -> Self {
        Self {
            delay: Some(Duration::from_secs(30)),
            ..Self::ok(source, value)
        }
    }
}

#[async_trait]
impl<T> AreaLookup for StaticLookup<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn source(&self) -> DataSource {
        self.source
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, _ctx: &LocationContext) -> Result<T, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.value
            .clone()
            .ok_or_else(|| SourceError::Api(503, "Service Unavailable".to_string()))
    }
}

pub fn certificates() -> Vec<EnergyCertificate> {
    let cert = |address: &str, rating: &str, area: f64| EnergyCertificate {
        address: address.to_string(),
        postcode: "M3 4LR".to_string(),
        rating: Some(rating.to_string()),
        floor_area_sqm: Some(area),
        heating_fuel: Some("mains gas".to_string()),
        annual_energy_cost: Some(850.0),
        property_type: Some("Flat".to_string()),
        age_band: Some("2003-2006".to_string()),
    };
    vec![
        cert("Flat 4, 21 Deansgate", "B", 64.0),
        cert("Flat 1, 21 Deansgate", "C", 58.0),
        cert("Flat 7, 23 Deansgate", "C", 66.0),
    ]
}

pub fn crime() -> CrimeSummary {
    CrimeSummary {
        month: "2024-12".to_string(),
        total_incidents: 85,
        level: CrimeLevel::Average,
        top_categories: vec![("anti-social-behaviour".to_string(), 30)],
    }
}

pub fn flood() -> FloodRisk {
    FloodRisk {
        level: FloodRiskLevel::Low,
        active_warnings: 0,
        nearby_stations: 2,
    }
}

pub fn price_index() -> PriceIndexSummary {
    PriceIndexSummary {
        region: "Manchester".to_string(),
        month: "2024-12".to_string(),
        average_price: Some(240_000.0),
        annual_change_pct: Some(3.1),
        monthly_change_pct: Some(0.2),
        sales_volume: Some(410),
        by_property_type: BTreeMap::from([("flat".to_string(), 190_000.0)]),
        first_time_buyer_price: Some(210_000.0),
        former_owner_occupier_price: Some(280_000.0),
        new_build_price: None,
        existing_property_price: Some(238_000.0),
    }
}

pub fn planning() -> PlanningSummary {
    PlanningSummary {
        total_applications: 3,
        large_development_count: 1,
        recent_applications: Vec::new(),
    }
}

pub fn earnings() -> AnnualEarnings {
    AnnualEarnings {
        area_name: "Manchester".to_string(),
        median_annual_earnings: 32_000.0,
    }
}

pub fn deprivation() -> DeprivationSummary {
    DeprivationSummary {
        lsoa_code: "E01033658".to_string(),
        rank: 12_000,
        decile: 4,
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// Fakes kept alongside the sources so tests can inspect call counts
pub struct Harness {
    pub geocoder: Arc<FakeGeocoder>,
    pub sold_prices: Arc<FakeSoldPrices>,
    pub sources: PipelineSources,
}

impl Harness {
    /// Every source answers
    pub fn healthy(sales: Vec<ComparableSale>) -> Self {
        Self::with_sold_prices(FakeSoldPrices::new(sales))
    }

    pub fn with_sold_prices(sold_prices: FakeSoldPrices) -> Self {
        let geocoder = Arc::new(FakeGeocoder::manchester());
        let sold_prices = Arc::new(sold_prices);
        let sources = PipelineSources {
            geocoder: geocoder.clone(),
            sold_prices: sold_prices.clone(),
            energy: Arc::new(StaticLookup::ok(DataSource::EnergyCertificates, certificates())),
            crime: Arc::new(StaticLookup::ok(DataSource::Crime, crime())),
            flood: Arc::new(StaticLookup::ok(DataSource::Flood, flood())),
            price_index: Arc::new(StaticLookup::ok(DataSource::PriceIndex, price_index())),
            planning: Arc::new(StaticLookup::ok(DataSource::Planning, planning())),
            earnings: Arc::new(StaticLookup::ok(DataSource::Earnings, earnings())),
            deprivation: Arc::new(StaticLookup::ok(DataSource::Deprivation, deprivation())),
        };
        Self {
            geocoder,
            sold_prices,
            sources,
        }
    }
}
