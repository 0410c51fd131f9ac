//! Core Types and Data Contracts for the Valuation Pipeline
//!
//! Defines the explicit contracts between the pipeline stages:
//! - **Input:** `SubjectProperty` (immutable for one run)
//! - **Sources:** `ComparableSale` raw records, `AreaData` sub-records
//! - **Output:** `EvidenceBundle` (cached, read-only downstream)

use crate::insights::confidence::ConfidenceDriver;
use crate::insights::valuation::{FairValue, PriceAssessment};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Property Classification
// ============================================================================

/// Property category shared by the subject and comparable sales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyCategory {
    Flat,
    Terraced,
    SemiDetached,
    Detached,
    Bungalow,
    /// Source dataset did not classify the property
    Unknown,
}

impl PropertyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Terraced => "terraced",
            Self::SemiDetached => "semi-detached",
            Self::Detached => "detached",
            Self::Bungalow => "bungalow",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for PropertyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyCategory {
    type Err = String;

    /// Lenient parse accepting the spellings used by listing sites and open datasets
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        let category = match normalized.as_str() {
            "flat" | "apartment" | "maisonette" | "flat-maisonette" | "studio" => Self::Flat,
            "terraced" | "terrace" | "mid-terrace" | "end-terrace" | "end-of-terrace"
            | "terraced-house" | "town-house" | "townhouse" => Self::Terraced,
            "semi" | "semi-detached" | "semidetached" | "semi-detached-house" => {
                Self::SemiDetached
            }
            "detached" | "detached-house" => Self::Detached,
            "bungalow" | "detached-bungalow" | "semi-detached-bungalow" => Self::Bungalow,
            "unknown" | "other" | "" => Self::Unknown,
            other => return Err(format!("Unrecognised property category: {}", other)),
        };
        Ok(category)
    }
}

/// Tenure of the subject property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Tenure {
    Freehold,
    Leasehold {
        annual_service_charge: Option<f64>,
        annual_ground_rent: Option<f64>,
        remaining_lease_years: Option<u32>,
    },
}

impl Tenure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freehold => "freehold",
            Self::Leasehold { .. } => "leasehold",
        }
    }
}

// ============================================================================
// Pipeline Input
// ============================================================================

/// The property being valued
///
/// Immutable input to one pipeline run. The asking price is carried here but
/// never participates in the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProperty {
    pub address: String,
    /// Full or outward-only postal code
    pub postcode: String,
    pub category: PropertyCategory,
    pub bedrooms: u32,
    pub floor_area_sqm: Option<f64>,
    pub year_built: Option<u16>,
    pub tenure: Tenure,
    pub asking_price: Option<i64>,
}

impl SubjectProperty {
    /// Street name with any leading house number removed, lower-cased
    ///
    /// A first line that is only a unit designator ("Flat 4") defers to the
    /// next segment, so "Flat 4, 21 Deansgate" gives "deansgate". Returns
    /// `None` when neither segment carries alphabetic street text.
    pub fn street_name(&self) -> Option<String> {
        self.address
            .split(',')
            .take(2)
            .find_map(street_text_of)
    }
}

/// Segment text after leading unit designators and house numbers
fn street_text_of(segment: &str) -> Option<String> {
    let street: Vec<&str> = segment
        .split_whitespace()
        .skip_while(|token| {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            token.is_empty()
                || token.chars().next().is_some_and(|c| c.is_ascii_digit())
                || matches!(token.to_lowercase().as_str(), "flat" | "apartment" | "unit")
        })
        .collect();

    if street.is_empty() {
        None
    } else {
        Some(street.join(" ").to_lowercase())
    }
}

/// First comma-separated segment of an address, trimmed
pub fn first_address_line(address: &str) -> &str {
    address.split(',').next().unwrap_or("").trim()
}

// ============================================================================
// Comparable Sales
// ============================================================================

/// A historical sold-price transaction used as market evidence
///
/// Created raw by the comparables fetcher; enrichment fields are filled in
/// by the refinement chain (enrichment → type inference → outliers →
/// similarity) and never mutated after the pipeline completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableSale {
    pub price: i64,
    pub sale_date: NaiveDate,
    pub address: String,
    pub postcode: String,
    pub category: PropertyCategory,
    /// True when `category` was inferred rather than recorded by the source
    pub category_inferred: bool,
    pub new_build: bool,
    pub distance_miles: Option<f64>,
    /// 0-100, always 0 once excluded
    pub similarity: u8,
    pub excluded: bool,
    /// Human-readable, several causes joined by "; "
    pub exclusion_reason: Option<String>,
    pub energy_rating: Option<String>,
    pub floor_area_sqm: Option<f64>,
    pub price_per_sqm: Option<f64>,
}

impl ComparableSale {
    /// Raw record with all enrichment fields empty
    pub fn new(
        price: i64,
        sale_date: NaiveDate,
        address: impl Into<String>,
        postcode: impl Into<String>,
        category: PropertyCategory,
    ) -> Self {
        Self {
            price,
            sale_date,
            address: address.into(),
            postcode: postcode.into(),
            category,
            category_inferred: false,
            new_build: false,
            distance_miles: None,
            similarity: 0,
            excluded: false,
            exclusion_reason: None,
            energy_rating: None,
            floor_area_sqm: None,
            price_per_sqm: None,
        }
    }

    pub fn with_new_build(mut self, new_build: bool) -> Self {
        self.new_build = new_build;
        self
    }

    /// Category text with inferred categories tagged, e.g. "detached (inferred)"
    pub fn category_label(&self) -> String {
        if self.category_inferred {
            format!("{} (inferred)", self.category)
        } else {
            self.category.to_string()
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.excluded
    }
}

// ============================================================================
// Location
// ============================================================================

/// Canonical location details for a resolved postal code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeLocation {
    pub postcode: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Local authority name, e.g. "Manchester"
    pub admin_district: Option<String>,
    /// ONS code for the local authority, e.g. "E08000003"
    pub admin_district_code: Option<String>,
    pub region: Option<String>,
    /// Small-area statistical unit (LSOA) name
    pub lsoa: Option<String>,
    pub lsoa_code: Option<String>,
}

/// Everything auxiliary lookups may key on
#[derive(Debug, Clone, PartialEq)]
pub struct LocationContext {
    /// Canonical postcode, or the original fragment if resolution failed
    pub postcode: String,
    pub location: Option<PostcodeLocation>,
    /// Reference date for "recent" windows
    pub as_of: NaiveDate,
}

// ============================================================================
// Provenance
// ============================================================================

/// External dataset tag used for provenance disclosure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    SoldPrices,
    Geocoding,
    EnergyCertificates,
    Crime,
    Flood,
    PriceIndex,
    Planning,
    Earnings,
    Deprivation,
}

impl DataSource {
    /// Display name shown to end users
    pub fn label(self) -> &'static str {
        match self {
            Self::SoldPrices => "HM Land Registry Price Paid Data",
            Self::Geocoding => "postcodes.io",
            Self::EnergyCertificates => "EPC Register",
            Self::Crime => "data.police.uk",
            Self::Flood => "Environment Agency flood monitoring",
            Self::PriceIndex => "UK House Price Index",
            Self::Planning => "PlanIt planning applications",
            Self::Earnings => "ONS Annual Survey of Hours and Earnings",
            Self::Deprivation => "English Indices of Deprivation 2019",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Area Data
// ============================================================================

/// One energy certificate row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyCertificate {
    pub address: String,
    pub postcode: String,
    pub rating: Option<String>,
    pub floor_area_sqm: Option<f64>,
    pub heating_fuel: Option<String>,
    pub annual_energy_cost: Option<f64>,
    pub property_type: Option<String>,
    pub age_band: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySummary {
    pub certificate_count: usize,
    /// Rating letter → count
    pub rating_distribution: BTreeMap<String, usize>,
    pub median_floor_area_sqm: Option<f64>,
    pub median_annual_energy_cost: Option<f64>,
    pub common_heating_fuel: Option<String>,
    pub common_property_type: Option<String>,
    pub common_age_band: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrimeLevel {
    Low,
    Average,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrimeSummary {
    /// "YYYY-MM"
    pub month: String,
    pub total_incidents: usize,
    pub level: CrimeLevel,
    /// Most frequent categories, highest first
    pub top_categories: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloodRiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRisk {
    pub level: FloodRiskLevel,
    pub active_warnings: usize,
    pub nearby_stations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceIndexSummary {
    pub region: String,
    /// "YYYY-MM"
    pub month: String,
    pub average_price: Option<f64>,
    pub annual_change_pct: Option<f64>,
    pub monthly_change_pct: Option<f64>,
    pub sales_volume: Option<u64>,
    /// Category → average price
    pub by_property_type: BTreeMap<String, f64>,
    pub first_time_buyer_price: Option<f64>,
    pub former_owner_occupier_price: Option<f64>,
    pub new_build_price: Option<f64>,
    pub existing_property_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningApplication {
    pub reference: String,
    pub description: String,
    pub status: Option<String>,
    pub decided: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSummary {
    pub total_applications: usize,
    pub large_development_count: usize,
    pub recent_applications: Vec<PlanningApplication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffordabilitySummary {
    pub area_name: String,
    pub median_annual_earnings: f64,
    /// Average price ÷ annual earnings, when the price index is available
    pub affordability_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprivationSummary {
    pub lsoa_code: String,
    /// 1 = most deprived
    pub rank: u32,
    /// 1 = most deprived 10%
    pub decile: u8,
}

/// Independently-optional area sub-records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaData {
    pub energy: Option<EnergySummary>,
    pub crime: Option<CrimeSummary>,
    pub flood: Option<FloodRisk>,
    pub price_index: Option<PriceIndexSummary>,
    pub planning: Option<PlanningSummary>,
    pub affordability: Option<AffordabilitySummary>,
    pub deprivation: Option<DeprivationSummary>,
}

// ============================================================================
// Pipeline Output
// ============================================================================

/// Complete output of one pipeline run
///
/// Cached as a whole; the asking-price dependent fields (`negotiation_points`,
/// `assessment`) are recomputed for each caller by `EvidenceBundle::repriced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Canonical postcode (or the original fragment if unresolved)
    pub postcode: String,
    pub location: Option<PostcodeLocation>,
    pub comparables: Vec<ComparableSale>,
    pub area: AreaData,
    /// Sources that actually contributed to this run
    pub data_sources: Vec<DataSource>,
    pub confidence_drivers: Vec<ConfidenceDriver>,
    pub negotiation_points: Vec<String>,
    /// Subject's own certificate rating, when its address matched
    pub subject_energy_rating: Option<String>,
    pub estimate: Option<FairValue>,
    pub assessment: Option<PriceAssessment>,
    pub as_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
}
