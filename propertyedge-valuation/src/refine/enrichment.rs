//! Enrichment Engine
//!
//! Merges energy-certificate data onto comparable sales by fuzzy address
//! matching and derives price-per-area. Also applies locational distance
//! once comparable postcodes have been geocoded.
//!
//! Matching order (first match wins, keys visited in sorted order):
//! 1. Exact normalized-address match
//! 2. First-line containment in either direction (token boundaries)
//! 3. First-line string similarity with identical house numbers
//!
//! Purely additive: absent data leaves fields empty and never fails.

use crate::stats::haversine_miles;
use crate::types::{first_address_line, ComparableSale, EnergyCertificate};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Certificate facts attached to a comparable
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateFacts {
    pub rating: Option<String>,
    pub floor_area_sqm: Option<f64>,
}

/// Normalized address → certificate facts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateIndex {
    entries: BTreeMap<String, CertificateFacts>,
}

impl CertificateIndex {
    /// Build from certificate rows; the first row seen for an address wins
    pub fn from_certificates(certificates: &[EnergyCertificate]) -> Self {
        let mut entries = BTreeMap::new();
        for cert in certificates {
            let key = normalize_address(&cert.address);
            if key.is_empty() {
                continue;
            }
            entries.entry(key).or_insert_with(|| CertificateFacts {
                rating: cert.rating.clone(),
                floor_area_sqm: cert.floor_area_sqm,
            });
        }
        Self { entries }
    }

    pub fn insert(&mut self, address: &str, facts: CertificateFacts) {
        self.entries.insert(normalize_address(address), facts);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best-effort lookup for one address
    pub fn find(&self, address: &str) -> Option<&CertificateFacts> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            return None;
        }

        if let Some(facts) = self.entries.get(&normalized) {
            return Some(facts);
        }

        let first_line = normalize_address(first_address_line(address));
        if first_line.is_empty() {
            return None;
        }

        let by_containment = self.entries.iter().find(|(key, _)| {
            let key_line = first_line_of_key(key);
            !key_line.is_empty()
                && (contains_tokens(&key_line, &first_line)
                    || contains_tokens(&first_line, &key_line))
        });
        if let Some((_, facts)) = by_containment {
            return Some(facts);
        }

        let numbers = numeric_tokens(&first_line);
        self.entries
            .iter()
            .find(|(key, _)| {
                let key_line = first_line_of_key(key);
                numeric_tokens(&key_line) == numbers
                    && strsim::jaro_winkler(&key_line, &first_line) >= SIMILARITY_THRESHOLD
            })
            .map(|(_, facts)| facts)
    }
}

const SIMILARITY_THRESHOLD: f64 = 0.92;

/// Lower-case, punctuation to spaces, collapse whitespace
///
/// Commas are kept as segment separators so the first line can still be
/// recovered from a normalized key.
pub fn normalize_address(address: &str) -> String {
    address
        .split(',')
        .map(|segment| {
            segment
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn first_line_of_key(key: &str) -> String {
    key.split(',').next().unwrap_or("").to_string()
}

/// `needle` appears in `haystack` on token boundaries
fn contains_tokens(haystack: &str, needle: &str) -> bool {
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

fn numeric_tokens(line: &str) -> Vec<&str> {
    line.split(' ')
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

/// Enrichment engine (purely additive)
#[derive(Debug, Default)]
pub struct EnrichmentEngine;

impl EnrichmentEngine {
    pub fn new() -> Self {
        Self
    }

    /// Attach energy rating, floor area and price-per-area
    pub fn enrich(
        &self,
        mut comparables: Vec<ComparableSale>,
        index: &CertificateIndex,
    ) -> Vec<ComparableSale> {
        let mut matched = 0usize;
        for comp in comparables.iter_mut() {
            if let Some(facts) = index.find(&comp.address) {
                matched += 1;
                comp.energy_rating = facts.rating.clone();
                comp.floor_area_sqm = facts.floor_area_sqm;
            }
            comp.price_per_sqm = match comp.floor_area_sqm {
                Some(area) if area > 0.0 => {
                    Some(((comp.price as f64 / area) * 100.0).round() / 100.0)
                }
                _ => None,
            };
        }

        debug!(
            comparables = comparables.len(),
            certificates = index.len(),
            matched,
            "Energy certificate enrichment complete"
        );
        comparables
    }

    /// Set distance (miles) from the subject for every comparable whose
    /// postcode has coordinates
    pub fn apply_distances(
        &self,
        mut comparables: Vec<ComparableSale>,
        subject: (f64, f64),
        coordinates: &HashMap<String, (f64, f64)>,
    ) -> Vec<ComparableSale> {
        for comp in comparables.iter_mut() {
            let key = comp.postcode.trim().to_uppercase();
            comp.distance_miles = coordinates.get(&key).map(|&(lat, lng)| {
                let miles = haversine_miles(subject.0, subject.1, lat, lng);
                (miles * 100.0).round() / 100.0
            });
        }
        comparables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyCategory;
    use chrono::NaiveDate;

    fn comp(address: &str, price: i64) -> ComparableSale {
        ComparableSale::new(
            price,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            address,
            "LS6 2AB",
            PropertyCategory::Terraced,
        )
    }

    fn facts(rating: &str, area: f64) -> CertificateFacts {
        CertificateFacts {
            rating: Some(rating.to_string()),
            floor_area_sqm: Some(area),
        }
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("FLAT 3,  12 High-Street , Leeds"),
            "flat 3,12 high street,leeds"
        );
        assert_eq!(normalize_address("  ,  "), "");
    }

    #[test]
    fn test_exact_match_and_price_per_area() {
        let mut index = CertificateIndex::default();
        index.insert("12 Acacia Avenue, Leeds", facts("C", 80.0));

        let comps = vec![comp("12 ACACIA AVENUE, LEEDS", 200_000)];
        let out = EnrichmentEngine::new().enrich(comps, &index);

        assert_eq!(out[0].energy_rating.as_deref(), Some("C"));
        assert_eq!(out[0].floor_area_sqm, Some(80.0));
        assert_eq!(out[0].price_per_sqm, Some(2500.0));
    }

    #[test]
    fn test_first_line_containment_either_direction() {
        let mut index = CertificateIndex::default();
        index.insert("12 Acacia Avenue, Headingley, Leeds", facts("D", 90.0));

        // Comparable first line contained in certificate first line
        let comps = vec![comp("12 Acacia Avenue, LEEDS", 180_000)];
        let out = EnrichmentEngine::new().enrich(comps, &index);
        assert_eq!(out[0].energy_rating.as_deref(), Some("D"));
    }

    #[test]
    fn test_containment_respects_token_boundaries() {
        let mut index = CertificateIndex::default();
        index.insert("Flat 31, Mill Court", facts("B", 50.0));

        let out = EnrichmentEngine::new().enrich(vec![comp("Flat 3, Mill Court", 150_000)], &index);
        assert!(out[0].energy_rating.is_none(), "flat 3 must not match flat 31");
    }

    #[test]
    fn test_similarity_fallback_requires_same_numbers() {
        let mut index = CertificateIndex::default();
        index.insert("12 Acacia Ave", facts("E", 70.0));

        let out = EnrichmentEngine::new().enrich(
            vec![comp("12 Acacia Avenue", 150_000), comp("14 Acacia Avenue", 150_000)],
            &index,
        );
        assert_eq!(out[0].energy_rating.as_deref(), Some("E"));
        assert!(out[1].energy_rating.is_none());
    }

    #[test]
    fn test_zero_area_has_no_price_per_area() {
        let mut index = CertificateIndex::default();
        index.insert("1 Moor Road", facts("C", 0.0));

        let out = EnrichmentEngine::new().enrich(vec![comp("1 Moor Road", 100_000)], &index);
        assert_eq!(out[0].floor_area_sqm, Some(0.0));
        assert!(out[0].price_per_sqm.is_none());
    }

    #[test]
    fn test_empty_inputs() {
        let engine = EnrichmentEngine::new();
        assert!(engine.enrich(Vec::new(), &CertificateIndex::default()).is_empty());

        let out = engine.enrich(vec![comp("1 Moor Road", 100_000)], &CertificateIndex::default());
        assert!(out[0].energy_rating.is_none());
        assert!(out[0].price_per_sqm.is_none());
    }

    #[test]
    fn test_index_first_certificate_wins() {
        let cert = |rating: &str| EnergyCertificate {
            address: "5 Oak Road".to_string(),
            postcode: "LS6 2AB".to_string(),
            rating: Some(rating.to_string()),
            floor_area_sqm: Some(60.0),
            heating_fuel: None,
            annual_energy_cost: None,
            property_type: None,
            age_band: None,
        };
        let index = CertificateIndex::from_certificates(&[cert("B"), cert("F")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find("5 Oak Road").unwrap().rating.as_deref(), Some("B"));
    }

    #[test]
    fn test_apply_distances() {
        let mut coords = HashMap::new();
        coords.insert("LS6 2AB".to_string(), (53.8200, -1.5800));

        let mut far = comp("2 Elm Road", 100_000);
        far.postcode = "ZZ1 1ZZ".to_string();

        let out = EnrichmentEngine::new().apply_distances(
            vec![comp("1 Moor Road", 100_000), far],
            (53.8200, -1.5800),
            &coords,
        );
        assert_eq!(out[0].distance_miles, Some(0.0));
        assert!(out[1].distance_miles.is_none());
    }
}
