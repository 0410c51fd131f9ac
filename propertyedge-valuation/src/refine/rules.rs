//! Address-text rule tables
//!
//! Heuristics are kept as ordered `(markers, label)` tables so they can be
//! audited and tested independently of the stages that apply them. Markers
//! match whole address tokens, never substrings ("land" does not fire on
//! "Landseer Road").

use crate::types::PropertyCategory;

/// One address rule: any marker token → label
#[derive(Debug, Clone, Copy)]
pub struct AddressRule<T: 'static> {
    pub markers: &'static [&'static str],
    pub label: T,
}

/// Category inference rules, evaluated in order, first match wins
pub const CATEGORY_RULES: &[AddressRule<PropertyCategory>] = &[
    AddressRule {
        markers: &["flat", "flats", "apartment", "apartments", "apt", "suite", "maisonette"],
        label: PropertyCategory::Flat,
    },
    AddressRule {
        markers: &["cottage"],
        label: PropertyCategory::Detached,
    },
    AddressRule {
        markers: &["farm", "farmhouse", "barn"],
        label: PropertyCategory::Detached,
    },
    AddressRule {
        markers: &["bungalow"],
        label: PropertyCategory::Bungalow,
    },
    AddressRule {
        markers: &["lodge", "house"],
        label: PropertyCategory::Detached,
    },
];

/// Markers of non-residential or mixed-use sales
pub const NON_RESIDENTIAL_RULES: &[AddressRule<&str>] = &[
    AddressRule {
        markers: &["farm", "farmhouse"],
        label: "farm",
    },
    AddressRule {
        markers: &["land"],
        label: "land",
    },
    AddressRule {
        markers: &["garage", "garages"],
        label: "garage",
    },
    AddressRule {
        markers: &["warehouse"],
        label: "warehouse",
    },
    AddressRule {
        markers: &["shop", "shops"],
        label: "shop",
    },
    AddressRule {
        markers: &["office", "offices"],
        label: "office",
    },
];

/// Lower-cased alphanumeric tokens of an address
pub fn address_tokens(address: &str) -> Vec<String> {
    address
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// First rule with a marker present in the address
pub fn first_match<T: Copy>(rules: &[AddressRule<T>], address: &str) -> Option<T> {
    let tokens = address_tokens(address);
    rules
        .iter()
        .find(|rule| rule.markers.iter().any(|m| tokens.iter().any(|t| t == m)))
        .map(|rule| rule.label)
}

/// Every rule with a marker present in the address, in table order
pub fn all_matches<T: Copy>(rules: &[AddressRule<T>], address: &str) -> Vec<T> {
    let tokens = address_tokens(address);
    rules
        .iter()
        .filter(|rule| rule.markers.iter().any(|m| tokens.iter().any(|t| t == m)))
        .map(|rule| rule.label)
        .collect()
}
