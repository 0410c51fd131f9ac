//! Configuration loading and resolution
//!
//! Resolution priority for the config file:
//! 1. Explicit path (command-line argument)
//! 2. `PROPERTYEDGE_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/propertyedge/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing file is never fatal: a warning is logged and defaults are used.
//! A file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PROPERTYEDGE_CONFIG";

/// Environment variable overriding the EPC API token
pub const EPC_TOKEN_ENV: &str = "PROPERTYEDGE_EPC_TOKEN";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// External data source settings
    pub sources: SourcesConfig,
    /// Per-source and per-request timeouts
    pub timeouts: TimeoutsConfig,
    /// Valuation cache settings
    pub cache: CacheConfig,
    /// Comparable sales retrieval settings
    pub comparables: ComparablesConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info")
    pub level: String,
    /// Emit JSON-formatted log lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// External data source settings
///
/// Every base URL can be overridden so the adapters can be pointed at a
/// mirror or a local stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Contact address embedded in the User-Agent (Nominatim policy)
    pub contact_email: Option<String>,
    /// EPC Open Data Communities API token (base64 "email:key")
    pub epc_api_token: Option<String>,
    pub postcodes_base_url: String,
    pub nominatim_base_url: String,
    pub land_registry_sparql_url: String,
    pub epc_base_url: String,
    pub police_base_url: String,
    pub flood_base_url: String,
    pub hpi_base_url: String,
    pub planning_base_url: String,
    pub nomis_base_url: String,
    pub deprivation_base_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            contact_email: None,
            epc_api_token: None,
            postcodes_base_url: "https://api.postcodes.io".to_string(),
            nominatim_base_url: "https://nominatim.openstreetmap.org".to_string(),
            land_registry_sparql_url: "https://landregistry.data.gov.uk/landregistry/query"
                .to_string(),
            epc_base_url: "https://epc.opendatacommunities.org/api/v1".to_string(),
            police_base_url: "https://data.police.uk/api".to_string(),
            flood_base_url: "https://environment.data.gov.uk/flood-monitoring".to_string(),
            hpi_base_url: "https://landregistry.data.gov.uk/data/ukhpi".to_string(),
            planning_base_url: "https://www.planit.org.uk/api".to_string(),
            nomis_base_url: "https://www.nomisweb.co.uk/api/v01".to_string(),
            deprivation_base_url: "https://services3.arcgis.com/ivmBBrHfQfDnDf8Q/arcgis/rest/services/Indices_of_Multiple_Deprivation_(IMD)_2019/FeatureServer/0"
                .to_string(),
        }
    }
}

/// Timeouts in seconds
///
/// Observed upstream latency ranges from 3 to 8 seconds depending on source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub geocoding_secs: u64,
    pub sold_prices_secs: u64,
    pub energy_secs: u64,
    pub crime_secs: u64,
    pub flood_secs: u64,
    pub price_index_secs: u64,
    pub planning_secs: u64,
    pub earnings_secs: u64,
    pub deprivation_secs: u64,
    /// Upper bound for one whole pipeline run
    pub request_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            geocoding_secs: 5,
            sold_prices_secs: 8,
            energy_secs: 6,
            crime_secs: 5,
            flood_secs: 5,
            price_index_secs: 6,
            planning_secs: 5,
            earnings_secs: 4,
            deprivation_secs: 3,
            request_secs: 30,
        }
    }
}

/// Valuation cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (default one hour)
    pub ttl_secs: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// Comparable sales retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparablesConfig {
    /// Only sales from the last N years are retrieved
    pub lookback_years: u32,
    /// Maximum records per query
    pub max_records: usize,
}

impl Default for ComparablesConfig {
    fn default() -> Self {
        Self {
            lookback_years: 3,
            max_records: 20,
        }
    }
}

/// Locate the config file following the documented priority order
///
/// Returns `None` when no candidate file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let default_path = dirs::config_dir().map(|d| d.join("propertyedge").join("config.toml"))?;
    if default_path.exists() {
        Some(default_path)
    } else {
        None
    }
}

/// Parse TOML text into a config
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load configuration from the resolved path, falling back to defaults
///
/// Environment overrides are applied last.
pub fn load_toml_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| {
                    Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
                })?;
            let config = parse_toml_config(&content)?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            info!("No config file found, using compiled defaults");
            TomlConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply environment variable overrides (secrets only)
pub fn apply_env_overrides(config: &mut TomlConfig) {
    if let Ok(token) = std::env::var(EPC_TOKEN_ENV) {
        if is_valid_key(&token) {
            if config.sources.epc_api_token.is_some() {
                warn!("EPC API token found in both TOML and environment. Using environment.");
            }
            config.sources.epc_api_token = Some(token);
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Standard User-Agent for all outbound HTTP requests
pub fn get_user_agent(contact_email: Option<&str>) -> String {
    match contact_email {
        Some(email) if is_valid_key(email) => format!(
            "PropertyEdge/{} ( {} )",
            env!("CARGO_PKG_VERSION"),
            email.trim()
        ),
        _ => format!(
            "PropertyEdge/{} ( https://github.com/propertyedge/propertyedge )",
            env!("CARGO_PKG_VERSION")
        ),
    }
}
