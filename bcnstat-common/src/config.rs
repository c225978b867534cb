//! Configuration loading and resolution
//!
//! Two layers, mirrored across the workspace binaries:
//! 1. **TOML file**: static settings (database path, thresholds, bounding
//!    box, source precedence), loaded once at startup
//! 2. **Overrides**: command-line arguments and `BCNSTAT_*` environment
//!    variables
//!
//! # Resolution Priority
//!
//! 1. Command-line arguments (highest priority)
//! 2. Environment variables (`BCNSTAT_DATABASE`, `BCNSTAT_CHUNK_SIZE`)
//! 3. TOML configuration file
//! 4. Built-in defaults (lowest priority)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Validation thresholds applied by the integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Maximum tolerated share of records that fail entity resolution
    #[serde(default = "default_max_unmapped_rate")]
    pub max_unmapped_rate: f64,

    /// Minimum share of coordinate-bearing records that must geocode to a
    /// neighborhood
    #[serde(default = "default_min_geocode_rate")]
    pub min_geocode_rate: f64,

    /// Maximum tolerated share of NULL metric values per table
    #[serde(default = "default_max_null_value_rate")]
    pub max_null_value_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_unmapped_rate: default_max_unmapped_rate(),
            min_geocode_rate: default_min_geocode_rate(),
            max_null_value_rate: default_max_null_value_rate(),
        }
    }
}

fn default_max_unmapped_rate() -> f64 {
    0.05
}

fn default_min_geocode_rate() -> f64 {
    0.95
}

fn default_max_null_value_rate() -> f64 {
    0.25
}

/// Geographic bounds for coordinate sanity checks.
///
/// Defaults cover the Barcelona municipal area with margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsConfig {
    #[serde(default = "default_min_lat")]
    pub min_lat: f64,
    #[serde(default = "default_max_lat")]
    pub max_lat: f64,
    #[serde(default = "default_min_lon")]
    pub min_lon: f64,
    #[serde(default = "default_max_lon")]
    pub max_lon: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min_lat: default_min_lat(),
            max_lat: default_max_lat(),
            min_lon: default_min_lon(),
            max_lon: default_max_lon(),
        }
    }
}

impl BoundsConfig {
    pub fn to_bounding_box(&self) -> crate::geo::BoundingBox {
        crate::geo::BoundingBox {
            min_lat: self.min_lat,
            max_lat: self.max_lat,
            min_lon: self.min_lon,
            max_lon: self.max_lon,
        }
    }
}

fn default_min_lat() -> f64 {
    41.25
}

fn default_max_lat() -> f64 {
    41.50
}

fn default_min_lon() -> f64 {
    2.00
}

fn default_max_lon() -> f64 {
    2.30
}

/// Configuration loaded from the TOML file.
///
/// Every field has a built-in default so an empty (or absent) file is a
/// valid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (relative or absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Rows per chunk during bulk loading
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Validation thresholds
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Coordinate sanity bounds
    #[serde(default)]
    pub bounds: BoundsConfig,

    /// Source tags in precedence order for master table assembly.
    ///
    /// When several sources supply the same metric for the same entity and
    /// period, the earliest listed tag wins. Unlisted tags rank after all
    /// listed ones, in alphabetical order.
    #[serde(default)]
    pub source_precedence: Vec<String>,

    /// Fact tables whose validation failure aborts the run
    #[serde(default = "default_critical_tables")]
    pub critical_tables: Vec<String>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            chunk_size: default_chunk_size(),
            thresholds: Thresholds::default(),
            bounds: BoundsConfig::default(),
            source_precedence: Vec::new(),
            critical_tables: default_critical_tables(),
        }
    }
}

fn default_chunk_size() -> usize {
    5000
}

fn default_critical_tables() -> Vec<String> {
    vec![
        "fact_population".to_string(),
        "fact_income".to_string(),
        "fact_housing_prices".to_string(),
    ]
}

/// Command-line overrides applied on top of file and environment values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub chunk_size: Option<usize>,
}

/// Fully resolved configuration used by the integration pipeline.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub database_path: PathBuf,
    pub chunk_size: usize,
    pub thresholds: Thresholds,
    pub bounds: BoundsConfig,
    pub source_precedence: Vec<String>,
    pub critical_tables: Vec<String>,
}

impl IntegrationConfig {
    /// Resolve configuration from all sources.
    ///
    /// The TOML file is located via (in order) the CLI `--config` argument,
    /// the `BCNSTAT_CONFIG` environment variable, then the platform config
    /// directory (`<config_dir>/bcnstat/config.toml`). A missing file at
    /// the default location is not an error; an explicitly named file that
    /// cannot be read or parsed is.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let explicit_path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var("BCNSTAT_CONFIG").ok().map(PathBuf::from));

        let toml_config = match &explicit_path {
            Some(path) => load_toml_config(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => load_toml_config(&path)?,
                _ => TomlConfig::default(),
            },
        };

        let database_path = overrides
            .database_path
            .clone()
            .or_else(|| std::env::var("BCNSTAT_DATABASE").ok().map(PathBuf::from))
            .or(toml_config.database_path)
            .unwrap_or_else(default_database_path);

        let chunk_size = overrides
            .chunk_size
            .or_else(|| {
                std::env::var("BCNSTAT_CHUNK_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(toml_config.chunk_size);

        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".to_string()));
        }
        toml_config.thresholds.validate()?;

        Ok(Self {
            database_path,
            chunk_size,
            thresholds: toml_config.thresholds,
            bounds: toml_config.bounds,
            source_precedence: toml_config.source_precedence,
            critical_tables: toml_config.critical_tables,
        })
    }
}

impl Thresholds {
    /// Reject thresholds outside [0, 1]; they are all rates.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_unmapped_rate", self.max_unmapped_rate),
            ("min_geocode_rate", self.min_geocode_rate),
            ("max_null_value_rate", self.max_null_value_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "threshold {} = {} outside [0, 1]",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Parse a TOML configuration file.
pub fn load_toml_config(path: &std::path::Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bcnstat").join("config.toml"))
}

/// Default database location for the platform
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bcnstat").join("bcnstat.db"))
        .unwrap_or_else(|| PathBuf::from("./bcnstat.db"))
}
