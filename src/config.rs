use crate::constants;
use crate::error::{Result, SyncError};
use crate::spatial::Crs;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Process-wide configuration. Built once in `main` and passed by reference.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub zones: ZonesConfig,
    #[serde(default = "default_corridors")]
    pub corridors: Vec<CorridorConfig>,
    #[serde(default)]
    pub columns: ColumnNames,
    #[serde(default)]
    pub output: OutputConfig,
    pub sheet: SheetConfig,
    pub warehouse: Option<WarehouseConfig>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub follow_pagination: bool,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_coordinate_field")]
    pub coordinate_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZonesConfig {
    /// Highest priority first.
    #[serde(default)]
    pub special: Vec<SpecialZoneConfig>,
    pub partition: PartitionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpecialZoneConfig {
    pub name: String,
    pub path: PathBuf,
    pub code: f64,
    #[serde(default = "default_crs")]
    pub crs: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_crs")]
    pub crs: String,
    #[serde(default = "default_code_aliases")]
    pub code_aliases: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorridorConfig {
    pub name: String,
    /// `[lon, lat]` pairs in WGS84.
    pub ring: Vec<[f64; 2]>,
}

/// Output names of the columns the pipeline derives.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColumnNames {
    pub shift: String,
    pub date: String,
    pub time: String,
    pub latitude: String,
    pub longitude: String,
    pub altitude: String,
    pub precision: String,
    pub corridor: String,
    pub zone: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            shift: constants::DEFAULT_SHIFT_COLUMN.to_string(),
            date: constants::DEFAULT_DATE_COLUMN.to_string(),
            time: constants::DEFAULT_TIME_COLUMN.to_string(),
            latitude: constants::DEFAULT_LATITUDE_COLUMN.to_string(),
            longitude: constants::DEFAULT_LONGITUDE_COLUMN.to_string(),
            altitude: constants::DEFAULT_ALTITUDE_COLUMN.to_string(),
            precision: constants::DEFAULT_PRECISION_COLUMN.to_string(),
            corridor: constants::DEFAULT_CORRIDOR_COLUMN.to_string(),
            zone: constants::DEFAULT_ZONE_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Canonical column order. Empty means first-seen field order.
    pub columns: Vec<String>,
    /// Source field name -> output column name.
    pub rename: HashMap<String, String>,
    pub numeric_columns: Vec<String>,
    /// Coerced to integers; unparseable values become 0.
    pub integer_columns: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SheetConfig {
    Google {
        spreadsheet_id: String,
        worksheet: String,
        #[serde(default = "default_sheet_token_env")]
        token_env: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Csv {
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Sqlite { path: PathBuf, table: String },
}

/// Pushgateway the run's metrics are pushed to once the command finishes.
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub pushgateway_url: String,
    #[serde(default = "default_metrics_job")]
    pub job: String,
    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    constants::DEFAULT_TOKEN_ENV.to_string()
}
fn default_auth_scheme() -> String {
    constants::DEFAULT_AUTH_SCHEME.to_string()
}
fn default_timeout_secs() -> u64 {
    constants::DEFAULT_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}
fn default_id_field() -> String {
    constants::DEFAULT_ID_FIELD.to_string()
}
fn default_coordinate_field() -> String {
    constants::DEFAULT_COORDINATE_FIELD.to_string()
}
fn default_timestamp_field() -> String {
    constants::DEFAULT_TIMESTAMP_FIELD.to_string()
}
fn default_crs() -> String {
    constants::DEFAULT_CRS.to_string()
}
fn default_sheet_token_env() -> String {
    constants::DEFAULT_SHEET_TOKEN_ENV.to_string()
}
fn default_metrics_job() -> String {
    constants::DEFAULT_METRICS_JOB.to_string()
}
fn default_push_timeout_secs() -> u64 {
    constants::DEFAULT_PUSH_TIMEOUT_SECS
}
fn default_code_aliases() -> Vec<String> {
    constants::DEFAULT_CODE_ALIASES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_corridors() -> Vec<CorridorConfig> {
    constants::DEFAULT_CORRIDORS
        .iter()
        .map(|(name, ring)| CorridorConfig {
            name: name.to_string(),
            ring: ring.to_vec(),
        })
        .collect()
}

impl AppConfig {
    /// Reads, parses and validates a TOML config. Relative paths resolve
    /// against the config file's directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for zone in &mut self.zones.special {
            resolve(&mut zone.path);
        }
        resolve(&mut self.zones.partition.path);
        if let SheetConfig::Csv { path } = &mut self.sheet {
            resolve(path);
        }
        if let Some(WarehouseConfig::Sqlite { path, .. }) = &mut self.warehouse {
            resolve(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for zone in &self.zones.special {
            if !names.insert(zone.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "Duplicate special zone name '{}'",
                    zone.name
                )));
            }
            if !zone.code.is_finite() {
                return Err(SyncError::Config(format!(
                    "Special zone '{}' has a non-finite code",
                    zone.name
                )));
            }
            zone.crs.parse::<Crs>()?;
        }
        self.zones.partition.crs.parse::<Crs>()?;
        if self.zones.partition.code_aliases.is_empty() {
            return Err(SyncError::Config(
                "Partition layer needs at least one code attribute alias".to_string(),
            ));
        }
        for corridor in &self.corridors {
            if corridor.ring.len() < 3 {
                return Err(SyncError::Config(format!(
                    "Corridor '{}' needs at least 3 points",
                    corridor.name
                )));
            }
        }
        if self.source.id_field.trim().is_empty() {
            return Err(SyncError::Config("source.id_field is empty".to_string()));
        }
        // Without the identifier in the sheet every run would re-append everything
        let id_column = self
            .output
            .rename
            .get(&self.source.id_field)
            .unwrap_or(&self.source.id_field);
        if !self.output.columns.is_empty() && !self.output.columns.contains(id_column) {
            return Err(SyncError::Config(format!(
                "output.columns must include the identifier column '{}'",
                id_column
            )));
        }
        Ok(())
    }
}
