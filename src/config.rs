use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URL of the static GTFS schedule archive (zip of delimited text tables).
    pub static_archive_url: String,
    /// Optional API key appended to live feed URLs as a query parameter.
    #[serde(default)]
    pub api_key: Option<String>,
    /// SQLite database file path.
    #[serde(default = "Config::default_database_path")]
    pub database_path: String,
    /// Scratch directory for archive downloads. Removed after every load.
    #[serde(default = "Config::default_scratch_dir")]
    pub scratch_dir: String,
    /// Directory for exported per-mode-class GeoJSON files.
    #[serde(default = "Config::default_export_dir")]
    pub export_dir: String,
    /// Timezone the schedule's seconds-past-midnight times are anchored to.
    #[serde(default = "Config::default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Cadence and retry knobs for the live refresh loops.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Interval in seconds between vehicle position polls (default: 15)
    #[serde(default = "RefreshConfig::default_vehicle_secs")]
    pub vehicle_secs: u64,
    /// Interval in seconds between trip update polls (default: 25)
    #[serde(default = "RefreshConfig::default_prediction_secs")]
    pub prediction_secs: u64,
    /// Interval in seconds between alert polls (default: 90)
    #[serde(default = "RefreshConfig::default_alert_secs")]
    pub alert_secs: u64,
    /// Interval in seconds between full static reloads (default: 86400)
    #[serde(default = "RefreshConfig::default_reload_secs")]
    pub reload_secs: u64,
    /// Vehicle position rows older than this many seconds are dropped (default: 300)
    #[serde(default = "RefreshConfig::default_stale_position_secs")]
    pub stale_position_secs: u64,
    /// Attempt budget for the vehicles-with-predictions assembly (default: 10)
    #[serde(default = "RefreshConfig::default_assembly_attempts")]
    pub assembly_attempts: u32,
    /// Sleep between assembly attempts, in milliseconds (default: 500)
    #[serde(default = "RefreshConfig::default_assembly_sleep_ms")]
    pub assembly_sleep_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            vehicle_secs: Self::default_vehicle_secs(),
            prediction_secs: Self::default_prediction_secs(),
            alert_secs: Self::default_alert_secs(),
            reload_secs: Self::default_reload_secs(),
            stale_position_secs: Self::default_stale_position_secs(),
            assembly_attempts: Self::default_assembly_attempts(),
            assembly_sleep_ms: Self::default_assembly_sleep_ms(),
        }
    }
}

impl RefreshConfig {
    fn default_vehicle_secs() -> u64 {
        15
    }
    fn default_prediction_secs() -> u64 {
        25
    }
    fn default_alert_secs() -> u64 {
        90
    }
    fn default_reload_secs() -> u64 {
        24 * 60 * 60
    }
    fn default_stale_position_secs() -> u64 {
        300
    }
    fn default_assembly_attempts() -> u32 {
        10
    }
    fn default_assembly_sleep_ms() -> u64 {
        500
    }
}

impl Config {
    fn default_database_path() -> String {
        "database/transit.db".into()
    }
    fn default_scratch_dir() -> String {
        "scratch".into()
    }
    fn default_export_dir() -> String {
        "export".into()
    }
    fn default_timezone() -> String {
        "America/New_York".into()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.static_archive_url.is_empty() {
            return Err(ConfigError::Invalid("static_archive_url must be set".into()));
        }
        let r = &self.refresh;
        if r.vehicle_secs == 0 || r.prediction_secs == 0 || r.alert_secs == 0 || r.reload_secs == 0
        {
            return Err(ConfigError::Invalid(
                "refresh intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn parsed_timezone(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::America::New_York)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
