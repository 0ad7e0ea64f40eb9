//! Configuration management for TripGuard
//!
//! Provides persistent settings storage with schema versioning and migrations.
//! Configuration is stored in `~/.tripguard/config.json`. Every section is
//! `#[serde(default)]` so partial files load with defaults for the rest.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::gateway::{DEFAULT_GATEWAY_ENDPOINT, DEFAULT_GATEWAY_TIMEOUT_SECS};

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(std::io::Error),

    #[error("Failed to write config file: {0}")]
    Write(std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown config version: {0}")]
    UnknownVersion(u32),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Position sampling, stillness and route deviation
    pub monitoring: MonitoringConfig,
    /// Accelerometer impact detection
    pub impact: ImpactConfig,
    /// Voice keyword detection
    pub voice: VoiceConfig,
    /// Pre-dispatch countdown
    pub countdown: CountdownConfig,
    /// SMS relay
    pub gateway: GatewayConfig,
    /// Route planning service
    pub route: RouteConfig,
    /// Local persistence
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            monitoring: MonitoringConfig::default(),
            impact: ImpactConfig::default(),
            voice: VoiceConfig::default(),
            countdown: CountdownConfig::default(),
            gateway: GatewayConfig::default(),
            route: RouteConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Position monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between position samples
    pub sampling_interval_secs: u64,
    /// Seconds without movement before a stillness SOS
    pub stillness_threshold_secs: u64,
    /// L1 displacement (degrees) below which a sample counts as unchanged
    pub displacement_epsilon_deg: f64,
    /// Metres from the nearest waypoint before the trip counts as off route
    pub deviation_threshold_m: f64,
    /// Seconds to wait for a single position fix
    pub acquisition_timeout_secs: u64,
    /// Whether leaving the route requests an SOS instead of only warning
    pub off_route_triggers_sos: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sampling_interval_secs: 10,
            stillness_threshold_secs: 60,
            displacement_epsilon_deg: 0.0001,
            deviation_threshold_m: 10.0,
            acquisition_timeout_secs: 15,
            off_route_triggers_sos: false,
        }
    }
}

impl MonitoringConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs)
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.acquisition_timeout_secs)
    }
}

/// Impact detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub enabled: bool,
    /// Acceleration magnitude (g) that counts as an impact
    pub threshold_g: f64,
    /// Accelerometer update interval in milliseconds
    pub sample_interval_ms: u64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_g: 2.5,
            sample_interval_ms: 300,
        }
    }
}

impl ImpactConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Voice keyword configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    /// Keywords matched case-insensitively as substrings
    pub keywords: Vec<String>,
    /// Delay before restarting the recogniser after an error
    pub restart_backoff_ms: u64,
    /// Recogniser language tag
    pub language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: vec![
                "help".to_string(),
                "sos".to_string(),
                "emergency".to_string(),
            ],
            restart_backoff_ms: 1000,
            language: "en-US".to_string(),
        }
    }
}

impl VoiceConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

/// Countdown configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Seconds the user has to cancel before dispatch
    pub seconds: u32,
    /// Vibration pattern for the pre-alert, in milliseconds
    pub vibration_pattern_ms: Vec<u64>,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            seconds: 5,
            vibration_pattern_ms: vec![500, 500, 500],
        }
    }
}

/// SMS relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Relay trigger endpoint
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Name shown in outgoing alerts
    pub display_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GATEWAY_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            display_name: "TripGuard user".to_string(),
        }
    }
}

/// Route planning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Directions service base URL
    pub base_url: String,
    /// API key; routing is disabled when unset
    pub api_key: Option<String>,
    /// Routing profile
    pub profile: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openrouteservice.org".to_string(),
            api_key: None,
            profile: "driving-car".to_string(),
        }
    }
}

/// Local persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record every dispatch in the alert history database
    pub alert_history: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            alert_history: true,
        }
    }
}

impl Config {
    /// Check values that would make monitoring misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.monitoring.sampling_interval_secs == 0 {
            return Err(invalid("monitoring.sampling_interval_secs", "must be > 0"));
        }
        if self.monitoring.acquisition_timeout_secs == 0 {
            return Err(invalid("monitoring.acquisition_timeout_secs", "must be > 0"));
        }
        if self.monitoring.displacement_epsilon_deg.is_nan() || self.monitoring.displacement_epsilon_deg < 0.0 {
            return Err(invalid("monitoring.displacement_epsilon_deg", "must be >= 0"));
        }
        if self.monitoring.deviation_threshold_m.is_nan() || self.monitoring.deviation_threshold_m <= 0.0 {
            return Err(invalid("monitoring.deviation_threshold_m", "must be > 0"));
        }
        if self.impact.threshold_g.is_nan() || self.impact.threshold_g <= 0.0 {
            return Err(invalid("impact.threshold_g", "must be > 0"));
        }
        if self.voice.enabled && self.voice.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid("voice.keywords", "at least one keyword is required"));
        }
        if self.countdown.seconds == 0 {
            return Err(invalid("countdown.seconds", "must be > 0"));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(invalid("gateway.timeout_secs", "must be > 0"));
        }
        url::Url::parse(&self.gateway.endpoint)
            .map_err(|e| invalid("gateway.endpoint", e.to_string()))?;
        url::Url::parse(&self.route.base_url)
            .map_err(|e| invalid("route.base_url", e.to_string()))?;

        Ok(())
    }
}

/// Get the path to the config directory (~/.tripguard)
pub fn get_config_dir() -> PathBuf {
    home_dir_or_fallback().join(".tripguard")
}

/// Get the path to the config file (~/.tripguard/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Load configuration from `path`, migrating and re-saving old schemas
///
/// A missing file yields the defaults. A file that fails
/// [`Config::validate`] is rejected rather than loaded.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
    let config: Config = serde_json::from_str(&contents)?;

    let original_version = config.version;
    let migrated = migrate_config(config)?;
    migrated.validate()?;
    if migrated.version != original_version {
        save_to(path, &migrated)?;
    }

    Ok(migrated)
}

/// Save configuration to `path`, creating parent directories
pub fn save_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(ConfigError::Write)?;
        }
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents).map_err(ConfigError::Write)?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Migrate configuration from older schema versions
pub fn migrate_config(mut config: Config) -> Result<Config, ConfigError> {
    let original_version = config.version;

    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version > CURRENT_VERSION {
        return Err(ConfigError::UnknownVersion(config.version));
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config, ConfigError> {
    match config.version {
        // Version 0 -> 1: first versioned schema
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(ConfigError::UnknownVersion(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_current_version() {
        let config = Config::default();
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_monitoring_config_defaults() {
        let monitoring = MonitoringConfig::default();
        assert_eq!(monitoring.sampling_interval_secs, 10);
        assert_eq!(monitoring.stillness_threshold_secs, 60);
        assert_eq!(monitoring.displacement_epsilon_deg, 0.0001);
        assert_eq!(monitoring.deviation_threshold_m, 10.0);
        assert!(!monitoring.off_route_triggers_sos);
        assert_eq!(monitoring.sampling_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_trigger_config_defaults() {
        let config = Config::default();
        assert_eq!(config.impact.threshold_g, 2.5);
        assert_eq!(config.impact.sample_interval(), Duration::from_millis(300));
        assert_eq!(config.voice.keywords, vec!["help", "sos", "emergency"]);
        assert_eq!(config.countdown.seconds, 5);
        assert_eq!(config.countdown.vibration_pattern_ms, vec![500, 500, 500]);
    }

    #[test]
    fn test_gateway_config_defaults() {
        let gateway = GatewayConfig::default();
        assert_eq!(gateway.endpoint, "http://localhost:3000/api/trigger-sos");
        assert_eq!(gateway.timeout_secs, 15);
    }

    #[test]
    fn test_partial_config_deserialisation() {
        let json = r#"{"version": 1, "monitoring": {"stillness_threshold_secs": 120}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.monitoring.stillness_threshold_secs, 120);
        assert_eq!(config.monitoring.sampling_interval_secs, 10); // Default
        assert_eq!(config.countdown.seconds, 5); // Default
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let json = r#"{
            "version": 1,
            "unknown_field": "should be ignored",
            "impact": {"threshold_g": 3.0, "extra": true}
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.impact.threshold_g, 3.0);
    }

    #[test]
    fn test_migration_from_version_0() {
        let old_config = Config {
            version: 0,
            ..Default::default()
        };

        let migrated = migrate_config(old_config).unwrap();
        assert_eq!(migrated.version, CURRENT_VERSION);
    }

    #[test]
    fn test_future_version_rejected() {
        let future_config = Config {
            version: 999,
            ..Default::default()
        };

        assert!(matches!(
            migrate_config(future_config),
            Err(ConfigError::UnknownVersion(999))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.monitoring.sampling_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "monitoring.sampling_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_keywords() {
        let mut config = Config::default();
        config.voice.keywords = vec!["  ".to_string()];
        assert!(config.validate().is_err());

        config.voice.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = Config::default();
        config.gateway.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_threshold() {
        let mut config = Config::default();
        config.impact.threshold_g = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_path_format() {
        let path = get_config_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains(".tripguard"));
        assert!(path_str.ends_with("config.json"));
    }
}
