use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::derive::SessionDeriver;
use crate::error::StrideError;
use crate::geo::GeoConfig;
use crate::import::batch::BatchConfig;
use crate::logging::LogConfig;
use crate::models::{HeartRateZoneConfig, Units};
use crate::relative_effort::{RelativeEffortCalculator, ZoneWeights};
use crate::zones::{HRZoneMethod, ZoneCalculator};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub metadata: ConfigMetadata,

    /// General application settings
    pub settings: AppSettings,

    /// Elevation smoothing and grade limits
    #[serde(default)]
    pub geo: GeoConfig,

    /// Bulk import bounds
    #[serde(default)]
    pub import: BatchConfig,

    /// Heart-rate zones used for relative effort
    #[serde(default)]
    pub zones: HeartRateZoneConfig,

    #[serde(default)]
    pub relative_effort: RelativeEffortSettings,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Directory holding the session database
    pub data_dir: PathBuf,

    /// Split length preference
    pub units: Units,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelativeEffortSettings {
    /// Score per minute in each zone, zone 1 first
    pub zone_weights: ZoneWeights,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            geo: GeoConfig::default(),
            import: BatchConfig::default(),
            zones: HeartRateZoneConfig::default(),
            relative_effort: RelativeEffortSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: Self::default_data_dir(),
            units: Units::Metric,
        }
    }
}

impl AppSettings {
    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stridelog")
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stridelog")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %config_path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }

    /// Location of the session database
    pub fn database_path(&self) -> PathBuf {
        self.settings.data_dir.join("stridelog.db")
    }

    /// Reject values no calculator would accept
    pub fn validate(&self) -> std::result::Result<(), StrideError> {
        ZoneCalculator::validate(&self.zones).map_err(|e| StrideError::Configuration(e.to_string()))?;
        self.relative_effort
            .zone_weights
            .validate()
            .map_err(|e| StrideError::Configuration(e.to_string()))?;

        let geo = &self.geo;
        let positive = [
            ("geo.elevation_noise_threshold_m", geo.elevation_noise_threshold_m),
            ("geo.elevation_min_distance_m", geo.elevation_min_distance_m),
            ("geo.max_grade_percent", geo.max_grade_percent),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value < 0.0 {
                return Err(StrideError::Configuration(format!("{} must be a non-negative number, got {}", name, value)));
            }
        }
        if self.import.max_batch_files == 0 {
            return Err(StrideError::Configuration(
                "import.max_batch_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace the zones with ones derived from a threshold heart rate
    pub fn set_zones_from_threshold(
        &mut self,
        threshold_bpm: u16,
        method: HRZoneMethod,
    ) -> std::result::Result<(), StrideError> {
        self.zones = ZoneCalculator::heart_rate_zones(threshold_bpm, method)
            .map_err(|e| StrideError::Configuration(e.to_string()))?;
        Ok(())
    }

    /// Derivation pipeline configured from this file
    pub fn deriver(&self) -> std::result::Result<SessionDeriver, StrideError> {
        let effort = RelativeEffortCalculator::new(self.relative_effort.zone_weights.clone())?;
        Ok(SessionDeriver::new(
            self.geo.clone(),
            self.zones.clone(),
            effort,
            self.settings.units,
        ))
    }
}
