use crate::models::{HeartRateZone, HeartRateZoneConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Errors that can occur during zone calculations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneError {
    #[error("Invalid threshold value: {0}")]
    InvalidThreshold(String),
    #[error("Invalid zone configuration: {0}")]
    InvalidConfig(String),
}

/// Heart rate zone calculation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HRZoneMethod {
    /// Based on Lactate Threshold Heart Rate
    Lthr,
    /// Based on Maximum Heart Rate (age-predicted or tested)
    MaxHr,
}

/// Zone calculation utilities
pub struct ZoneCalculator;

impl ZoneCalculator {
    /// Build a five-zone configuration from a threshold heart rate
    pub fn heart_rate_zones(threshold: u16, method: HRZoneMethod) -> Result<HeartRateZoneConfig, ZoneError> {
        Self::validate_heart_rate(threshold)?;
        let value = Decimal::from(threshold);

        // Upper bounds of zones 1-4 as fractions of the threshold, plus the zone 5 ceiling
        let (floor, bounds, ceiling) = match method {
            // - Z1: < 81% LTHR, Z2: 81-89%, Z3: 90-93%, Z4: 94-99%, Z5: 100%+
            HRZoneMethod::Lthr => (dec!(0.50), [dec!(0.81), dec!(0.89), dec!(0.93), dec!(0.99)], threshold + 20),
            // - Z1: 50-60% MaxHR, Z2: 60-70%, Z3: 70-80%, Z4: 80-90%, Z5: 90%+
            HRZoneMethod::MaxHr => (dec!(0.50), [dec!(0.60), dec!(0.70), dec!(0.80), dec!(0.90)], threshold),
        };

        let mut zones = [HeartRateZone { min: 0, max: 0 }; 5];
        let mut min = Self::percentage(value, floor)?;
        for (i, fraction) in bounds.iter().enumerate() {
            let max = Self::percentage(value, *fraction)?;
            zones[i] = HeartRateZone { min, max };
            min = max + 1;
        }
        zones[4] = HeartRateZone { min, max: ceiling.max(min) };

        let config = HeartRateZoneConfig { zones };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Check that zones are ordered, non-empty and contiguous
    pub fn validate(config: &HeartRateZoneConfig) -> Result<(), ZoneError> {
        for (i, zone) in config.zones.iter().enumerate() {
            if zone.min > zone.max {
                return Err(ZoneError::InvalidConfig(format!(
                    "zone {} has min {} above max {}",
                    i + 1,
                    zone.min,
                    zone.max
                )));
            }
            if i > 0 && config.zones[i - 1].max.checked_add(1) != Some(zone.min) {
                return Err(ZoneError::InvalidConfig(format!(
                    "zone {} starts at {} but zone {} ends at {}",
                    i + 1,
                    zone.min,
                    i,
                    config.zones[i - 1].max
                )));
            }
        }
        Ok(())
    }

    /// Zone (1-5) of a heart rate reading; readings outside the configured
    /// range clamp to the nearest zone
    pub fn get_heart_rate_zone(hr: u16, config: &HeartRateZoneConfig) -> u8 {
        if hr < config.zones[0].min {
            return 1;
        }
        config
            .zones
            .iter()
            .position(|zone| hr >= zone.min && hr <= zone.max)
            .map(|i| (i + 1) as u8)
            .unwrap_or(5)
    }

    fn percentage(value: Decimal, fraction: Decimal) -> Result<u16, ZoneError> {
        (value * fraction)
            .round()
            .to_u16()
            .ok_or_else(|| ZoneError::InvalidThreshold(format!("{} out of range", value * fraction)))
    }

    fn validate_heart_rate(hr: u16) -> Result<(), ZoneError> {
        if !(30..=220).contains(&hr) {
            return Err(ZoneError::InvalidThreshold(format!(
                "heart rate must be between 30 and 220 bpm, got {}",
                hr
            )));
        }
        Ok(())
    }
}

impl Default for HeartRateZoneConfig {
    fn default() -> Self {
        HeartRateZoneConfig {
            zones: [
                HeartRateZone { min: 95, max: 114 },
                HeartRateZone { min: 115, max: 133 },
                HeartRateZone { min: 134, max: 152 },
                HeartRateZone { min: 153, max: 171 },
                HeartRateZone { min: 172, max: 190 },
            ],
        }
    }
}
