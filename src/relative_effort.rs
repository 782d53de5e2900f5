use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CalculationError;
use crate::models::{HeartRateZoneConfig, TimeSeriesPoint};
use crate::zones::ZoneCalculator;

/// Score weight per minute spent in each zone, zone 1 first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneWeights(pub [Decimal; 5]);

impl Default for ZoneWeights {
    fn default() -> Self {
        ZoneWeights([dec!(0.5), dec!(1.0), dec!(2.0), dec!(3.5), dec!(5.5)])
    }
}

impl ZoneWeights {
    /// Weights must be positive and strictly increasing with zone
    pub fn validate(&self) -> Result<(), CalculationError> {
        let invalid = |i: usize| CalculationError::InvalidParameter {
            parameter: format!("zone_weights[{}]", i),
            value: self.0[i].to_string(),
        };
        if self.0[0] <= Decimal::ZERO {
            return Err(invalid(0));
        }
        for i in 1..self.0.len() {
            if self.0[i] <= self.0[i - 1] {
                return Err(invalid(i));
            }
        }
        Ok(())
    }
}

/// Seconds attributed to each zone, zone 1 first
pub type ZoneSeconds = [f64; 5];

/// Zone-weighted intensity score.
///
/// A pure function of the time series, the zone configuration and the
/// weights: each interval between consecutive samples is attributed to the
/// zone of the heart rate at its start.
#[derive(Debug, Clone, Default)]
pub struct RelativeEffortCalculator {
    weights: ZoneWeights,
}

impl RelativeEffortCalculator {
    pub fn new(weights: ZoneWeights) -> Result<Self, CalculationError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ZoneWeights {
        &self.weights
    }

    /// Time per zone; `None` when no sample carries a heart rate
    pub fn zone_seconds(series: &[TimeSeriesPoint], zones: &HeartRateZoneConfig) -> Option<ZoneSeconds> {
        if !series.iter().any(|p| p.heart_rate_bpm.is_some()) {
            return None;
        }

        let mut seconds = [0.0; 5];
        for pair in series.windows(2) {
            let Some(hr) = pair[0].heart_rate_bpm else {
                continue;
            };
            let interval = pair[1].elapsed_seconds - pair[0].elapsed_seconds;
            if interval > 0.0 {
                let zone = ZoneCalculator::get_heart_rate_zone(hr, zones);
                seconds[usize::from(zone - 1)] += interval;
            }
        }
        Some(seconds)
    }

    /// Score rounded to one decimal; absent without a heart-rate stream
    pub fn score(&self, series: &[TimeSeriesPoint], zones: &HeartRateZoneConfig) -> Option<Decimal> {
        let seconds = Self::zone_seconds(series, zones)?;

        let total = seconds
            .iter()
            .zip(self.weights.0.iter())
            .map(|(&secs, weight)| {
                let minutes = Decimal::from_f64(secs).unwrap_or(Decimal::ZERO) / dec!(60);
                minutes * weight
            })
            .sum::<Decimal>();

        Some(total.round_dp(1))
    }
}
