//! Session derivation pipeline shared by import, crop and recompute
//!
//! Calculator -> splits builder -> relative effort, always over explicit
//! inputs so every path into a session produces the same derived state.

use chrono::{DateTime, Utc};

use crate::error::CalculationError;
use crate::geo::{GeoCalculator, GeoConfig};
use crate::models::{HeartRateZoneConfig, Session, SessionStats, TimeSeriesPoint, TrackPoint, Units};
use crate::relative_effort::RelativeEffortCalculator;
use crate::timeseries::TimeSeriesBuilder;

/// Values used when the route itself cannot supply them
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivationHints {
    /// Start time for untimed routes
    pub started_at: Option<DateTime<Utc>>,
    /// Duration for untimed routes
    pub duration_s: Option<f64>,
}

/// Derives every fact of a session from its route
#[derive(Debug, Clone)]
pub struct SessionDeriver {
    geo: GeoCalculator,
    builder: TimeSeriesBuilder,
    effort: RelativeEffortCalculator,
    zones: HeartRateZoneConfig,
    units: Units,
}

impl SessionDeriver {
    pub fn new(
        geo: GeoConfig,
        zones: HeartRateZoneConfig,
        effort: RelativeEffortCalculator,
        units: Units,
    ) -> Self {
        Self {
            geo: GeoCalculator::new(geo.clone()),
            builder: TimeSeriesBuilder::new(geo),
            effort,
            zones,
            units,
        }
    }

    pub fn zones(&self) -> &HeartRateZoneConfig {
        &self.zones
    }

    pub fn set_zones(&mut self, zones: HeartRateZoneConfig) {
        self.zones = zones;
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn geo(&self) -> &GeoCalculator {
        &self.geo
    }

    /// Build the time series from the route, then derive everything else
    pub fn derive(&self, session: &mut Session, hints: &DerivationHints) -> Result<(), CalculationError> {
        let series = self.builder.build(&session.route)?;
        self.apply(session, series, hints)
    }

    /// Derive stats, splits and effort for a route and an already built
    /// time series, and store all of it on the session
    pub fn apply(
        &self,
        session: &mut Session,
        series: Option<Vec<TimeSeriesPoint>>,
        hints: &DerivationHints,
    ) -> Result<(), CalculationError> {
        let route = &session.route;
        let metrics = self.geo.compute_metrics(route)?;

        let duration_s = match series.as_deref().and_then(|s| s.last()) {
            Some(last) => last.elapsed_seconds,
            None if metrics.duration_s > 0.0 => metrics.duration_s,
            None => hints.duration_s.unwrap_or(0.0),
        };
        if !duration_s.is_finite() || duration_s < 0.0 {
            return Err(CalculationError::invalid_value("duration", duration_s));
        }

        let split_length_m = self.units.split_length_m();
        let splits = match series.as_deref() {
            Some(series) => TimeSeriesBuilder::splits_from_series(series, split_length_m)?,
            None => TimeSeriesBuilder::splits_from_route(route, duration_s, split_length_m)?,
        };

        let relative_effort = series
            .as_deref()
            .and_then(|series| self.effort.score(series, &self.zones));

        let (avg_heart_rate, max_heart_rate) = average_and_max(route.iter().map(|p| p.heart_rate));
        let (avg_cadence, _) = average_and_max(route.iter().map(|p| p.cadence));
        let (avg_power, max_power) = average_and_max(route.iter().map(|p| p.power));

        let max_speed_mps = series
            .as_deref()
            .into_iter()
            .flatten()
            .filter_map(|p| p.speed)
            .reduce(f64::max)
            .or_else(|| route.iter().filter_map(|p| p.speed).reduce(f64::max));

        let stats = SessionStats {
            started_at: first_timestamp(route).or(hints.started_at),
            duration_s,
            distance_m: metrics.distance_m,
            avg_pace_s: GeoCalculator::pace_per_km(metrics.distance_m, duration_s),
            elevation_gain_m: metrics.elevation_gain_m,
            elevation_loss_m: metrics.elevation_loss_m,
            min_elevation_m: metrics.min_elevation_m,
            max_elevation_m: metrics.max_elevation_m,
            avg_speed_mps: GeoCalculator::speed(metrics.distance_m, duration_s)?,
            max_speed_mps,
            avg_heart_rate,
            max_heart_rate,
            avg_cadence,
            avg_power,
            max_power,
        };

        session.time_series = series;
        session.splits = splits;
        session.stats = stats;
        session.relative_effort = relative_effort;
        Ok(())
    }

    /// Re-score one session under the current zone configuration
    pub fn rescore(&self, session: &Session) -> Option<rust_decimal::Decimal> {
        session
            .time_series
            .as_deref()
            .and_then(|series| self.effort.score(series, &self.zones))
    }
}

impl Default for SessionDeriver {
    fn default() -> Self {
        Self::new(
            GeoConfig::default(),
            HeartRateZoneConfig::default(),
            RelativeEffortCalculator::default(),
            Units::default(),
        )
    }
}

fn first_timestamp(route: &[TrackPoint]) -> Option<DateTime<Utc>> {
    route.iter().find_map(|p| p.timestamp)
}

fn average_and_max(values: impl Iterator<Item = Option<u16>>) -> (Option<u16>, Option<u16>) {
    let (mut sum, mut count, mut max) = (0u64, 0u64, None);
    for value in values.flatten() {
        sum += u64::from(value);
        count += 1;
        max = max.max(Some(value));
    }
    if count == 0 {
        return (None, None);
    }
    (Some((sum as f64 / count as f64).round() as u16), max)
}
