//! Geospatial calculations over track points
//!
//! Great-circle distance, noise-suppressed elevation gain/loss, grade and speed.
//! Numeric input is validated before use: non-finite values are rejected with
//! [`CalculationError::InvalidNumericValue`], only finite grades are clamped.

use serde::{Deserialize, Serialize};

use crate::error::CalculationError;
use crate::models::TrackPoint;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Horizontal run below which a grade is not computed
const MIN_GRADE_RUN_M: f64 = 1.0;

/// Tunables for elevation smoothing and grade validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Elevation changes at or below this magnitude are treated as noise
    pub elevation_noise_threshold_m: f64,

    /// Minimum horizontal distance between two elevation samples that are compared
    pub elevation_min_distance_m: f64,

    /// Grades are clamped to +/- this value
    pub max_grade_percent: f64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            elevation_noise_threshold_m: 2.0,
            elevation_min_distance_m: 10.0,
            max_grade_percent: 45.0,
        }
    }
}

/// Distance, elevation and timing facts derived from a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub min_elevation_m: Option<f64>,
    pub max_elevation_m: Option<f64>,
    pub duration_s: f64,

    /// Seconds per kilometer
    pub avg_pace_s: Option<f64>,
}

/// Great-circle distance in meters between two coordinates
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Seconds between two instants with microsecond precision
pub fn seconds_between(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// Geospatial calculator
#[derive(Debug, Clone, Default)]
pub struct GeoCalculator {
    config: GeoConfig,
}

impl GeoCalculator {
    pub fn new(config: GeoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeoConfig {
        &self.config
    }

    /// Compute distance, elevation, duration and pace for a point sequence
    pub fn compute_metrics(&self, points: &[TrackPoint]) -> Result<TrackMetrics, CalculationError> {
        let cumulative = Self::cumulative_distances(points)?;
        let distance_m = cumulative.last().copied().unwrap_or(0.0);
        let (elevation_gain_m, elevation_loss_m) = self.elevation_change(points, &cumulative)?;

        let elevations = points.iter().filter_map(|p| p.elevation);
        let min_elevation_m = elevations.clone().reduce(f64::min);
        let max_elevation_m = elevations.reduce(f64::max);

        let duration_s = Self::duration(points);
        let avg_pace_s = Self::pace_per_km(distance_m, duration_s);

        Ok(TrackMetrics {
            distance_m,
            elevation_gain_m,
            elevation_loss_m,
            min_elevation_m,
            max_elevation_m,
            duration_s,
            avg_pace_s,
        })
    }

    /// Odometer value at every point. Points without coordinates repeat the
    /// previous value and are bridged over, not treated as a zero position.
    pub fn cumulative_distances(points: &[TrackPoint]) -> Result<Vec<f64>, CalculationError> {
        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        let mut last: Option<(f64, f64)> = None;

        for point in points {
            if let Some((lat, lon)) = point.position() {
                Self::validate_coordinate(lat, lon)?;
                if let Some((prev_lat, prev_lon)) = last {
                    total += haversine_distance(prev_lat, prev_lon, lat, lon);
                }
                last = Some((lat, lon));
            }
            cumulative.push(total);
        }

        Ok(cumulative)
    }

    /// Total elevation gain and loss in meters.
    ///
    /// Compares each elevation sample against the last accepted sample: the
    /// change is counted only when it exceeds the noise threshold and the two
    /// samples are at least `elevation_min_distance_m` apart along the track.
    pub fn elevation_change(
        &self,
        points: &[TrackPoint],
        cumulative: &[f64],
    ) -> Result<(f64, f64), CalculationError> {
        let mut gain = 0.0;
        let mut loss = 0.0;
        let mut anchor: Option<(f64, f64)> = None;

        for (point, &distance) in points.iter().zip(cumulative) {
            let Some(elevation) = point.elevation else {
                continue;
            };
            if !elevation.is_finite() {
                return Err(CalculationError::invalid_value("elevation", elevation));
            }

            let Some((anchor_elevation, anchor_distance)) = anchor else {
                anchor = Some((elevation, distance));
                continue;
            };

            let delta = elevation - anchor_elevation;
            if delta.abs() > self.config.elevation_noise_threshold_m
                && distance - anchor_distance >= self.config.elevation_min_distance_m
            {
                if delta > 0.0 {
                    gain += delta;
                } else {
                    loss -= delta;
                }
                anchor = Some((elevation, distance));
            }
        }

        Ok((gain, loss))
    }

    /// Grade in percent for a rise over a horizontal run.
    ///
    /// Returns `Ok(None)` when the run is too short to be meaningful.
    pub fn grade(&self, rise_m: f64, run_m: f64) -> Result<Option<f64>, CalculationError> {
        if !rise_m.is_finite() {
            return Err(CalculationError::invalid_value("rise", rise_m));
        }
        if !run_m.is_finite() || run_m < 0.0 {
            return Err(CalculationError::invalid_value("run", run_m));
        }
        if run_m < MIN_GRADE_RUN_M {
            return Ok(None);
        }
        let limit = self.config.max_grade_percent;
        Ok(Some((rise_m / run_m * 100.0).clamp(-limit, limit)))
    }

    /// Speed in meters per second; `None` when no time elapsed
    pub fn speed(distance_m: f64, seconds: f64) -> Result<Option<f64>, CalculationError> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(CalculationError::invalid_value("distance", distance_m));
        }
        if !seconds.is_finite() {
            return Err(CalculationError::invalid_value("seconds", seconds));
        }
        if seconds <= 0.0 {
            return Ok(None);
        }
        Ok(Some(distance_m / seconds))
    }

    /// Seconds between the first and last timestamped points
    pub fn duration(points: &[TrackPoint]) -> f64 {
        let first = points.iter().find_map(|p| p.timestamp);
        let last = points.iter().rev().find_map(|p| p.timestamp);
        match (first, last) {
            (Some(first), Some(last)) => seconds_between(first, last).max(0.0),
            _ => 0.0,
        }
    }

    /// Seconds per kilometer, when both distance and duration are positive
    pub fn pace_per_km(distance_m: f64, duration_s: f64) -> Option<f64> {
        if distance_m > 0.0 && duration_s > 0.0 {
            Some(duration_s / (distance_m / 1000.0))
        } else {
            None
        }
    }

    fn validate_coordinate(lat: f64, lon: f64) -> Result<(), CalculationError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CalculationError::invalid_value("latitude", lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CalculationError::invalid_value("longitude", lon));
        }
        Ok(())
    }
}
