use tracing::debug;

use crate::error::ParseError;
use crate::models::TrackPoint;

/// Validate and clean parsed track points
pub struct TrackValidator;

impl TrackValidator {
    /// Enforce the track invariants: at least two usable points, finite
    /// in-range numbers and non-decreasing timestamps.
    pub fn validate_points(points: &[TrackPoint]) -> Result<(), ParseError> {
        let usable = points.iter().filter(|p| p.is_usable()).count();
        if usable < 2 {
            return Err(ParseError::InsufficientPoints { found: usable });
        }

        for point in points {
            if let Some((lat, lon)) = point.position() {
                Self::check_coordinate(lat, lon)?;
            }
            Self::check_finite_opt("elevation", point.elevation)?;
            Self::check_finite_opt("temperature", point.temperature)?;
            Self::check_finite_opt("speed", point.speed)?;
            Self::check_finite_opt("grade", point.grade)?;
            Self::check_finite_opt("vertical_speed", point.vertical_speed)?;
        }

        let mut previous = None;
        for (index, timestamp) in points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.timestamp.map(|t| (i, t)))
        {
            if let Some(prev) = previous {
                if timestamp < prev {
                    return Err(ParseError::malformed(
                        "track",
                        format!("timestamp at point {} goes backwards ({} < {})", index, timestamp, prev),
                    ));
                }
            }
            previous = Some(timestamp);
        }

        Ok(())
    }

    /// Latitude and longitude must be finite and within their ranges
    pub fn check_coordinate(lat: f64, lon: f64) -> Result<(), ParseError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Self::invalid("latitude", lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(Self::invalid("longitude", lon));
        }
        Ok(())
    }

    /// Parse a decimal text field, rejecting NaN and infinities
    pub fn parse_finite(field: &str, text: &str) -> Result<f64, ParseError> {
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidNumericValue {
                field: field.to_string(),
                value: text.trim().to_string(),
            })?;
        if !value.is_finite() {
            return Err(Self::invalid(field, value));
        }
        Ok(value)
    }

    /// Parse an integer sensor reading; fractional readings are rounded
    pub fn parse_sensor(field: &str, text: &str) -> Result<u16, ParseError> {
        let value = Self::parse_finite(field, text)?;
        if !(0.0..=f64::from(u16::MAX)).contains(&value) {
            return Err(Self::invalid(field, value));
        }
        Ok(value.round() as u16)
    }

    /// Drop sensor readings that fall outside human ranges.
    ///
    /// Implausible sensor values are dropouts, so they are unset rather than
    /// failing the whole file. Returns the names of the dropped fields.
    pub fn clean_point(point: &mut TrackPoint) -> Vec<&'static str> {
        let mut dropped = Vec::new();

        if let Some(hr) = point.heart_rate.filter(|hr| !(25..=250).contains(hr)) {
            dropped.push(Self::drop_reading("heart_rate", f64::from(hr), &mut point.heart_rate));
        }

        if let Some(cadence) = point.cadence.filter(|c| *c > 300) {
            dropped.push(Self::drop_reading("cadence", f64::from(cadence), &mut point.cadence));
        }

        if let Some(power) = point.power.filter(|p| *p > 3000) {
            dropped.push(Self::drop_reading("power", f64::from(power), &mut point.power));
        }

        if let Some(temp) = point.temperature.filter(|t| !(-60.0..=70.0).contains(t)) {
            dropped.push(Self::drop_reading("temperature", temp, &mut point.temperature));
        }

        // 15 m/s is well beyond any sprint
        if let Some(speed) = point.speed.filter(|s| !(0.0..=15.0).contains(s)) {
            dropped.push(Self::drop_reading("speed", speed, &mut point.speed));
        }

        dropped
    }

    fn drop_reading<T>(field: &'static str, value: f64, slot: &mut Option<T>) -> &'static str {
        debug!(field, value, "Dropping out-of-range sensor reading");
        *slot = None;
        field
    }

    fn check_finite_opt(field: &str, value: Option<f64>) -> Result<(), ParseError> {
        match value {
            Some(v) if !v.is_finite() => Err(Self::invalid(field, v)),
            _ => Ok(()),
        }
    }

    fn invalid(field: &str, value: f64) -> ParseError {
        ParseError::InvalidNumericValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
