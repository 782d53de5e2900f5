//! Non-destructive trimming of a session's start and end
//!
//! A crop works on a copy: the session passes through `Validating` and
//! `Recomputing`, and the caller persists the result. On a validation
//! failure the caller's session is untouched and stays in its prior state.
//! The raw source is never modified, so re-deriving from it undoes a crop.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::derive::{DerivationHints, SessionDeriver};
use crate::error::CropError;
use crate::geo::seconds_between;
use crate::models::{is_timed, Session, SessionState, TimeSeriesPoint, TrackPoint};

/// Applies trims and re-derives every dependent fact
pub struct CropOrchestrator<'a> {
    deriver: &'a SessionDeriver,
}

impl<'a> CropOrchestrator<'a> {
    pub fn new(deriver: &'a SessionDeriver) -> Self {
        Self { deriver }
    }

    /// Remove `start_trim_s` seconds from the start and `end_trim_s` from the
    /// end. Returns the re-derived session in the `Recomputing` state.
    pub fn crop(&self, session: &Session, start_trim_s: f64, end_trim_s: f64) -> Result<Session, CropError> {
        let mut cropped = session.clone();
        cropped.state = SessionState::Validating;
        debug!(session_id = %session.id, start_trim_s, end_trim_s, "Validating crop");

        let (window_start, window_end) = Self::validate(session, start_trim_s, end_trim_s)?;

        cropped.state = SessionState::Recomputing;
        debug!(session_id = %session.id, window_start, window_end, "Recomputing cropped session");

        let series = session
            .time_series
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| crop_series(s, window_start, window_end));

        cropped.route = if is_timed(&session.route) {
            crop_timed_route(&session.route, window_start, window_end)
        } else {
            crop_route_by_index(&session.route, session.stats.duration_s, window_start, window_end)
        };

        let hints = DerivationHints {
            started_at: session
                .stats
                .started_at
                .map(|start| start + duration_from_seconds(window_start)),
            duration_s: Some(window_end - window_start),
        };

        self.deriver.apply(&mut cropped, series, &hints)?;
        Ok(cropped)
    }

    /// Check trims and return the retained window `[start, end]` in seconds
    fn validate(session: &Session, start_trim_s: f64, end_trim_s: f64) -> Result<(f64, f64), CropError> {
        for (name, value) in [("start trim", start_trim_s), ("end trim", end_trim_s)] {
            if !value.is_finite() || value < 0.0 {
                return Err(CropError::Validation {
                    reason: format!("{} must be a non-negative number of seconds, got {}", name, value),
                });
            }
        }

        let has_series = session.time_series.as_ref().is_some_and(|s| !s.is_empty());
        if !has_series && session.route.is_empty() {
            return Err(CropError::NoTrimmableData);
        }

        let duration = session.stats.duration_s;
        if start_trim_s + end_trim_s >= duration {
            return Err(CropError::Validation {
                reason: format!(
                    "trimming {}s + {}s would remove the entire {}s session",
                    start_trim_s, end_trim_s, duration
                ),
            });
        }

        let window = (start_trim_s, duration - end_trim_s);
        if !has_series && !is_timed(&session.route) {
            let (first, last) = nearest_indices(session.route.len(), duration, window.0, window.1);
            if last <= first {
                return Err(CropError::Validation {
                    reason: "window is too short to keep two route points".to_string(),
                });
            }
        }
        Ok(window)
    }
}

/// Keep samples inside `[start, end]`, insert interpolated samples where a
/// boundary falls between two samples, then rebase time and distance so the
/// first retained sample is at zero.
pub fn crop_series(series: &[TimeSeriesPoint], start: f64, end: f64) -> Vec<TimeSeriesPoint> {
    let mut retained = crop_window(series, start, end, |p| p.elapsed_seconds, interpolate_sample);

    let origin_distance = retained.first().and_then(|p| p.distance_m).unwrap_or(0.0);
    for point in &mut retained {
        point.elapsed_seconds -= start;
        point.distance_m = point.distance_m.map(|d| (d - origin_distance).max(0.0));
    }
    if let Some(first) = retained.first_mut() {
        first.elapsed_seconds = 0.0;
    }
    retained
}

/// Filter timestamped route points to the window, with interpolated
/// boundary points
pub fn crop_timed_route(route: &[TrackPoint], start: f64, end: f64) -> Vec<TrackPoint> {
    let Some(origin) = route.first().and_then(|p| p.timestamp) else {
        return route.to_vec();
    };
    let elapsed = |p: &TrackPoint| p.timestamp.map(|t| seconds_between(origin, t)).unwrap_or(0.0);
    crop_window(route, start, end, elapsed, |before, after, at| {
        interpolate_point(before, after, origin, elapsed(before), elapsed(after), at)
    })
}

/// Untimed routes map the window onto point indices by nearest index:
/// `round(t / duration * (n - 1))` for both ends.
pub fn crop_route_by_index(route: &[TrackPoint], duration: f64, start: f64, end: f64) -> Vec<TrackPoint> {
    let (first, last) = nearest_indices(route.len(), duration, start, end);
    route.get(first..=last).map(<[TrackPoint]>::to_vec).unwrap_or_default()
}

fn nearest_indices(len: usize, duration: f64, start: f64, end: f64) -> (usize, usize) {
    if len == 0 || duration <= 0.0 {
        return (0, 0);
    }
    let last = (len - 1) as f64;
    let index = |t: f64| ((t / duration * last).round().clamp(0.0, last)) as usize;
    (index(start), index(end))
}

fn crop_window<T: Clone>(
    items: &[T],
    start: f64,
    end: f64,
    time: impl Fn(&T) -> f64,
    interpolate: impl Fn(&T, &T, f64) -> T,
) -> Vec<T> {
    let mut out = Vec::new();
    for (k, item) in items.iter().enumerate() {
        let t = time(item);
        if k > 0 {
            let prev = &items[k - 1];
            let tp = time(prev);
            if tp < start && t > start {
                out.push(interpolate(prev, item, start));
            }
            if tp < end && t > end {
                out.push(interpolate(prev, item, end));
            }
        }
        if t >= start && t <= end {
            out.push(item.clone());
        }
    }
    out
}

fn lerp(a: f64, b: f64, fraction: f64) -> f64 {
    a + (b - a) * fraction
}

fn lerp_opt(a: Option<f64>, b: Option<f64>, fraction: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(lerp(a, b, fraction)),
        (a, b) => a.or(b),
    }
}

fn fraction(t0: f64, t1: f64, at: f64) -> f64 {
    if t1 > t0 {
        (at - t0) / (t1 - t0)
    } else {
        0.0
    }
}

/// Sensor readings hold their earlier value across the interval
fn interpolate_sample(before: &TimeSeriesPoint, after: &TimeSeriesPoint, at: f64) -> TimeSeriesPoint {
    let f = fraction(before.elapsed_seconds, after.elapsed_seconds, at);
    TimeSeriesPoint {
        elapsed_seconds: at,
        distance_m: lerp_opt(before.distance_m, after.distance_m, f),
        heart_rate_bpm: before.heart_rate_bpm,
        cadence: before.cadence,
        power: before.power,
        speed: lerp_opt(before.speed, after.speed, f),
        grade: before.grade,
        elevation: lerp_opt(before.elevation, after.elevation, f),
        temperature: lerp_opt(before.temperature, after.temperature, f),
    }
}

fn interpolate_point(
    before: &TrackPoint,
    after: &TrackPoint,
    origin: DateTime<Utc>,
    t0: f64,
    t1: f64,
    at: f64,
) -> TrackPoint {
    let f = fraction(t0, t1, at);
    let (latitude, longitude) = match (before.position(), after.position()) {
        (Some((lat0, lon0)), Some((lat1, lon1))) => (Some(lerp(lat0, lat1, f)), Some(lerp(lon0, lon1, f))),
        (Some((lat, lon)), None) | (None, Some((lat, lon))) => (Some(lat), Some(lon)),
        (None, None) => (None, None),
    };
    TrackPoint {
        timestamp: Some(origin + duration_from_seconds(at)),
        latitude,
        longitude,
        elevation: lerp_opt(before.elevation, after.elevation, f),
        heart_rate: before.heart_rate,
        cadence: before.cadence,
        power: before.power,
        temperature: lerp_opt(before.temperature, after.temperature, f),
        speed: lerp_opt(before.speed, after.speed, f),
        grade: before.grade,
        vertical_speed: before.vertical_speed,
    }
}

fn duration_from_seconds(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}
