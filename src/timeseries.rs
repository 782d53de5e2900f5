//! Time series and fixed-distance splits
//!
//! Both are pure functions of their input: rebuilding with another split
//! length never touches the route they were derived from.

use crate::error::CalculationError;
use crate::geo::{seconds_between, GeoCalculator, GeoConfig};
use crate::models::{is_timed, Split, TimeSeriesPoint, TrackPoint};

/// Remainders shorter than this are coordinate and float residue; they are
/// folded into the last full split instead of forming a split of their own
const MIN_FINAL_SPLIT_M: f64 = 0.01;

/// One point on the distance/time curve used for cutting splits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSample {
    pub elapsed_s: f64,
    pub distance_m: f64,
    pub elevation: Option<f64>,
    pub heart_rate: Option<u16>,
}

impl From<&TimeSeriesPoint> for SplitSample {
    fn from(point: &TimeSeriesPoint) -> Self {
        Self {
            elapsed_s: point.elapsed_seconds,
            distance_m: point.distance_m.unwrap_or(0.0),
            elevation: point.elevation,
            heart_rate: point.heart_rate_bpm,
        }
    }
}

/// Builds the per-sample stream and splits from a route
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesBuilder {
    geo: GeoCalculator,
}

impl TimeSeriesBuilder {
    pub fn new(config: GeoConfig) -> Self {
        Self {
            geo: GeoCalculator::new(config),
        }
    }

    /// Time series for a fully timed route carrying at least one sensor stream
    pub fn build(&self, route: &[TrackPoint]) -> Result<Option<Vec<TimeSeriesPoint>>, CalculationError> {
        if !is_timed(route) || !route.iter().any(TrackPoint::has_sensor_data) {
            return Ok(None);
        }

        let cumulative = GeoCalculator::cumulative_distances(route)?;
        let Some(start) = route.first().and_then(|p| p.timestamp) else {
            return Ok(None);
        };

        let mut series = Vec::with_capacity(route.len());
        let mut last_elevation: Option<(f64, f64)> = None;

        for (i, point) in route.iter().enumerate() {
            let elapsed = point.timestamp.map(|t| seconds_between(start, t)).unwrap_or(0.0);

            let speed = match point.speed {
                Some(speed) => Some(speed),
                None if i > 0 => {
                    let prev_elapsed = series
                        .last()
                        .map(|p: &TimeSeriesPoint| p.elapsed_seconds)
                        .unwrap_or(0.0);
                    GeoCalculator::speed(cumulative[i] - cumulative[i - 1], elapsed - prev_elapsed)?
                }
                None => None,
            };

            let grade = match (point.grade, point.elevation) {
                (Some(grade), _) => Some(grade),
                (None, Some(elevation)) => {
                    let grade = match last_elevation {
                        Some((prev_elevation, prev_distance)) => self
                            .geo
                            .grade(elevation - prev_elevation, cumulative[i] - prev_distance)?,
                        None => None,
                    };
                    last_elevation = Some((elevation, cumulative[i]));
                    grade
                }
                (None, None) => None,
            };

            series.push(TimeSeriesPoint {
                elapsed_seconds: elapsed,
                distance_m: Some(cumulative[i]),
                heart_rate_bpm: point.heart_rate,
                cadence: point.cadence,
                power: point.power,
                speed,
                grade,
                elevation: point.elevation,
                temperature: point.temperature,
            });
        }

        Ok(Some(series))
    }

    /// Splits over a time series
    pub fn splits_from_series(
        series: &[TimeSeriesPoint],
        split_length_m: f64,
    ) -> Result<Vec<Split>, CalculationError> {
        let samples: Vec<SplitSample> = series.iter().map(SplitSample::from).collect();
        build_splits(&samples, split_length_m)
    }

    /// Splits over route points. Untimed routes are spread evenly by point
    /// index across `duration_s`; without either no splits can be timed.
    pub fn splits_from_route(
        route: &[TrackPoint],
        duration_s: f64,
        split_length_m: f64,
    ) -> Result<Vec<Split>, CalculationError> {
        let Some(elapsed) = elapsed_axis(route, duration_s) else {
            return Ok(Vec::new());
        };
        let cumulative = GeoCalculator::cumulative_distances(route)?;

        let samples: Vec<SplitSample> = route
            .iter()
            .zip(elapsed)
            .zip(cumulative)
            .map(|((point, elapsed_s), distance_m)| SplitSample {
                elapsed_s,
                distance_m,
                elevation: point.elevation,
                heart_rate: point.heart_rate,
            })
            .collect();
        build_splits(&samples, split_length_m)
    }
}

/// Seconds since the start for every route point.
///
/// Timed routes use their timestamps. Untimed routes place point `i` of `n`
/// at `duration_s * i / (n - 1)`. Returns `None` when neither is available.
pub fn elapsed_axis(route: &[TrackPoint], duration_s: f64) -> Option<Vec<f64>> {
    if is_timed(route) {
        let start = route.first()?.timestamp?;
        return route
            .iter()
            .map(|p| p.timestamp.map(|t| seconds_between(start, t)))
            .collect();
    }

    if route.len() < 2 || !duration_s.is_finite() || duration_s <= 0.0 {
        return None;
    }
    let last = (route.len() - 1) as f64;
    Some((0..route.len()).map(|i| duration_s * i as f64 / last).collect())
}

/// Cut a distance/time curve into fixed-length splits.
///
/// Boundary times are interpolated linearly between the two samples that
/// straddle each boundary. Boundaries are measured from the first sample's
/// distance. The final partial segment is kept unless it is shorter than
/// `MIN_FINAL_SPLIT_M`, in which case it extends the last full split.
pub fn build_splits(samples: &[SplitSample], split_length_m: f64) -> Result<Vec<Split>, CalculationError> {
    if !split_length_m.is_finite() || split_length_m <= 0.0 {
        return Err(CalculationError::InvalidParameter {
            parameter: "split_length_m".to_string(),
            value: split_length_m.to_string(),
        });
    }
    let Some(first) = samples.first() else {
        return Ok(Vec::new());
    };

    let origin_m = first.distance_m;
    let mut splits: Vec<Split> = Vec::new();
    let mut start = Boundary {
        elapsed_s: first.elapsed_s,
        distance_m: first.distance_m,
        elevation: first_elevation(samples),
    };
    let mut hr = HeartRateAccumulator::default();
    hr.add(first.heart_rate);

    for pair in samples.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);

        loop {
            let target = origin_m + split_length_m * (splits.len() + 1) as f64;
            if next.distance_m < target {
                break;
            }
            let end = Boundary::interpolate(prev, next, target).with_fallback_elevation(start.elevation);
            splits.push(make_split(splits.len(), &start, &end, split_length_m, hr.take()));
            start = end;
        }

        hr.add(next.heart_rate);
    }

    if let Some(last) = samples.last() {
        let end = Boundary {
            elapsed_s: last.elapsed_s,
            distance_m: last.distance_m,
            elevation: last.elevation.or(start.elevation),
        };
        let residual_m = end.distance_m - start.distance_m;
        if residual_m > MIN_FINAL_SPLIT_M || (splits.is_empty() && residual_m > 0.0) {
            splits.push(make_split(splits.len(), &start, &end, split_length_m, hr.take()));
        } else if let Some(previous) = splits.last_mut() {
            extend_split(previous, &start, &end, split_length_m);
        }
    }

    Ok(splits)
}

#[derive(Debug, Clone, Copy)]
struct Boundary {
    elapsed_s: f64,
    distance_m: f64,
    elevation: Option<f64>,
}

impl Boundary {
    fn interpolate(prev: &SplitSample, next: &SplitSample, distance_m: f64) -> Self {
        let span = next.distance_m - prev.distance_m;
        let fraction = if span > 0.0 {
            (distance_m - prev.distance_m) / span
        } else {
            1.0
        };
        let elevation = match (prev.elevation, next.elevation) {
            (Some(a), Some(b)) => Some(a + (b - a) * fraction),
            (a, b) => b.or(a),
        };
        Self {
            elapsed_s: prev.elapsed_s + (next.elapsed_s - prev.elapsed_s) * fraction,
            distance_m,
            elevation,
        }
    }

    fn with_fallback_elevation(mut self, elevation: Option<f64>) -> Self {
        self.elevation = self.elevation.or(elevation);
        self
    }
}

fn first_elevation(samples: &[SplitSample]) -> Option<f64> {
    samples.iter().find_map(|s| s.elevation)
}

fn make_split(
    position: usize,
    start: &Boundary,
    end: &Boundary,
    split_length_m: f64,
    avg_heart_rate: Option<u16>,
) -> Split {
    let distance_m = end.distance_m - start.distance_m;
    let duration_s = end.elapsed_s - start.elapsed_s;
    let pace_s = if distance_m > 0.0 {
        duration_s * split_length_m / distance_m
    } else {
        0.0
    };
    Split {
        index: position as u32 + 1,
        distance_m,
        duration_s,
        pace_s,
        elevation_delta: match (start.elevation, end.elevation) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        },
        avg_heart_rate,
    }
}

/// Append the segment `start..end` to an already cut split
fn extend_split(split: &mut Split, start: &Boundary, end: &Boundary, split_length_m: f64) {
    split.distance_m += end.distance_m - start.distance_m;
    split.duration_s += end.elapsed_s - start.elapsed_s;
    if split.distance_m > 0.0 {
        split.pace_s = split.duration_s * split_length_m / split.distance_m;
    }
    if let (Some(delta), Some(a), Some(b)) = (split.elevation_delta, start.elevation, end.elevation) {
        split.elevation_delta = Some(delta + (b - a));
    }
}

#[derive(Default)]
struct HeartRateAccumulator {
    sum: u64,
    count: u64,
}

impl HeartRateAccumulator {
    fn add(&mut self, hr: Option<u16>) {
        if let Some(hr) = hr {
            self.sum += u64::from(hr);
            self.count += 1;
        }
    }

    fn take(&mut self) -> Option<u16> {
        let avg = (self.count > 0).then(|| (self.sum as f64 / self.count as f64).round() as u16);
        *self = Self::default();
        avg
    }
}
