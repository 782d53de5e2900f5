use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::import::Format;

/// One raw recorded position/sensor sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Absolute sample time (UTC)
    pub timestamp: Option<DateTime<Utc>>,

    /// Latitude in degrees
    pub latitude: Option<f64>,

    /// Longitude in degrees
    pub longitude: Option<f64>,

    /// Elevation in meters above sea level
    pub elevation: Option<f64>,

    /// Heart rate in beats per minute
    pub heart_rate: Option<u16>,

    /// Cadence in steps (or strides) per minute as recorded
    pub cadence: Option<u16>,

    /// Power output in watts
    pub power: Option<u16>,

    /// Temperature in degrees Celsius
    pub temperature: Option<f64>,

    /// Device-reported speed in meters per second
    pub speed: Option<f64>,

    /// Device-reported grade in percent
    pub grade: Option<f64>,

    /// Device-reported vertical speed in meters per second
    pub vertical_speed: Option<f64>,
}

impl TrackPoint {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    /// Both coordinates present
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// A point counts toward the two-point minimum if it is placed in space or time
    pub fn is_usable(&self) -> bool {
        self.position().is_some() || self.timestamp.is_some()
    }

    pub fn has_sensor_data(&self) -> bool {
        self.heart_rate.is_some()
            || self.cadence.is_some()
            || self.power.is_some()
            || self.temperature.is_some()
    }
}

/// Canonical time-ordered track produced by every format adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrack {
    pub points: Vec<TrackPoint>,

    /// Track name carried by the file, if any
    pub name: Option<String>,

    /// Activity type carried by the file, if any
    pub activity_type: Option<String>,
}

impl ParsedTrack {
    /// Build a track, enforcing the point-count and timestamp-order invariants
    pub fn new(points: Vec<TrackPoint>) -> Result<Self, ParseError> {
        crate::import::validation::TrackValidator::validate_points(&points)?;
        Ok(Self {
            points,
            name: None,
            activity_type: None,
        })
    }

    /// Every point carries a timestamp
    pub fn is_timed(&self) -> bool {
        is_timed(&self.points)
    }
}

/// Every point carries a timestamp
pub fn is_timed(points: &[TrackPoint]) -> bool {
    !points.is_empty() && points.iter().all(|p| p.timestamp.is_some())
}

/// Derived per-sample stream used for splits, best efforts and effort scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Seconds since the first sample
    pub elapsed_seconds: f64,

    /// Cumulative distance in meters (odometer)
    pub distance_m: Option<f64>,

    pub heart_rate_bpm: Option<u16>,
    pub cadence: Option<u16>,
    pub power: Option<u16>,

    /// Meters per second
    pub speed: Option<f64>,

    /// Percent
    pub grade: Option<f64>,

    pub elevation: Option<f64>,
    pub temperature: Option<f64>,
}

/// A fixed-distance segment of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    /// 1-based split number
    pub index: u32,
    pub distance_m: f64,
    pub duration_s: f64,

    /// Seconds per split length (s/km for metric splits, s/mi for imperial)
    pub pace_s: f64,

    pub elevation_delta: Option<f64>,
    pub avg_heart_rate: Option<u16>,
}

/// Fastest recorded time for one standard distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffortRecord {
    pub distance_label: String,
    pub target_distance_m: f64,
    pub achieved_time_s: f64,
    pub session_id: String,
    pub session_date: Option<DateTime<Utc>>,
}

/// One heart-rate zone, inclusive bounds in bpm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateZone {
    pub min: u16,
    pub max: u16,
}

/// Five contiguous heart-rate zones, zone 1 lowest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateZoneConfig {
    pub zones: [HeartRateZone; 5],
}

/// Unit preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    /// Split length in meters for this unit preference
    pub fn split_length_m(&self) -> f64 {
        match self {
            Units::Metric => 1000.0,
            Units::Imperial => 1609.34,
        }
    }
}

/// Activity-level metadata supplied alongside a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    pub activity_id: Option<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub activity_type: Option<String>,
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed time in seconds as reported by the export
    pub elapsed_time_s: Option<f64>,

    /// Path of the track file this row points to
    pub filename: Option<String>,

    pub media_paths: Vec<String>,
}

/// Original file as received; never mutated after import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSource {
    bytes: Vec<u8>,
    format: Format,
    filename: String,
    sha256: String,
}

impl RawSource {
    pub fn new(bytes: Vec<u8>, format: Format, filename: impl Into<String>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        Self {
            bytes,
            format,
            filename: filename.into(),
            sha256,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Hex SHA-256 of the original bytes
    pub fn fingerprint(&self) -> &str {
        &self.sha256
    }
}

/// Derived summary statistics of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_s: f64,
    pub distance_m: f64,

    /// Seconds per kilometer
    pub avg_pace_s: Option<f64>,

    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub min_elevation_m: Option<f64>,
    pub max_elevation_m: Option<f64>,

    pub avg_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,

    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub avg_cadence: Option<u16>,
    pub avg_power: Option<u16>,
    pub max_power: Option<u16>,
}

/// Lifecycle of a session with respect to edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Imported,
    Validating,
    Recomputing,
    Persisted,
}

/// Aggregate root: immutable raw source plus mutable derived state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    raw_source: RawSource,
    pub metadata: ActivityMetadata,

    /// Route points retained after any crop
    pub route: Vec<TrackPoint>,

    /// Present when the track carries timestamps and at least one sensor stream
    pub time_series: Option<Vec<TimeSeriesPoint>>,

    pub splits: Vec<Split>,
    pub stats: SessionStats,

    /// Opaque shoe reference assigned by an external collaborator
    pub shoe_id: Option<String>,

    pub relative_effort: Option<Decimal>,
    pub state: SessionState,
}

impl Session {
    pub fn new(id: impl Into<String>, raw_source: RawSource) -> Self {
        Self {
            id: id.into(),
            raw_source,
            metadata: ActivityMetadata::default(),
            route: Vec::new(),
            time_series: None,
            splits: Vec::new(),
            stats: SessionStats::default(),
            shoe_id: None,
            relative_effort: None,
            state: SessionState::Imported,
        }
    }

    pub fn raw_source(&self) -> &RawSource {
        &self.raw_source
    }

    pub fn display_name(&self) -> String {
        self.metadata
            .name
            .clone()
            .unwrap_or_else(|| self.raw_source.filename.clone())
    }
}
