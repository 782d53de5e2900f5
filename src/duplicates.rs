use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Session;

/// Distance tolerance in meters
pub const DISTANCE_TOLERANCE_M: f64 = 1.0;

/// Duration tolerance in seconds
pub const DURATION_TOLERANCE_S: f64 = 1.0;

/// Absorbs float noise so differences of exactly the tolerance still match
const EPSILON: f64 = 1e-9;

/// The facts two sessions are compared on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateKey {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub distance_m: f64,
    pub duration_s: f64,
}

impl DuplicateKey {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            started_at: session.stats.started_at,
            distance_m: session.stats.distance_m,
            duration_s: session.stats.duration_s,
        }
    }

    /// Same start second (UTC), distance within 1 m and duration within 1 s.
    /// Sessions without a start time never match.
    pub fn matches(&self, other: &DuplicateKey) -> bool {
        let same_start = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => a.timestamp() == b.timestamp(),
            _ => false,
        };
        same_start
            && (self.distance_m - other.distance_m).abs() <= DISTANCE_TOLERANCE_M + EPSILON
            && (self.duration_s - other.duration_s).abs() <= DURATION_TOLERANCE_S + EPSILON
    }
}

/// Duplicate detection against stored sessions and the current batch
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    known: Vec<DuplicateKey>,
}

impl DuplicateDetector {
    /// Seed with the keys of already persisted sessions
    pub fn new(existing: Vec<DuplicateKey>) -> Self {
        Self { known: existing }
    }

    /// The first known session the candidate duplicates, if any
    pub fn find_duplicate(&self, candidate: &DuplicateKey) -> Option<&DuplicateKey> {
        self.known.iter().find(|key| key.matches(candidate))
    }

    pub fn is_duplicate(&self, candidate: &DuplicateKey) -> bool {
        self.find_duplicate(candidate).is_some()
    }

    /// Record an accepted candidate so later files in the batch match it
    pub fn accept(&mut self, key: DuplicateKey) {
        self.known.push(key);
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
