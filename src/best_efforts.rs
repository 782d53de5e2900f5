//! Best-effort extraction over standard race distances
//!
//! For each target distance the extractor finds the fastest contiguous window
//! of a session whose distance span reaches the target, interpolating the
//! exact time at which the target is crossed. Records live in a
//! [`BestEffortRepository`]; a record is only replaced by a strictly faster
//! candidate. Full rebuilds require a [`RecalculationToken`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CalculationError, Result, StrideError};
use crate::geo::{seconds_between, GeoCalculator};
use crate::models::{is_timed, BestEffortRecord, Session};

/// A standard distance a best effort is tracked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDistance {
    pub label: String,
    pub meters: f64,
}

impl TargetDistance {
    pub fn new(label: impl Into<String>, meters: f64) -> Self {
        Self {
            label: label.into(),
            meters,
        }
    }
}

/// Standard targets, shortest first
pub fn standard_distances() -> Vec<TargetDistance> {
    [
        ("400m", 400.0),
        ("1/2 mile", 804.67),
        ("1K", 1000.0),
        ("1 mile", 1609.34),
        ("2 mile", 3218.69),
        ("5K", 5000.0),
        ("10K", 10000.0),
        ("15K", 15000.0),
        ("10 mile", 16093.4),
        ("20K", 20000.0),
        ("Half-Marathon", 21097.5),
        ("30K", 30000.0),
        ("Marathon", 42195.0),
    ]
    .into_iter()
    .map(|(label, meters)| TargetDistance::new(label, meters))
    .collect()
}

/// One point on a session's distance/time curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffortSample {
    pub elapsed_s: f64,
    pub distance_m: f64,
}

impl EffortSample {
    /// Distance/time curve of a session.
    ///
    /// Uses the time series when present, otherwise falls back to timestamped
    /// route points and their cumulative great-circle distance.
    pub fn from_session(session: &Session) -> std::result::Result<Option<Vec<EffortSample>>, CalculationError> {
        if let Some(series) = &session.time_series {
            let samples: Vec<EffortSample> = series
                .iter()
                .filter_map(|p| {
                    p.distance_m.map(|distance_m| EffortSample {
                        elapsed_s: p.elapsed_seconds,
                        distance_m,
                    })
                })
                .collect();
            if samples.len() >= 2 {
                return Ok(Some(samples));
            }
        }

        if !is_timed(&session.route) {
            return Ok(None);
        }
        let Some(start) = session.route.first().and_then(|p| p.timestamp) else {
            return Ok(None);
        };
        let cumulative = GeoCalculator::cumulative_distances(&session.route)?;
        let samples = session
            .route
            .iter()
            .zip(cumulative)
            .filter_map(|(point, distance_m)| {
                point.timestamp.map(|t| EffortSample {
                    elapsed_s: seconds_between(start, t),
                    distance_m,
                })
            })
            .collect();
        Ok(Some(samples))
    }
}

/// Fastest time found in one session for one target
#[derive(Debug, Clone, PartialEq)]
pub struct EffortCandidate {
    pub label: String,
    pub target_m: f64,
    pub time_s: f64,
}

/// Fastest window per target over one distance/time curve.
///
/// Single pass over window starts `i`; each target keeps its own right
/// pointer which only ever moves forward, so the scan is O(n * k).
/// Targets the curve never reaches produce no candidate.
pub fn fastest_windows(samples: &[EffortSample], targets: &[TargetDistance]) -> Vec<EffortCandidate> {
    let Some(last) = samples.last() else {
        return Vec::new();
    };
    let total = last.distance_m;

    let mut ends = vec![0usize; targets.len()];
    let mut best: Vec<Option<f64>> = vec![None; targets.len()];

    for (i, start) in samples.iter().enumerate() {
        for (t, target) in targets.iter().enumerate() {
            let goal = start.distance_m + target.meters;
            if total < goal {
                continue;
            }

            let j = &mut ends[t];
            if *j <= i {
                *j = i + 1;
            }
            while samples[*j].distance_m < goal {
                *j += 1;
            }

            let (before, after) = (&samples[*j - 1], &samples[*j]);
            let span = after.distance_m - before.distance_m;
            let end_time = if span > 0.0 {
                before.elapsed_s + (goal - before.distance_m) / span * (after.elapsed_s - before.elapsed_s)
            } else {
                after.elapsed_s
            };

            let time = end_time - start.elapsed_s;
            if best[t].map_or(true, |current| time < current) {
                best[t] = Some(time);
            }
        }
    }

    targets
        .iter()
        .zip(best)
        .filter_map(|(target, time)| {
            time.map(|time_s| EffortCandidate {
                label: target.label.clone(),
                target_m: target.meters,
                time_s,
            })
        })
        .collect()
}

/// Storage of the best-effort leaderboard, one record per target label
pub trait BestEffortRepository {
    fn get(&self, label: &str) -> Result<Option<BestEffortRecord>>;

    fn upsert(&mut self, record: BestEffortRecord) -> Result<()>;

    /// Remove a record; returns whether one existed
    fn remove(&mut self, label: &str) -> Result<bool>;

    /// All records, shortest target first
    fn all(&self) -> Result<Vec<BestEffortRecord>>;

    /// Drop every record. Only a full recalculation may do this.
    fn clear(&mut self, token: &RecalculationToken) -> Result<()>;
}

impl BestEffortRepository for BTreeMap<String, BestEffortRecord> {
    fn get(&self, label: &str) -> Result<Option<BestEffortRecord>> {
        Ok(BTreeMap::get(self, label).cloned())
    }

    fn upsert(&mut self, record: BestEffortRecord) -> Result<()> {
        self.insert(record.distance_label.clone(), record);
        Ok(())
    }

    fn remove(&mut self, label: &str) -> Result<bool> {
        Ok(BTreeMap::remove(self, label).is_some())
    }

    fn all(&self) -> Result<Vec<BestEffortRecord>> {
        let mut records: Vec<BestEffortRecord> = self.values().cloned().collect();
        records.sort_by(|a, b| a.target_distance_m.total_cmp(&b.target_distance_m));
        Ok(records)
    }

    fn clear(&mut self, _token: &RecalculationToken) -> Result<()> {
        BTreeMap::clear(self);
        Ok(())
    }
}

/// Grants exclusive access for full recalculations.
///
/// Clones share the same flag, so every service over one leaderboard must
/// hold a clone of the same lock.
#[derive(Debug, Clone, Default)]
pub struct RecalculationLock {
    held: Arc<AtomicBool>,
}

impl RecalculationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the token, failing if another recalculation holds it
    pub fn acquire(&self) -> Result<RecalculationToken> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StrideError::RecalculationInProgress)?;
        Ok(RecalculationToken {
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of exclusive access; released on drop
#[derive(Debug)]
pub struct RecalculationToken {
    held: Arc<AtomicBool>,
}

impl Drop for RecalculationToken {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Outcome of a full leaderboard rebuild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalculationSummary {
    /// Records on the leaderboard after the rebuild
    pub count: usize,
    pub sessions_scanned: usize,
    /// Per-session failures; the scan continues past them
    pub errors: Vec<String>,
}

/// Extracts candidates from sessions and maintains the leaderboard
#[derive(Debug, Clone)]
pub struct BestEffortExtractor {
    targets: Vec<TargetDistance>,
}

impl Default for BestEffortExtractor {
    fn default() -> Self {
        Self {
            targets: standard_distances(),
        }
    }
}

impl BestEffortExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom targets; each must be a positive finite distance
    pub fn with_targets(mut targets: Vec<TargetDistance>) -> std::result::Result<Self, CalculationError> {
        if let Some(bad) = targets.iter().find(|t| !t.meters.is_finite() || t.meters <= 0.0) {
            return Err(CalculationError::InvalidParameter {
                parameter: format!("target {}", bad.label),
                value: bad.meters.to_string(),
            });
        }
        targets.sort_by(|a, b| a.meters.total_cmp(&b.meters));
        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[TargetDistance] {
        &self.targets
    }

    /// Candidate record for every target the session reaches
    pub fn candidates(&self, session: &Session) -> std::result::Result<Vec<BestEffortRecord>, CalculationError> {
        let Some(samples) = EffortSample::from_session(session)? else {
            return Ok(Vec::new());
        };
        Ok(fastest_windows(&samples, &self.targets)
            .into_iter()
            .map(|c| BestEffortRecord {
                distance_label: c.label,
                target_distance_m: c.target_m,
                achieved_time_s: c.time_s,
                session_id: session.id.clone(),
                session_date: session.stats.started_at,
            })
            .collect())
    }

    /// Offer candidates to the leaderboard; ties keep the existing record.
    /// Returns the records that were stored.
    pub fn offer<R: BestEffortRepository + ?Sized>(
        &self,
        repo: &mut R,
        candidates: Vec<BestEffortRecord>,
    ) -> Result<Vec<BestEffortRecord>> {
        let mut stored = Vec::new();
        for candidate in candidates {
            if let Some(existing) = repo.get(&candidate.distance_label)? {
                if existing.achieved_time_s <= candidate.achieved_time_s {
                    continue;
                }
                info!(
                    distance = %candidate.distance_label,
                    previous_s = existing.achieved_time_s,
                    new_s = candidate.achieved_time_s,
                    session_id = %candidate.session_id,
                    "New best effort"
                );
            } else {
                info!(
                    distance = %candidate.distance_label,
                    time_s = candidate.achieved_time_s,
                    session_id = %candidate.session_id,
                    "First best effort"
                );
            }
            repo.upsert(candidate.clone())?;
            stored.push(candidate);
        }
        Ok(stored)
    }

    /// Extract a session's candidates and offer them
    pub fn apply_session<R: BestEffortRepository + ?Sized>(
        &self,
        repo: &mut R,
        session: &Session,
    ) -> Result<Vec<BestEffortRecord>> {
        let candidates = self.candidates(session)?;
        self.offer(repo, candidates)
    }

    /// Discard every record and rebuild from the given sessions, which the
    /// caller supplies oldest first so ties keep the earlier session.
    pub fn rebuild<R, I>(&self, repo: &mut R, token: &RecalculationToken, sessions: I) -> Result<RecalculationSummary>
    where
        R: BestEffortRepository + ?Sized,
        I: IntoIterator<Item = (String, Result<Session>)>,
    {
        let scanned = sessions
            .into_iter()
            .map(|(id, loaded)| (id, loaded.and_then(|s| Ok(self.candidates(&s)?))));
        self.rebuild_from_candidates(repo, token, scanned)
    }

    /// Rebuild from candidates already extracted per session, oldest first
    pub fn rebuild_from_candidates<R, I>(
        &self,
        repo: &mut R,
        token: &RecalculationToken,
        scanned: I,
    ) -> Result<RecalculationSummary>
    where
        R: BestEffortRepository + ?Sized,
        I: IntoIterator<Item = (String, Result<Vec<BestEffortRecord>>)>,
    {
        repo.clear(token)?;

        let mut summary = RecalculationSummary::default();
        for (id, candidates) in scanned {
            summary.sessions_scanned += 1;
            if let Err(e) = candidates.and_then(|c| self.offer(repo, c)) {
                warn!(session_id = %id, error = %e, "Skipping session during best-effort rebuild");
                summary.errors.push(format!("{}: {}", id, e));
            }
        }

        summary.count = repo.all()?.len();
        info!(
            records = summary.count,
            sessions = summary.sessions_scanned,
            errors = summary.errors.len(),
            "Best-effort rebuild finished"
        );
        Ok(summary)
    }

    /// Recompute the given targets from a corpus after their record holder
    /// was removed or changed. Existing records for these labels are dropped
    /// first.
    pub fn restore_targets<R, I>(&self, repo: &mut R, labels: &[String], sessions: I) -> Result<usize>
    where
        R: BestEffortRepository + ?Sized,
        I: IntoIterator<Item = (String, Result<Session>)>,
    {
        let scanned = sessions
            .into_iter()
            .map(|(id, loaded)| (id, loaded.and_then(|s| Ok(self.candidates(&s)?))));
        self.restore_from_candidates(repo, labels, scanned)
    }

    /// Restore targets from candidates already extracted per session
    pub fn restore_from_candidates<R, I>(&self, repo: &mut R, labels: &[String], scanned: I) -> Result<usize>
    where
        R: BestEffortRepository + ?Sized,
        I: IntoIterator<Item = (String, Result<Vec<BestEffortRecord>>)>,
    {
        if labels.is_empty() {
            return Ok(0);
        }
        for label in labels {
            repo.remove(label)?;
        }

        for (id, candidates) in scanned {
            let offered = candidates.and_then(|c| {
                let wanted = c.into_iter().filter(|r| labels.contains(&r.distance_label)).collect();
                self.offer(repo, wanted)
            });
            if let Err(e) = offered {
                warn!(session_id = %id, error = %e, "Skipping session while restoring best efforts");
            }
        }

        let restored = labels
            .iter()
            .map(|label| repo.get(label))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .count();
        debug!(labels = ?labels, restored, "Restored best-effort targets");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::Format;
    use crate::models::{RawSource, TimeSeriesPoint, TrackPoint};
    use chrono::{Duration, TimeZone, Utc};

    const M_PER_DEG: f64 = 6_371_000.0 * std::f64::consts::PI / 180.0;

    fn constant_pace(total_m: f64, step_m: f64, seconds_per_m: f64) -> Vec<EffortSample> {
        let mut samples = Vec::new();
        let mut d = 0.0;
        while d < total_m {
            samples.push(EffortSample {
                elapsed_s: d * seconds_per_m,
                distance_m: d,
            });
            d += step_m;
        }
        samples.push(EffortSample {
            elapsed_s: total_m * seconds_per_m,
            distance_m: total_m,
        });
        samples
    }

    fn session_from_samples(id: &str, day: u32, samples: &[EffortSample]) -> Session {
        let mut session = Session::new(id, RawSource::new(id.as_bytes().to_vec(), Format::Trackpoint, "t.gpx"));
        session.stats.started_at = Some(Utc.with_ymd_and_hms(2024, 1, day, 7, 0, 0).unwrap());
        session.time_series = Some(
            samples
                .iter()
                .map(|s| TimeSeriesPoint {
                    elapsed_seconds: s.elapsed_s,
                    distance_m: Some(s.distance_m),
                    heart_rate_bpm: Some(150),
                    ..Default::default()
                })
                .collect(),
        );
        session
    }

    fn find<'a>(candidates: &'a [EffortCandidate], label: &str) -> Option<&'a EffortCandidate> {
        candidates.iter().find(|c| c.label == label)
    }

    #[test]
    fn test_constant_pace_10k() {
        // 10 km in 3000 s, irregular 7 m sampling
        let samples = constant_pace(10_000.0, 7.0, 0.3);
        let candidates = fastest_windows(&samples, &standard_distances());

        assert!((find(&candidates, "5K").unwrap().time_s - 1500.0).abs() < 1e-6);
        assert!((find(&candidates, "10K").unwrap().time_s - 3000.0).abs() < 1e-6);
        assert!((find(&candidates, "1 mile").unwrap().time_s - 1609.34 * 0.3).abs() < 1e-6);
        assert!(find(&candidates, "15K").is_none());
        assert!(find(&candidates, "Marathon").is_none());
    }

    #[test]
    fn test_end_time_is_interpolated() {
        let samples = [
            EffortSample { elapsed_s: 0.0, distance_m: 0.0 },
            EffortSample { elapsed_s: 300.0, distance_m: 1000.0 },
        ];
        let candidates = fastest_windows(&samples, &[TargetDistance::new("400m", 400.0)]);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].time_s - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_finds_fast_segment_in_the_middle() {
        // 1 km easy at 6:00/km, 1 km hard at 3:30/km, 1 km easy
        let samples: Vec<EffortSample> = [
            (0.0, 0.0),
            (180.0, 500.0),
            (360.0, 1000.0),
            (465.0, 1500.0),
            (570.0, 2000.0),
            (750.0, 2500.0),
            (930.0, 3000.0),
        ]
        .iter()
        .map(|&(elapsed_s, distance_m)| EffortSample { elapsed_s, distance_m })
        .collect();

        let candidates = fastest_windows(&samples, &[TargetDistance::new("1K", 1000.0)]);
        assert!((candidates[0].time_s - 210.0).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_samples_are_handled() {
        let samples = [
            EffortSample { elapsed_s: 0.0, distance_m: 0.0 },
            EffortSample { elapsed_s: 60.0, distance_m: 0.0 },
            EffortSample { elapsed_s: 120.0, distance_m: 400.0 },
            EffortSample { elapsed_s: 180.0, distance_m: 400.0 },
        ];
        let candidates = fastest_windows(&samples, &[TargetDistance::new("400m", 400.0)]);
        assert!((candidates[0].time_s - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_short_input() {
        assert!(fastest_windows(&[], &standard_distances()).is_empty());
        let samples = constant_pace(300.0, 10.0, 0.3);
        assert!(fastest_windows(&samples, &standard_distances()).is_empty());
    }

    #[test]
    fn test_route_fallback_without_time_series() {
        let start = Utc.with_ymd_and_hms(2024, 1, 5, 7, 0, 0).unwrap();
        let mut session = Session::new("route", RawSource::new(vec![1], Format::Trackpoint, "r.gpx"));
        session.route = (0..=60)
            .map(|i| TrackPoint {
                timestamp: Some(start + Duration::seconds(i * 30)),
                ..TrackPoint::at(45.0 + i as f64 * 100.0 / M_PER_DEG, 7.0)
            })
            .collect();

        let records = BestEffortExtractor::new().candidates(&session).unwrap();
        let five_k = records.iter().find(|r| r.distance_label == "5K").unwrap();
        assert!((five_k.achieved_time_s - 1500.0).abs() < 1e-3);
        assert_eq!(five_k.session_id, "route");

        session.route.iter_mut().for_each(|p| p.timestamp = None);
        assert!(BestEffortExtractor::new().candidates(&session).unwrap().is_empty());
    }

    #[test]
    fn test_only_strictly_faster_replaces() {
        let extractor = BestEffortExtractor::with_targets(vec![TargetDistance::new("5K", 5000.0)]).unwrap();
        let mut repo: BTreeMap<String, BestEffortRecord> = BTreeMap::new();

        let first = session_from_samples("first", 1, &constant_pace(5000.0, 10.0, 0.3));
        let tie = session_from_samples("tie", 2, &constant_pace(5000.0, 10.0, 0.3));
        let faster = session_from_samples("faster", 3, &constant_pace(5000.0, 10.0, 0.29));

        assert_eq!(extractor.apply_session(&mut repo, &first).unwrap().len(), 1);
        assert!(extractor.apply_session(&mut repo, &tie).unwrap().is_empty());
        assert_eq!(BestEffortRepository::get(&repo, "5K").unwrap().unwrap().session_id, "first");

        extractor.apply_session(&mut repo, &faster).unwrap();
        let record = BestEffortRepository::get(&repo, "5K").unwrap().unwrap();
        assert_eq!(record.session_id, "faster");
        assert_eq!(record.session_date, faster.stats.started_at);
    }

    #[test]
    fn test_rebuild_discards_stale_records() {
        let extractor = BestEffortExtractor::new();
        let lock = RecalculationLock::new();
        let mut repo: BTreeMap<String, BestEffortRecord> = BTreeMap::new();
        repo.upsert(BestEffortRecord {
            distance_label: "Marathon".to_string(),
            target_distance_m: 42195.0,
            achieved_time_s: 9000.0,
            session_id: "deleted".to_string(),
            session_date: None,
        })
        .unwrap();

        let sessions = vec![
            ("a".to_string(), Ok(session_from_samples("a", 1, &constant_pace(5000.0, 10.0, 0.3)))),
            ("broken".to_string(), Err(StrideError::SessionNotFound { id: "broken".to_string() })),
            ("b".to_string(), Ok(session_from_samples("b", 2, &constant_pace(3000.0, 10.0, 0.25)))),
        ];

        let token = lock.acquire().unwrap();
        let summary = extractor.rebuild(&mut repo, &token, sessions).unwrap();

        assert_eq!(summary.sessions_scanned, 3);
        assert_eq!(summary.errors.len(), 1);
        assert!(BestEffortRepository::get(&repo, "Marathon").unwrap().is_none());
        assert_eq!(BestEffortRepository::get(&repo, "5K").unwrap().unwrap().session_id, "a");
        assert_eq!(BestEffortRepository::get(&repo, "1K").unwrap().unwrap().session_id, "b");
        assert_eq!(summary.count, repo.all().unwrap().len());

        let labels: Vec<String> = repo.all().unwrap().into_iter().map(|r| r.distance_label).collect();
        assert_eq!(labels.first().map(String::as_str), Some("400m"));
        assert_eq!(labels.last().map(String::as_str), Some("5K"));
    }

    #[test]
    fn test_restore_targets_after_delete() {
        let extractor = BestEffortExtractor::new();
        let mut repo: BTreeMap<String, BestEffortRecord> = BTreeMap::new();
        let slow = session_from_samples("slow", 1, &constant_pace(5000.0, 10.0, 0.3));
        let fast = session_from_samples("fast", 2, &constant_pace(5000.0, 10.0, 0.2));
        extractor.apply_session(&mut repo, &slow).unwrap();
        extractor.apply_session(&mut repo, &fast).unwrap();

        let labels: Vec<String> = repo
            .all()
            .unwrap()
            .into_iter()
            .filter(|r| r.session_id == "fast")
            .map(|r| r.distance_label)
            .collect();
        let restored = extractor
            .restore_targets(&mut repo, &labels, vec![("slow".to_string(), Ok(slow.clone()))])
            .unwrap();

        assert_eq!(restored, labels.len());
        assert!(repo.all().unwrap().iter().all(|r| r.session_id == "slow"));
    }

    #[test]
    fn test_recalculation_is_exclusive() {
        let lock = RecalculationLock::new();
        let token = lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(matches!(lock.clone().acquire(), Err(StrideError::RecalculationInProgress)));
        drop(token);
        assert!(!lock.is_held());
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn test_invalid_targets() {
        assert!(BestEffortExtractor::with_targets(vec![TargetDistance::new("zero", 0.0)]).is_err());
        assert!(BestEffortExtractor::with_targets(vec![TargetDistance::new("nan", f64::NAN)]).is_err());
    }
}
