//! Core-facing operations: import, bulk import, recalculation, crop
//!
//! Each call is one synchronous unit of work against the injected store.
//! Zone configuration and every calculator are held explicitly here and
//! passed down; nothing reads process-wide state.

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::best_efforts::{BestEffortExtractor, BestEffortRepository, RecalculationLock, RecalculationSummary};
use crate::config::AppConfig;
use crate::crop::CropOrchestrator;
use crate::derive::{DerivationHints, SessionDeriver};
use crate::duplicates::{DuplicateDetector, DuplicateKey};
use crate::error::{Result, StrideError};
use crate::import::batch::{BatchConfig, BatchImporter, BulkImportSummary, ImportFile};
use crate::import::csv::MetadataTable;
use crate::import::logging::{ImportLogger, OperationType};
use crate::import::{ensure_run_activity, Format};
use crate::models::{is_timed, ActivityMetadata, BestEffortRecord, HeartRateZoneConfig, RawSource, Session, SessionState};
use crate::store::{require_session, SessionStore};
use crate::zones::ZoneCalculator;

/// Sessions loaded per rescoring round
const RESCORE_CHUNK: usize = 64;

/// Result of importing one track
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Imported { session: Session, warnings: Vec<String> },
    /// Matched a stored session; nothing was written
    Duplicate { existing_id: String },
}

/// Outcome of re-scoring every session under a new zone configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelativeEffortSummary {
    /// Sessions whose stored score changed
    pub updated_count: usize,
    pub sessions_scanned: usize,
    pub errors: Vec<String>,
}

/// Bulk import result with its audit trail
pub struct BulkImportReport {
    pub summary: BulkImportSummary,
    pub audit: ImportLogger,
}

/// Per-session candidates gathered from the store, oldest session first
type CandidateScan = Vec<(String, Result<Vec<BestEffortRecord>>)>;

pub struct SessionService<S> {
    store: S,
    deriver: SessionDeriver,
    extractor: BestEffortExtractor,
    lock: RecalculationLock,
    batch: BatchConfig,
}

impl<S: SessionStore + BestEffortRepository> SessionService<S> {
    pub fn new(store: S, deriver: SessionDeriver) -> Self {
        Self {
            store,
            deriver,
            extractor: BestEffortExtractor::default(),
            lock: RecalculationLock::new(),
            batch: BatchConfig::default(),
        }
    }

    pub fn from_config(store: S, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(store, config.deriver()?).with_batch_config(config.import.clone()))
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_extractor(mut self, extractor: BestEffortExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Share a leaderboard lock with other services over the same store
    pub fn with_lock(mut self, lock: RecalculationLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn deriver(&self) -> &SessionDeriver {
        &self.deriver
    }

    pub fn lock(&self) -> &RecalculationLock {
        &self.lock
    }

    pub fn session(&self, id: &str) -> Result<Session> {
        require_session(&self.store, id)
    }

    /// All sessions, oldest first
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.store
            .session_ids()?
            .iter()
            .map(|id| require_session(&self.store, id))
            .collect()
    }

    pub fn best_efforts(&self) -> Result<Vec<BestEffortRecord>> {
        self.store.all()
    }

    /// Parse, derive, check for duplicates, persist and offer best efforts
    pub fn import_track(&mut self, bytes: Vec<u8>, filename: &str, format_hint: Option<&str>) -> Result<ImportOutcome> {
        self.import_track_with_metadata(bytes, filename, format_hint, None)
    }

    pub fn import_track_with_metadata(
        &mut self,
        bytes: Vec<u8>,
        filename: &str,
        format_hint: Option<&str>,
        metadata: Option<&ActivityMetadata>,
    ) -> Result<ImportOutcome> {
        let (mut session, mut warnings) = self.build_session(bytes, filename, format_hint, metadata)?;

        let detector = DuplicateDetector::new(self.store.duplicate_keys()?);
        if let Some(original) = detector.find_duplicate(&DuplicateKey::from_session(&session)) {
            warn!(file = filename, existing = %original.session_id, "Skipping duplicate session");
            return Ok(ImportOutcome::Duplicate {
                existing_id: original.session_id.clone(),
            });
        }

        session.state = SessionState::Persisted;
        self.store.save_session(&session)?;

        // The session is committed at this point; a stale leaderboard is
        // repaired by the next full recalculation
        if let Err(e) = self.extractor.apply_session(&mut self.store, &session) {
            warn!(session_id = %session.id, file = filename, error = %e, "Best efforts not updated");
            warnings.push(format!("best efforts not updated: {}", e));
        }

        info!(
            session_id = %session.id,
            file = filename,
            distance_m = session.stats.distance_m,
            duration_s = session.stats.duration_s,
            "Imported session"
        );
        Ok(ImportOutcome::Imported { session, warnings })
    }

    /// Import a batch with the configured bounds
    pub fn bulk_import(&mut self, files: &[ImportFile], metadata: &MetadataTable) -> Result<BulkImportSummary> {
        let importer = BatchImporter::new(self.batch.clone());
        Ok(self.bulk_import_with(&importer, files, metadata)?.summary)
    }

    /// Derive every file, then commit the accepted sessions in one write
    pub fn bulk_import_with(
        &mut self,
        importer: &BatchImporter,
        files: &[ImportFile],
        metadata: &MetadataTable,
    ) -> Result<BulkImportReport> {
        importer.check_size(files.len())?;

        let existing = self.store.duplicate_keys()?;
        let result = importer.run(files, metadata, existing, |file, row| {
            self.build_session(file.bytes.clone(), &file.filename, file.format_hint.as_deref(), row)
                .map(|(session, _)| session)
        });
        let (mut sessions, summary, mut audit) = (result.sessions, result.summary, result.audit);

        for warning in &metadata.warnings {
            audit.log_warning(OperationType::Import, None, warning.as_str());
        }

        if summary.cancelled || sessions.is_empty() {
            return Ok(BulkImportReport { summary, audit });
        }

        for session in &mut sessions {
            session.state = SessionState::Persisted;
        }
        self.store.save_sessions(&sessions)?;
        audit.log_committed(sessions.len());

        sessions.sort_by(|a, b| a.stats.started_at.cmp(&b.stats.started_at));
        for session in &sessions {
            if let Err(e) = self.extractor.apply_session(&mut self.store, session) {
                audit.log_warning(
                    OperationType::Storage,
                    Some(session.raw_source().filename()),
                    format!("best efforts not updated: {}", e),
                );
            }
        }

        Ok(BulkImportReport { summary, audit })
    }

    /// Rebuild the leaderboard from every stored session
    pub fn recalculate_best_efforts(&mut self) -> Result<RecalculationSummary> {
        let token = self.lock.acquire()?;
        let scanned = self.scan_candidates()?;
        self.extractor.rebuild_from_candidates(&mut self.store, &token, scanned)
    }

    /// Adopt a new zone configuration and re-score every session
    pub fn recalculate_relative_effort(&mut self, zones: HeartRateZoneConfig) -> Result<RelativeEffortSummary> {
        ZoneCalculator::validate(&zones).map_err(|e| StrideError::Configuration(e.to_string()))?;
        self.deriver.set_zones(zones);

        let ids = self.store.session_ids()?;
        let mut summary = RelativeEffortSummary::default();

        for chunk in ids.chunks(RESCORE_CHUNK) {
            let mut loaded = Vec::with_capacity(chunk.len());
            for id in chunk {
                summary.sessions_scanned += 1;
                match require_session(&self.store, id) {
                    Ok(session) => loaded.push(session),
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "Skipping session during relative-effort rescore");
                        summary.errors.push(format!("{}: {}", id, e));
                    }
                }
            }

            let deriver = &self.deriver;
            let rescored: Vec<Option<Decimal>> = loaded.par_iter().map(|s| deriver.rescore(s)).collect();

            let changed: Vec<Session> = loaded
                .into_iter()
                .zip(rescored)
                .filter(|(session, score)| session.relative_effort != *score)
                .map(|(mut session, score)| {
                    session.relative_effort = score;
                    session
                })
                .collect();

            if !changed.is_empty() {
                self.store.save_sessions(&changed)?;
                summary.updated_count += changed.len();
            }
        }

        info!(
            updated = summary.updated_count,
            scanned = summary.sessions_scanned,
            errors = summary.errors.len(),
            "Relative effort recalculated"
        );
        Ok(summary)
    }

    /// Trim a session, persist it and repair the best efforts it held
    pub fn crop_session(&mut self, id: &str, start_trim_s: f64, end_trim_s: f64) -> Result<Session> {
        let session = require_session(&self.store, id)?;
        let mut cropped = CropOrchestrator::new(&self.deriver).crop(&session, start_trim_s, end_trim_s)?;

        cropped.state = SessionState::Persisted;
        self.store.save_session(&cropped)?;
        self.refresh_best_efforts(&cropped)?;

        info!(
            session_id = id,
            start_trim_s,
            end_trim_s,
            duration_s = cropped.stats.duration_s,
            "Cropped session"
        );
        Ok(cropped)
    }

    /// Re-derive a session from its original file, undoing any crop
    pub fn recompute_session(&mut self, id: &str) -> Result<Session> {
        let stored = require_session(&self.store, id)?;
        let raw = stored.raw_source();
        let track = raw.format().parse(raw.bytes())?;

        let mut session = stored.clone();
        session.state = SessionState::Recomputing;
        session.route = track.points;
        let hints = hints_from(&session.metadata);
        self.deriver.derive(&mut session, &hints)?;

        session.state = SessionState::Persisted;
        self.store.save_session(&session)?;
        self.refresh_best_efforts(&session)?;

        debug!(session_id = id, points = session.route.len(), "Recomputed session from raw source");
        Ok(session)
    }

    /// Remove a session and recompute the best efforts it held
    pub fn delete_session(&mut self, id: &str) -> Result<bool> {
        if !self.store.delete_session(id)? {
            return Ok(false);
        }
        let restored = self.restore_held_targets(id)?;
        info!(session_id = id, restored, "Deleted session");
        Ok(true)
    }

    fn build_session(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        format_hint: Option<&str>,
        metadata: Option<&ActivityMetadata>,
    ) -> Result<(Session, Vec<String>)> {
        let format = Format::resolve(filename, format_hint)?;
        debug!(file = filename, format = %format, bytes = bytes.len(), "Parsing track");
        let track = format.parse(&bytes)?;

        let declared_type = track
            .activity_type
            .as_deref()
            .or_else(|| metadata.and_then(|m| m.activity_type.as_deref()));
        ensure_run_activity(declared_type)?;

        let mut session = Session::new(uuid::Uuid::new_v4().to_string(), RawSource::new(bytes, format, filename));
        session.metadata = metadata.cloned().unwrap_or_default();
        session.metadata.name = session.metadata.name.take().or(track.name);
        session.metadata.activity_type = session.metadata.activity_type.take().or(track.activity_type);
        session.metadata.filename.get_or_insert_with(|| filename.to_string());
        session.route = track.points;

        let hints = hints_from(&session.metadata);
        self.deriver.derive(&mut session, &hints)?;

        let mut warnings = Vec::new();
        if !is_timed(&session.route) {
            if session.stats.duration_s > 0.0 {
                warnings.push("track has no timestamps; duration taken from activity metadata".to_string());
            } else {
                warnings.push("track has no timestamps and no known duration; splits unavailable".to_string());
            }
        }
        if session.stats.avg_heart_rate.is_none() {
            warnings.push("no heart-rate data; relative effort unavailable".to_string());
        }
        for warning in &warnings {
            debug!(file = filename, %warning, "Import warning");
        }

        debug!(file = filename, points = session.route.len(), "Derived session");
        Ok((session, warnings))
    }

    fn scan_candidates(&self) -> Result<CandidateScan> {
        let ids = self.store.session_ids()?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let candidates = require_session(&self.store, &id)
                    .and_then(|session| Ok(self.extractor.candidates(&session)?));
                (id, candidates)
            })
            .collect())
    }

    /// Labels held by `session_id` are recomputed from the whole corpus
    fn restore_held_targets(&mut self, session_id: &str) -> Result<usize> {
        let labels: Vec<String> = self
            .store
            .all()?
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.distance_label)
            .collect();
        if labels.is_empty() {
            return Ok(0);
        }
        let scanned = self.scan_candidates()?;
        self.extractor.restore_from_candidates(&mut self.store, &labels, scanned)
    }

    fn refresh_best_efforts(&mut self, session: &Session) -> Result<()> {
        self.restore_held_targets(&session.id)?;
        self.extractor.apply_session(&mut self.store, session)?;
        Ok(())
    }
}

fn hints_from(metadata: &ActivityMetadata) -> DerivationHints {
    DerivationHints {
        started_at: metadata.started_at,
        duration_s: metadata.elapsed_time_s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const GPX_HEAD: &str = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
<trk><name>Morning Run</name><type>running</type><trkseg>"#;

    /// Constant-pace run heading north: one point every 10 s, 33.4 m apart
    fn gpx(points: usize, start_minute: u32, heart_rate: bool) -> Vec<u8> {
        let mut doc = String::from(GPX_HEAD);
        for i in 0..points {
            let lat = 45.0 + i as f64 * 0.0003;
            let secs = i * 10;
            let time = format!("2024-05-04T07:{:02}:{:02}Z", start_minute as usize + secs / 60, secs % 60);
            doc.push_str(&format!(r#"<trkpt lat="{:.6}" lon="7.0"><ele>200</ele><time>{}</time>"#, lat, time));
            if heart_rate {
                doc.push_str(&format!(
                    "<extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>{}</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions>",
                    140 + i % 20
                ));
            }
            doc.push_str("</trkpt>");
        }
        doc.push_str("</trkseg></trk></gpx>");
        doc.into_bytes()
    }

    fn service() -> SessionService<MemoryStore> {
        SessionService::new(MemoryStore::new(), SessionDeriver::default())
    }

    fn imported(outcome: ImportOutcome) -> Session {
        match outcome {
            ImportOutcome::Imported { session, .. } => session,
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_import_track_persists_and_ranks() {
        let mut svc = service();
        let session = imported(svc.import_track(gpx(180, 0, true), "run.gpx", None).unwrap());

        assert_eq!(session.metadata.name.as_deref(), Some("Morning Run"));
        assert_eq!(session.state, SessionState::Persisted);
        assert_eq!(session.stats.duration_s, 1790.0);
        assert!(session.time_series.is_some());
        assert!(session.relative_effort.is_some());
        assert_eq!(svc.session(&session.id).unwrap(), session);

        let records = svc.best_efforts().unwrap();
        assert!(records.iter().any(|r| r.distance_label == "5K"));
        assert!(records.iter().all(|r| r.session_id == session.id));
    }

    #[test]
    fn test_duplicate_import_is_skipped() {
        let mut svc = service();
        let first = imported(svc.import_track(gpx(60, 0, false), "a.gpx", None).unwrap());
        let second = svc.import_track(gpx(60, 0, false), "a-copy.gpx", Some("gpx")).unwrap();

        assert_eq!(second, ImportOutcome::Duplicate { existing_id: first.id });
        assert_eq!(svc.store().len(), 1);
    }

    #[test]
    fn test_import_reports_missing_heart_rate() {
        let mut svc = service();
        match svc.import_track(gpx(30, 0, false), "a.gpx", None).unwrap() {
            ImportOutcome::Imported { warnings, session } => {
                assert!(session.relative_effort.is_none());
                assert!(warnings.iter().any(|w| w.contains("heart-rate")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_errors_are_typed() {
        let mut svc = service();
        assert!(matches!(
            svc.import_track(b"<gpx".to_vec(), "bad.gpx", None),
            Err(StrideError::Parse(_))
        ));
        assert!(matches!(
            svc.import_track(vec![1, 2, 3], "notes.txt", None),
            Err(StrideError::Parse(crate::error::ParseError::UnsupportedFormat { .. }))
        ));
        let ride = String::from_utf8(gpx(30, 0, false)).unwrap().replace("running", "cycling");
        assert!(matches!(
            svc.import_track(ride.into_bytes(), "ride.gpx", None),
            Err(StrideError::Parse(crate::error::ParseError::NonRunActivity { .. }))
        ));
        assert!(svc.store().is_empty());
    }

    #[test]
    fn test_bulk_import_counts() {
        let mut svc = service();
        svc.import_track(gpx(60, 0, false), "stored.gpx", None).unwrap();

        let files = vec![
            ImportFile::new("stored-again.gpx", gpx(60, 0, false)),
            ImportFile::new("new.gpx", gpx(60, 20, true)),
            ImportFile::new("new-copy.gpx", gpx(60, 20, true)),
            ImportFile::new("broken.gpx", b"<gpx xmlns='x'><trk>".to_vec()),
        ];
        let summary = svc.bulk_import(&files, &MetadataTable::default()).unwrap();

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped_duplicates, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(svc.store().len(), 2);
    }

    #[test]
    fn test_bulk_import_rejects_oversized_batch() {
        let mut svc = service().with_batch_config(BatchConfig {
            max_batch_files: 1,
            show_progress: false,
        });
        let files = vec![
            ImportFile::new("a.gpx", gpx(10, 0, false)),
            ImportFile::new("b.gpx", gpx(10, 5, false)),
        ];
        assert!(matches!(
            svc.bulk_import(&files, &MetadataTable::default()),
            Err(StrideError::BatchTooLarge { files: 2, limit: 1 })
        ));
        assert!(svc.store().is_empty());
    }

    #[test]
    fn test_crop_then_recompute_restores_original() {
        let mut svc = service();
        let original = imported(svc.import_track(gpx(180, 0, true), "run.gpx", None).unwrap());

        let cropped = svc.crop_session(&original.id, 100.0, 90.0).unwrap();
        assert_eq!(cropped.stats.duration_s, 1600.0);
        assert_eq!(cropped.time_series.as_ref().unwrap()[0].elapsed_seconds, 0.0);
        assert_eq!(svc.session(&original.id).unwrap().stats.duration_s, 1600.0);

        let restored = svc.recompute_session(&original.id).unwrap();
        assert_eq!(restored.stats, original.stats);
        assert_eq!(restored.route, original.route);
    }

    #[test]
    fn test_invalid_crop_persists_nothing() {
        let mut svc = service();
        let original = imported(svc.import_track(gpx(60, 0, true), "run.gpx", None).unwrap());
        assert!(matches!(
            svc.crop_session(&original.id, 400.0, 400.0),
            Err(StrideError::Crop(_))
        ));
        assert_eq!(svc.session(&original.id).unwrap(), original);
        assert!(matches!(
            svc.crop_session("missing", 0.0, 0.0),
            Err(StrideError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_cascades_best_efforts() {
        let mut svc = service();
        let long = imported(svc.import_track(gpx(180, 0, false), "long.gpx", None).unwrap());
        let short = imported(svc.import_track(gpx(60, 40, false), "short.gpx", None).unwrap());

        assert!(svc.best_efforts().unwrap().iter().any(|r| r.session_id == long.id));
        assert!(svc.delete_session(&long.id).unwrap());
        assert!(!svc.delete_session(&long.id).unwrap());

        let records = svc.best_efforts().unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.session_id == short.id));
        assert!(records.iter().all(|r| r.target_distance_m <= short.stats.distance_m));
    }

    #[test]
    fn test_recalculations() {
        let mut svc = service();
        imported(svc.import_track(gpx(180, 0, true), "a.gpx", None).unwrap());
        imported(svc.import_track(gpx(120, 40, true), "b.gpx", None).unwrap());

        let before = svc.best_efforts().unwrap();
        let summary = svc.recalculate_best_efforts().unwrap();
        assert_eq!(summary.count, before.len());
        assert_eq!(summary.sessions_scanned, 2);
        assert_eq!(svc.best_efforts().unwrap(), before);

        let unchanged = svc.recalculate_relative_effort(HeartRateZoneConfig::default()).unwrap();
        assert_eq!(unchanged.updated_count, 0);
        assert_eq!(unchanged.sessions_scanned, 2);

        let zones = ZoneCalculator::heart_rate_zones(150, crate::zones::HRZoneMethod::Lthr).unwrap();
        let changed = svc.recalculate_relative_effort(zones.clone()).unwrap();
        assert_eq!(changed.updated_count, 2);
        assert_eq!(svc.deriver().zones(), &zones);
    }

    /// Session store whose leaderboard rejects every write
    #[derive(Default)]
    struct ReadOnlyLeaderboard {
        inner: MemoryStore,
    }

    impl SessionStore for ReadOnlyLeaderboard {
        fn save_session(&mut self, session: &Session) -> Result<()> {
            self.inner.save_session(session)
        }

        fn save_sessions(&mut self, sessions: &[Session]) -> Result<()> {
            self.inner.save_sessions(sessions)
        }

        fn load_session(&self, id: &str) -> Result<Option<Session>> {
            self.inner.load_session(id)
        }

        fn session_ids(&self) -> Result<Vec<String>> {
            self.inner.session_ids()
        }

        fn duplicate_keys(&self) -> Result<Vec<DuplicateKey>> {
            self.inner.duplicate_keys()
        }

        fn delete_session(&mut self, id: &str) -> Result<bool> {
            self.inner.delete_session(id)
        }
    }

    impl BestEffortRepository for ReadOnlyLeaderboard {
        fn get(&self, label: &str) -> Result<Option<BestEffortRecord>> {
            BestEffortRepository::get(&self.inner, label)
        }

        fn upsert(&mut self, _record: BestEffortRecord) -> Result<()> {
            Err(StrideError::Internal("leaderboard is read-only".to_string()))
        }

        fn remove(&mut self, label: &str) -> Result<bool> {
            BestEffortRepository::remove(&mut self.inner, label)
        }

        fn all(&self) -> Result<Vec<BestEffortRecord>> {
            self.inner.all()
        }

        fn clear(&mut self, token: &crate::best_efforts::RecalculationToken) -> Result<()> {
            self.inner.clear(token)
        }
    }

    #[test]
    fn test_leaderboard_failure_keeps_import_consistent() {
        let mut svc = SessionService::new(ReadOnlyLeaderboard::default(), SessionDeriver::default());

        let session = match svc.import_track(gpx(120, 0, true), "run.gpx", None).unwrap() {
            ImportOutcome::Imported { session, warnings } => {
                assert!(warnings.iter().any(|w| w.starts_with("best efforts not updated")));
                session
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(svc.session(&session.id).unwrap(), session);
        assert!(svc.best_efforts().unwrap().is_empty());

        // A retry sees the stored session rather than a half-finished import
        assert_eq!(
            svc.import_track(gpx(120, 0, true), "run.gpx", None).unwrap(),
            ImportOutcome::Duplicate { existing_id: session.id }
        );
    }

    #[test]
    fn test_recalculation_is_exclusive() {
        let mut svc = service();
        let _held = svc.lock().acquire().unwrap();
        assert!(matches!(
            svc.recalculate_best_efforts(),
            Err(StrideError::RecalculationInProgress)
        ));
    }
}
