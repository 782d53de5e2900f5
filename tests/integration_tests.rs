use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use flate2::{write::GzEncoder, Compression};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use stridelog::import::batch::{collect_track_files, ImportFile};
use stridelog::import::csv::{CsvMetadataImporter, MetadataTable};
use stridelog::{
    BestEffortRecord, Database, ImportOutcome, MemoryStore, RecalculationLock, Session, SessionDeriver,
    SessionService, SessionState, SessionStore, StrideError,
};

// Integration tests that exercise complete import, edit and recalculation flows

const M_PER_DEG: f64 = 6_371_000.0 * std::f64::consts::PI / 180.0;

struct TrackSpec<'a> {
    kind: &'a str,
    start: Option<DateTime<Utc>>,
    points: usize,
    step_m: f64,
    interval_s: i64,
    heart_rate: bool,
}

impl Default for TrackSpec<'_> {
    fn default() -> Self {
        Self {
            kind: "running",
            start: Some(Utc.with_ymd_and_hms(2024, 5, 4, 6, 0, 0).unwrap()),
            points: 180,
            step_m: 33.0,
            interval_s: 10,
            heart_rate: false,
        }
    }
}

fn gpx(spec: &TrackSpec) -> Vec<u8> {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="stridelog-tests" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <trk>
    <name>Test Run</name>
"#,
    );
    doc.push_str(&format!("    <type>{}</type>\n    <trkseg>\n", spec.kind));
    for i in 0..spec.points {
        let lat = 45.0 + i as f64 * spec.step_m / M_PER_DEG;
        doc.push_str(&format!(r#"      <trkpt lat="{:.10}" lon="7.0">"#, lat));
        doc.push_str("<ele>150.0</ele>");
        if let Some(start) = spec.start {
            let at = start + Duration::seconds(i as i64 * spec.interval_s);
            doc.push_str(&format!("<time>{}</time>", at.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if spec.heart_rate {
            doc.push_str(&format!(
                "<extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>{}</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions>",
                135 + (i % 30)
            ));
        }
        doc.push_str("</trkpt>\n");
    }
    doc.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    doc.into_bytes()
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn imported(outcome: ImportOutcome) -> Session {
    match outcome {
        ImportOutcome::Imported { session, .. } => session,
        other => panic!("expected an import, got {:?}", other),
    }
}

fn memory_service() -> SessionService<MemoryStore> {
    SessionService::new(MemoryStore::new(), SessionDeriver::default())
}

fn open_service(path: &Path) -> SessionService<Database> {
    SessionService::new(Database::new(path).unwrap(), SessionDeriver::default())
}

fn record<'a>(records: &'a [BestEffortRecord], label: &str) -> Option<&'a BestEffortRecord> {
    records.iter().find(|r| r.distance_label == label)
}

#[test]
fn test_splits_end_to_end_example() {
    // Points at 0, 1000, 2000 and 3000 m, 300 s apart
    let mut svc = memory_service();
    let spec = TrackSpec {
        points: 4,
        step_m: 1000.0,
        interval_s: 300,
        ..Default::default()
    };
    let session = imported(svc.import_track(gpx(&spec), "splits.gpx", None).unwrap());

    assert_eq!(session.splits.len(), 3);
    for split in &session.splits {
        assert!((split.distance_m - 1000.0).abs() < 0.01);
        assert!((split.duration_s - 300.0).abs() < 0.01);
        assert!((split.pace_s - 300.0).abs() < 0.01);
    }
    let total: f64 = session.splits.iter().map(|s| s.distance_m).sum();
    assert!((total - session.stats.distance_m).abs() < 1e-6);
}

#[test]
fn test_constant_pace_10k_best_efforts() {
    // 10,000 m in 3,000 s: 100 m every 30 s
    let mut svc = memory_service();
    let spec = TrackSpec {
        points: 101,
        step_m: 100.0,
        interval_s: 30,
        ..Default::default()
    };
    imported(svc.import_track(gpx(&spec), "10k.gpx", None).unwrap());

    let records = svc.best_efforts().unwrap();
    let five_k = record(&records, "5K").expect("5K record");
    assert!((five_k.achieved_time_s - 1500.0).abs() < 0.01);
    let one_k = record(&records, "1K").expect("1K record");
    assert!((one_k.achieved_time_s - 300.0).abs() < 0.01);
    assert!(records.iter().all(|r| r.target_distance_m <= 10_000.0));
    assert!(record(&records, "Half-Marathon").is_none());
}

#[test]
fn test_bulk_import_with_export_table_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let tracks = dir.path().join("tracks");
    std::fs::create_dir(&tracks).unwrap();

    let morning = TrackSpec {
        heart_rate: true,
        ..Default::default()
    };
    let evening = TrackSpec {
        start: Some(Utc.with_ymd_and_hms(2024, 5, 5, 18, 0, 0).unwrap()),
        points: 240,
        interval_s: 9,
        ..Default::default()
    };
    let untimed = TrackSpec {
        start: None,
        points: 20,
        step_m: 100.0,
        ..Default::default()
    };
    let ride = TrackSpec {
        start: Some(Utc.with_ymd_and_hms(2024, 5, 7, 9, 0, 0).unwrap()),
        ..Default::default()
    };

    std::fs::write(tracks.join("morning.gpx"), gpx(&morning)).unwrap();
    std::fs::write(tracks.join("evening.gpx.gz"), gzip(&gpx(&evening))).unwrap();
    std::fs::write(tracks.join("untimed.gpx"), gpx(&untimed)).unwrap();
    std::fs::write(tracks.join("ride.gpx"), gpx(&ride)).unwrap();
    std::fs::write(tracks.join("broken.gpx"), b"<gpx xmlns=\"x\"><trk><trkseg>").unwrap();

    let export = "\
Activity ID,Activity Date,Activity Name,Activity Type,Elapsed Time,Filename
1,2024-05-04 06:00:00,Sunrise Loop,Run,1790,tracks/morning.gpx
2,2024-05-06 06:00:00,Treadmill,Run,10:00,tracks/untimed.gpx
3,2024-05-07 09:00:00,Commute,Ride,1790,tracks/ride.gpx
";
    let table: MetadataTable = CsvMetadataImporter::new().parse(export.as_bytes()).unwrap();

    let files: Vec<ImportFile> = collect_track_files(dir.path())
        .unwrap()
        .iter()
        .map(|p| ImportFile::from_path(p).unwrap())
        .collect();
    assert_eq!(files.len(), 5);

    let db_path = dir.path().join("stridelog.db");
    {
        let mut svc = open_service(&db_path);
        let summary = svc.bulk_import(&files, &table).unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.skipped_non_run, 1);
        assert_eq!(summary.skipped_duplicates, 0);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].file.ends_with("broken.gpx"));

        // Importing the same files again only finds duplicates
        let again = svc.bulk_import(&files, &table).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.skipped_duplicates, 3);
    }

    // Everything survives reopening the database
    let svc = open_service(&db_path);
    let sessions = svc.sessions().unwrap();
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.state == SessionState::Persisted));

    let morning = sessions
        .iter()
        .find(|s| s.metadata.name.as_deref() == Some("Sunrise Loop"))
        .unwrap();
    assert!(morning.time_series.is_some());
    assert!(morning.relative_effort.is_some());

    let treadmill = sessions
        .iter()
        .find(|s| s.metadata.name.as_deref() == Some("Treadmill"))
        .unwrap();
    assert_eq!(treadmill.stats.duration_s, 600.0);
    assert_eq!(
        treadmill.stats.started_at,
        Some(Utc.with_ymd_and_hms(2024, 5, 6, 6, 0, 0).unwrap())
    );
    assert!(treadmill.time_series.is_none());
    assert_eq!(treadmill.splits.len(), 2);

    let evening = sessions
        .iter()
        .find(|s| s.raw_source().filename().ends_with("evening.gpx.gz"))
        .unwrap();
    assert_eq!(evening.stats.duration_s, 2151.0);

    let records = svc.best_efforts().unwrap();
    assert_eq!(record(&records, "5K").unwrap().session_id, evening.id);
}

#[test]
fn test_crop_and_recompute_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stridelog.db");
    let spec = TrackSpec {
        heart_rate: true,
        ..Default::default()
    };

    let original = {
        let mut svc = open_service(&db_path);
        imported(svc.import_track(gpx(&spec), "run.gpx", None).unwrap())
    };

    {
        let mut svc = open_service(&db_path);
        let cropped = svc.crop_session(&original.id, 120.0, 70.0).unwrap();
        assert_eq!(cropped.stats.duration_s, original.stats.duration_s - 190.0);
        assert!(cropped.stats.distance_m < original.stats.distance_m);
        assert!(cropped.relative_effort < original.relative_effort);
    }

    let mut svc = open_service(&db_path);
    let stored = svc.session(&original.id).unwrap();
    let series = stored.time_series.as_ref().unwrap();
    assert_eq!(series[0].elapsed_seconds, 0.0);
    assert_eq!(series[0].distance_m, Some(0.0));
    assert_eq!(stored.stats.duration_s, 1600.0);
    assert_eq!(stored.raw_source().fingerprint(), original.raw_source().fingerprint());

    let restored = svc.recompute_session(&original.id).unwrap();
    assert_eq!(restored.stats, original.stats);
    assert_eq!(restored.splits, original.splits);
    assert_eq!(restored.relative_effort, original.relative_effort);
}

#[test]
fn test_crop_with_no_trim_keeps_derived_stats() {
    let mut svc = memory_service();
    let spec = TrackSpec {
        heart_rate: true,
        ..Default::default()
    };
    let original = imported(svc.import_track(gpx(&spec), "run.gpx", None).unwrap());
    let cropped = svc.crop_session(&original.id, 0.0, 0.0).unwrap();

    assert_eq!(cropped.stats, original.stats);
    assert_eq!(cropped.splits, original.splits);
    assert_eq!(cropped.relative_effort, original.relative_effort);
}

#[test]
fn test_crop_repairs_best_efforts_held_by_session() {
    let mut svc = memory_service();

    // Fast 3 km, then a slower 6 km the next day
    let fast = TrackSpec {
        points: 91,
        step_m: 33.0,
        interval_s: 9,
        ..Default::default()
    };
    let slow = TrackSpec {
        start: Some(Utc.with_ymd_and_hms(2024, 5, 5, 6, 0, 0).unwrap()),
        points: 181,
        step_m: 33.0,
        interval_s: 11,
        ..Default::default()
    };
    let fast = imported(svc.import_track(gpx(&fast), "fast.gpx", None).unwrap());
    let slow = imported(svc.import_track(gpx(&slow), "slow.gpx", None).unwrap());

    let before = svc.best_efforts().unwrap();
    assert_eq!(record(&before, "1K").unwrap().session_id, fast.id);
    assert_eq!(record(&before, "5K").unwrap().session_id, slow.id);

    // Cropping the fast run below 1 km hands the 1K record to the slow run
    svc.crop_session(&fast.id, 0.0, 600.0).unwrap();
    let after = svc.best_efforts().unwrap();
    assert_eq!(record(&after, "1K").unwrap().session_id, slow.id);
    assert_eq!(record(&after, "400m").unwrap().session_id, fast.id);
}

#[test]
fn test_delete_then_full_recalculation_agree() {
    let mut svc = memory_service();
    let first = imported(svc.import_track(gpx(&TrackSpec::default()), "a.gpx", None).unwrap());
    let second_spec = TrackSpec {
        start: Some(Utc.with_ymd_and_hms(2024, 5, 6, 6, 0, 0).unwrap()),
        points: 100,
        interval_s: 8,
        ..Default::default()
    };
    imported(svc.import_track(gpx(&second_spec), "b.gpx", None).unwrap());

    assert!(svc.delete_session(&first.id).unwrap());
    let after_delete = svc.best_efforts().unwrap();
    assert!(after_delete.iter().all(|r| r.session_id != first.id));

    let summary = svc.recalculate_best_efforts().unwrap();
    assert_eq!(summary.sessions_scanned, 1);
    assert_eq!(svc.best_efforts().unwrap(), after_delete);
}

#[test]
fn test_relative_effort_recalculation_is_deterministic() {
    let mut svc = memory_service();
    let spec = TrackSpec {
        heart_rate: true,
        ..Default::default()
    };
    let session = imported(svc.import_track(gpx(&spec), "run.gpx", None).unwrap());
    let zones = svc.deriver().zones().clone();

    let first = svc.recalculate_relative_effort(zones.clone()).unwrap();
    let second = svc.recalculate_relative_effort(zones).unwrap();
    assert_eq!(first.updated_count, 0);
    assert_eq!(second.updated_count, 0);
    assert_eq!(svc.session(&session.id).unwrap().relative_effort, session.relative_effort);
}

#[test]
fn test_shared_lock_blocks_second_recalculation() {
    let lock = RecalculationLock::new();
    let mut a = memory_service().with_lock(lock.clone());
    let mut b = memory_service().with_lock(lock.clone());

    let token = lock.acquire().unwrap();
    assert!(matches!(a.recalculate_best_efforts(), Err(StrideError::RecalculationInProgress)));
    assert!(matches!(b.recalculate_best_efforts(), Err(StrideError::RecalculationInProgress)));

    drop(token);
    assert!(a.recalculate_best_efforts().is_ok());
    assert!(!lock.is_held());
}

#[test]
fn test_failed_import_leaves_store_untouched() {
    let mut svc = memory_service();
    let spec = TrackSpec {
        points: 1,
        ..Default::default()
    };
    assert!(matches!(
        svc.import_track(gpx(&spec), "single.gpx", None),
        Err(StrideError::Parse(_))
    ));
    assert!(svc.store().session_ids().unwrap().is_empty());
    assert!(svc.best_efforts().unwrap().is_empty());
}
