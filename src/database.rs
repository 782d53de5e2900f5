use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::best_efforts::{BestEffortRepository, RecalculationToken};
use crate::duplicates::DuplicateKey;
use crate::error::{DatabaseError, Result};
use crate::import::Format;
use crate::models::{BestEffortRecord, RawSource, Session, SessionState, TimeSeriesPoint, TrackPoint};
use crate::store::SessionStore;

/// Gzip-compressed bincode encoding of a point stream
#[derive(Debug, Clone)]
pub struct CompressedBlob<T> {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub point_count: usize,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> CompressedBlob<T> {
    pub fn compress(points: &[T]) -> std::result::Result<Self, DatabaseError> {
        let serialized =
            bincode::serialize(points).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed_data = encoder.finish()?;

        Ok(Self {
            compressed_data,
            original_size,
            point_count: points.len(),
            _marker: PhantomData,
        })
    }

    pub fn from_bytes(compressed_data: Vec<u8>) -> Self {
        Self {
            compressed_data,
            original_size: 0,
            point_count: 0,
            _marker: PhantomData,
        }
    }

    pub fn decompress(&self) -> std::result::Result<Vec<T>, DatabaseError> {
        let mut decoder = GzDecoder::new(self.compressed_data.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        bincode::deserialize(&decompressed).map_err(|e| DatabaseError::Serialization(e.to_string()))
    }

    /// Original size / compressed size
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_data.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed_data.len() as f64
    }
}

/// Storage footprint summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub session_count: usize,
    pub best_effort_count: usize,
    pub raw_bytes: u64,
    pub route_bytes: u64,
    pub series_bytes: u64,
}

/// SQLite-backed session store and best-effort leaderboard
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> std::result::Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> std::result::Result<Self, DatabaseError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> std::result::Result<(), DatabaseError> {
        // journal_mode returns the resulting mode as a row
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "Opened database");
        self.conn.execute_batch(
            r#"
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                format TEXT NOT NULL,
                raw_data BLOB NOT NULL,
                raw_sha256 TEXT NOT NULL,
                metadata TEXT NOT NULL,

                started_at DATETIME,
                duration_s REAL NOT NULL,
                distance_m REAL NOT NULL,
                stats TEXT NOT NULL,
                splits TEXT NOT NULL,
                relative_effort TEXT,

                route_data BLOB NOT NULL,
                route_points INTEGER NOT NULL,
                series_data BLOB,
                series_points INTEGER,

                shoe_id TEXT,
                state TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions (started_at);

            CREATE TABLE IF NOT EXISTS best_efforts (
                distance_label TEXT PRIMARY KEY,
                target_distance_m REAL NOT NULL,
                achieved_time_s REAL NOT NULL,
                session_id TEXT NOT NULL,
                session_date DATETIME
            );
            "#,
        )?;
        Ok(())
    }

    fn write_session(tx: &Transaction, session: &Session) -> std::result::Result<(), DatabaseError> {
        let raw = session.raw_source();
        let route = CompressedBlob::compress(&session.route)?;
        let series = session
            .time_series
            .as_deref()
            .map(CompressedBlob::compress)
            .transpose()?;

        let metadata = to_json(&session.metadata)?;
        let stats = to_json(&session.stats)?;
        let splits = to_json(&session.splits)?;

        tx.execute(
            r#"
            INSERT INTO sessions (
                id, filename, format, raw_data, raw_sha256, metadata,
                started_at, duration_s, distance_m, stats, splits, relative_effort,
                route_data, route_points, series_data, series_points,
                shoe_id, state
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(id) DO UPDATE SET
                metadata = excluded.metadata,
                started_at = excluded.started_at,
                duration_s = excluded.duration_s,
                distance_m = excluded.distance_m,
                stats = excluded.stats,
                splits = excluded.splits,
                relative_effort = excluded.relative_effort,
                route_data = excluded.route_data,
                route_points = excluded.route_points,
                series_data = excluded.series_data,
                series_points = excluded.series_points,
                shoe_id = excluded.shoe_id,
                state = excluded.state,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                session.id,
                raw.filename(),
                raw.format().name(),
                raw.bytes(),
                raw.fingerprint(),
                metadata,
                session.stats.started_at,
                session.stats.duration_s,
                session.stats.distance_m,
                stats,
                splits,
                session.relative_effort.map(|d| d.to_string()),
                route.compressed_data,
                route.point_count as i64,
                series.as_ref().map(|s| s.compressed_data.clone()),
                series.as_ref().map(|s| s.point_count as i64),
                session.shoe_id,
                state_to_str(session.state),
            ],
        )?;
        Ok(())
    }

    fn read_session(&self, id: &str) -> std::result::Result<Option<Session>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT id, filename, format, raw_data, raw_sha256, metadata,
                       stats, splits, relative_effort, route_data, series_data,
                       shoe_id, state
                FROM sessions WHERE id = ?1
                "#,
                params![id],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn write_sessions(&mut self, sessions: &[Session]) -> std::result::Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        for session in sessions {
            Self::write_session(&tx, session)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_ids(&self) -> std::result::Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions ORDER BY started_at ASC, id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn read_duplicate_keys(&self) -> std::result::Result<Vec<DuplicateKey>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, started_at, distance_m, duration_s FROM sessions")?;
        let keys = stmt
            .query_map([], |row| {
                Ok(DuplicateKey {
                    session_id: row.get(0)?,
                    started_at: row.get(1)?,
                    distance_m: row.get(2)?,
                    duration_s: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Storage footprint of everything persisted
    pub fn get_stats(&self) -> std::result::Result<DatabaseStats, DatabaseError> {
        let (session_count, raw_bytes, route_bytes, series_bytes): (i64, i64, i64, i64) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(LENGTH(raw_data)), 0),
                   COALESCE(SUM(LENGTH(route_data)), 0),
                   COALESCE(SUM(LENGTH(series_data)), 0)
            FROM sessions
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let best_effort_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM best_efforts", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            session_count: session_count as usize,
            best_effort_count: best_effort_count as usize,
            raw_bytes: raw_bytes as u64,
            route_bytes: route_bytes as u64,
            series_bytes: series_bytes as u64,
        })
    }

    fn read_best_efforts(&self) -> std::result::Result<Vec<BestEffortRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT distance_label, target_distance_m, achieved_time_s, session_id, session_date
            FROM best_efforts ORDER BY target_distance_m ASC
            "#,
        )?;
        let records = stmt
            .query_map([], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn record_from_row(row: &Row) -> rusqlite::Result<BestEffortRecord> {
        Ok(BestEffortRecord {
            distance_label: row.get(0)?,
            target_distance_m: row.get(1)?,
            achieved_time_s: row.get(2)?,
            session_id: row.get(3)?,
            session_date: row.get(4)?,
        })
    }
}

impl SessionStore for Database {
    fn save_session(&mut self, session: &Session) -> Result<()> {
        self.write_sessions(std::slice::from_ref(session))?;
        debug!(session_id = %session.id, "Saved session");
        Ok(())
    }

    fn save_sessions(&mut self, sessions: &[Session]) -> Result<()> {
        self.write_sessions(sessions)?;
        info!(count = sessions.len(), "Committed sessions");
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.read_session(id)?)
    }

    fn session_ids(&self) -> Result<Vec<String>> {
        Ok(self.read_ids()?)
    }

    fn duplicate_keys(&self) -> Result<Vec<DuplicateKey>> {
        Ok(self.read_duplicate_keys()?)
    }

    fn delete_session(&mut self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(DatabaseError::from)?;
        Ok(removed > 0)
    }
}

impl BestEffortRepository for Database {
    fn get(&self, label: &str) -> Result<Option<BestEffortRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT distance_label, target_distance_m, achieved_time_s, session_id, session_date
                FROM best_efforts WHERE distance_label = ?1
                "#,
                params![label],
                Self::record_from_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;
        Ok(record)
    }

    fn upsert(&mut self, record: BestEffortRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO best_efforts
                    (distance_label, target_distance_m, achieved_time_s, session_id, session_date)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.distance_label,
                    record.target_distance_m,
                    record.achieved_time_s,
                    record.session_id,
                    record.session_date,
                ],
            )
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    fn remove(&mut self, label: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM best_efforts WHERE distance_label = ?1", params![label])
            .map_err(DatabaseError::from)?;
        Ok(removed > 0)
    }

    fn all(&self) -> Result<Vec<BestEffortRecord>> {
        Ok(self.read_best_efforts()?)
    }

    fn clear(&mut self, _token: &RecalculationToken) -> Result<()> {
        self.conn
            .execute("DELETE FROM best_efforts", [])
            .map_err(DatabaseError::from)?;
        Ok(())
    }
}

/// Columns of one session row before decoding
struct SessionRow {
    id: String,
    filename: String,
    format: String,
    raw_data: Vec<u8>,
    raw_sha256: String,
    metadata: String,
    stats: String,
    splits: String,
    relative_effort: Option<String>,
    route_data: Vec<u8>,
    series_data: Option<Vec<u8>>,
    shoe_id: Option<String>,
    state: String,
}

impl SessionRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            format: row.get(2)?,
            raw_data: row.get(3)?,
            raw_sha256: row.get(4)?,
            metadata: row.get(5)?,
            stats: row.get(6)?,
            splits: row.get(7)?,
            relative_effort: row.get(8)?,
            route_data: row.get(9)?,
            series_data: row.get(10)?,
            shoe_id: row.get(11)?,
            state: row.get(12)?,
        })
    }

    fn into_session(self) -> std::result::Result<Session, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let format = Format::from_hint(&self.format).map_err(|e| corrupt(e.to_string()))?;
        let raw = RawSource::new(self.raw_data, format, self.filename);
        if raw.fingerprint() != self.raw_sha256 {
            return Err(corrupt("raw source checksum mismatch".to_string()));
        }

        let relative_effort = self
            .relative_effort
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("relative effort: {}", e)))?;
        let state = state_from_str(&self.state).ok_or_else(|| corrupt(format!("state {}", self.state)))?;

        let mut session = Session::new(self.id.clone(), raw);
        session.metadata = from_json(&self.metadata)?;
        session.stats = from_json(&self.stats)?;
        session.splits = from_json(&self.splits)?;
        session.route = CompressedBlob::<TrackPoint>::from_bytes(self.route_data).decompress()?;
        session.time_series = self
            .series_data
            .map(|data| CompressedBlob::<TimeSeriesPoint>::from_bytes(data).decompress())
            .transpose()?;
        session.relative_effort = relative_effort;
        session.shoe_id = self.shoe_id;
        session.state = state;
        Ok(session)
    }
}

fn to_json<T: Serialize>(value: &T) -> std::result::Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> std::result::Result<T, DatabaseError> {
    serde_json::from_str(text).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn state_to_str(state: SessionState) -> &'static str {
    match state {
        SessionState::Imported => "imported",
        SessionState::Validating => "validating",
        SessionState::Recomputing => "recomputing",
        SessionState::Persisted => "persisted",
    }
}

fn state_from_str(s: &str) -> Option<SessionState> {
    match s {
        "imported" => Some(SessionState::Imported),
        "validating" => Some(SessionState::Validating),
        "recomputing" => Some(SessionState::Recomputing),
        "persisted" => Some(SessionState::Persisted),
        _ => None,
    }
}
