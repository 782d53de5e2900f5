//! Audit trail for import batches
//!
//! Every state change of every file in a batch is recorded with its severity,
//! mirrored to `tracing`, and can be summarized or exported as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Audit log of one import batch
pub struct ImportLogger {
    batch_id: String,
    entries: Vec<AuditEntry>,
}

/// Individual audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequence number within the batch
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// File being processed
    pub file: Option<String>,
    pub operation: OperationType,
    pub event: LogEvent,
    pub severity: LogSeverity,
}

/// Pipeline stage an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Parsing,
    Derivation,
    DuplicateCheck,
    Storage,
    Import,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEvent {
    Started,
    /// File derived into a session awaiting commit
    Derived { session_id: String, points: usize },
    /// Matched an existing or earlier-in-batch session
    Duplicate { reason: String },
    /// Activity type is not a run
    SkippedNonRun { activity_type: String },
    Warning { reason: String },
    Failed { code: String, reason: String },
    /// Batch written to storage
    Committed { sessions: usize },
}

/// Severity levels for logged events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogSeverity {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl ImportLogger {
    pub fn new(batch_id: impl Into<String>) -> Self {
        let batch_id = batch_id.into();
        info!(batch = %batch_id, "Starting import batch");
        Self {
            batch_id,
            entries: Vec::new(),
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn log_started(&mut self, file: &str) {
        debug!(file, "Processing file");
        self.log(OperationType::Import, Some(file), LogEvent::Started, LogSeverity::Debug);
    }

    pub fn log_derived(&mut self, file: &str, session_id: &str, points: usize) {
        debug!(file, session_id, points, "Derived session");
        self.log(
            OperationType::Derivation,
            Some(file),
            LogEvent::Derived {
                session_id: session_id.to_string(),
                points,
            },
            LogSeverity::Info,
        );
    }

    pub fn log_duplicate(&mut self, file: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(file, %reason, "Skipping duplicate session");
        self.log(
            OperationType::DuplicateCheck,
            Some(file),
            LogEvent::Duplicate { reason },
            LogSeverity::Warning,
        );
    }

    pub fn log_non_run(&mut self, file: &str, activity_type: &str) {
        info!(file, activity_type, "Skipping non-run activity");
        self.log(
            OperationType::Parsing,
            Some(file),
            LogEvent::SkippedNonRun {
                activity_type: activity_type.to_string(),
            },
            LogSeverity::Info,
        );
    }

    pub fn log_warning(&mut self, operation: OperationType, file: Option<&str>, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(file = file.unwrap_or_default(), %reason, "Import warning");
        self.log(operation, file, LogEvent::Warning { reason }, LogSeverity::Warning);
    }

    pub fn log_error(
        &mut self,
        operation: OperationType,
        file: &str,
        code: impl Into<String>,
        reason: impl Into<String>,
    ) {
        let code = code.into();
        let reason = reason.into();
        warn!(file, %code, %reason, "File failed to import");
        self.log(
            operation,
            Some(file),
            LogEvent::Failed { code, reason },
            LogSeverity::Error,
        );
    }

    pub fn log_committed(&mut self, sessions: usize) {
        info!(batch = %self.batch_id, sessions, "Committed import batch");
        self.log(
            OperationType::Storage,
            None,
            LogEvent::Committed { sessions },
            LogSeverity::Info,
        );
    }

    fn log(&mut self, operation: OperationType, file: Option<&str>, event: LogEvent, severity: LogSeverity) {
        self.entries.push(AuditEntry {
            id: self.entries.len() as u64,
            timestamp: Utc::now(),
            file: file.map(str::to_string),
            operation,
            event,
            severity,
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries at or above a severity
    pub fn entries_by_severity(&self, severity: LogSeverity) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| e.severity >= severity).collect()
    }

    pub fn entries_for_file(&self, file: &str) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.file.as_deref() == Some(file))
            .collect()
    }

    pub fn summary(&self) -> ImportAuditSummary {
        let mut summary = ImportAuditSummary {
            batch_id: self.batch_id.clone(),
            start_time: self.entries.first().map(|e| e.timestamp),
            end_time: self.entries.last().map(|e| e.timestamp),
            total_entries: self.entries.len(),
            ..Default::default()
        };

        for entry in &self.entries {
            match entry.event {
                LogEvent::Derived { .. } => summary.derived += 1,
                LogEvent::Duplicate { .. } => summary.duplicates += 1,
                LogEvent::Failed { .. } => summary.errors += 1,
                LogEvent::Warning { .. } => summary.warnings += 1,
                _ => {}
            }
            if let Some(file) = &entry.file {
                summary.files.insert(file.clone());
            }
        }

        summary
    }

    /// Export audit trail as JSON
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }
}

/// Aggregate view of one batch's audit trail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportAuditSummary {
    pub batch_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_entries: usize,
    pub derived: usize,
    pub duplicates: usize,
    pub warnings: usize,
    pub errors: usize,
    pub files: BTreeSet<String>,
}

impl ImportAuditSummary {
    pub fn is_successful(&self) -> bool {
        self.errors == 0
    }

    pub fn to_string_pretty(&self) -> String {
        format!(
            "Import Batch {}\n  Files: {}\n  Derived: {}\n  Duplicates: {}\n  Warnings: {}\n  Errors: {}",
            self.batch_id,
            self.files.len(),
            self.derived,
            self.duplicates,
            self.warnings,
            self.errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_sequenced() {
        let mut logger = ImportLogger::new("batch-1");
        logger.log_started("a.gpx");
        logger.log_derived("a.gpx", "s1", 120);
        logger.log_committed(1);

        let ids: Vec<u64> = logger.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(logger.entries_for_file("a.gpx").len(), 2);
    }

    #[test]
    fn test_summary_counts() {
        let mut logger = ImportLogger::new("batch-2");
        logger.log_derived("a.gpx", "s1", 10);
        logger.log_duplicate("b.gpx", "same start, distance and duration as s1");
        logger.log_error(OperationType::Parsing, "c.fit", "MalformedFile", "truncated");
        logger.log_non_run("d.fit", "Ride");

        let summary = logger.summary();
        assert_eq!(summary.derived, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.files.len(), 4);
        assert!(!summary.is_successful());
        assert!(summary.to_string_pretty().contains("batch-2"));
    }

    #[test]
    fn test_severity_filtering() {
        let mut logger = ImportLogger::new("batch-3");
        logger.log_started("a.gpx");
        logger.log_duplicate("a.gpx", "dup");
        logger.log_error(OperationType::Derivation, "b.gpx", "InvalidNumericValue", "NaN");

        assert_eq!(logger.entries_by_severity(LogSeverity::Warning).len(), 2);
        assert_eq!(logger.entries_by_severity(LogSeverity::Error).len(), 1);
    }

    #[test]
    fn test_export_json() {
        let mut logger = ImportLogger::new("batch-4");
        logger.log_committed(3);

        let json = logger.export_json().unwrap();
        assert!(json.contains("Committed"));
        let back: Vec<AuditEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, logger.entries());
    }
}
