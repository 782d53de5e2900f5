//! Sequential bulk import
//!
//! Files are parsed and derived one at a time into an in-memory batch. Nothing
//! is written here: the caller commits the accepted sessions in one burst.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::csv::MetadataTable;
use super::logging::{ImportLogger, OperationType};
use crate::duplicates::{DuplicateDetector, DuplicateKey};
use crate::error::{ParseError, StrideError};
use crate::models::{ActivityMetadata, Session};

/// Configuration for bulk import operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Upper bound on files per batch; the whole batch is held in memory
    pub max_batch_files: usize,
    /// Show progress bar during import
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_files: 500,
            show_progress: false,
        }
    }
}

/// One file handed to a bulk import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub format_hint: Option<String>,
}

impl ImportFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            format_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(path.to_string_lossy().into_owned(), std::fs::read(path)?))
    }
}

/// Per-file failure inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub message: String,
}

/// Outcome counts of one bulk import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkImportSummary {
    /// Files examined, whatever their outcome
    pub processed: usize,
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub skipped_non_run: usize,
    pub errors: Vec<FileError>,
    /// Caller abandoned the batch; nothing was committed
    pub cancelled: bool,
    pub duration_ms: u128,
}

impl BulkImportSummary {
    pub fn is_fully_successful(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    pub fn to_string_pretty(&self) -> String {
        format!(
            "Bulk Import Summary\n  \
             Processed: {}\n  \
             Imported: {}\n  \
             Skipped duplicates: {}\n  \
             Skipped non-run: {}\n  \
             Errors: {}\n  \
             Total Time: {:.2}s",
            self.processed,
            self.imported,
            self.skipped_duplicates,
            self.skipped_non_run,
            self.errors.len(),
            self.duration_ms as f64 / 1000.0,
        )
    }
}

/// Sessions accepted by a batch, awaiting the mass commit
pub struct BatchResult {
    pub sessions: Vec<Session>,
    pub summary: BulkImportSummary,
    pub audit: ImportLogger,
}

/// Drives a batch through parse/derive, duplicate and non-run filtering
pub struct BatchImporter {
    pub config: BatchConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl BatchImporter {
    pub fn new(config: BatchConfig) -> Self {
        Self { config, cancel: None }
    }

    /// Stop between files once the flag is raised
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Reject batches larger than the configured bound
    pub fn check_size(&self, files: usize) -> Result<(), StrideError> {
        if files > self.config.max_batch_files {
            return Err(StrideError::BatchTooLarge {
                files,
                limit: self.config.max_batch_files,
            });
        }
        Ok(())
    }

    /// Run every file through `build`, which parses and derives one session.
    ///
    /// Sessions duplicating `existing` or an earlier file of the batch are
    /// skipped, as are files the metadata marks as non-run activities.
    pub fn run<F>(
        &self,
        files: &[ImportFile],
        metadata: &MetadataTable,
        existing: Vec<DuplicateKey>,
        mut build: F,
    ) -> BatchResult
    where
        F: FnMut(&ImportFile, Option<&ActivityMetadata>) -> Result<Session, StrideError>,
    {
        let start_time = Instant::now();
        let mut audit = ImportLogger::new(uuid::Uuid::new_v4().to_string());
        let mut detector = DuplicateDetector::new(existing);
        let mut summary = BulkImportSummary::default();
        let mut sessions = Vec::new();

        info!(files = files.len(), known = detector.len(), "Starting bulk import");
        let progress = self.progress_bar(files.len());

        for file in files {
            if self.is_cancelled() {
                info!(processed = summary.processed, "Bulk import abandoned");
                summary.cancelled = true;
                sessions.clear();
                break;
            }

            summary.processed += 1;
            audit.log_started(&file.filename);
            if let Some(pb) = &progress {
                pb.set_message(file.filename.clone());
            }

            if metadata.is_non_run(&file.filename) {
                summary.skipped_non_run += 1;
                audit.log_non_run(&file.filename, "export row");
                advance(&progress);
                continue;
            }

            let row = metadata.find_by_filename(&file.filename);
            if row.is_none() && !metadata.rows.is_empty() {
                audit.log_warning(
                    OperationType::Import,
                    Some(&file.filename),
                    "no metadata row references this file",
                );
            }

            match build(file, row) {
                Ok(session) => {
                    let key = DuplicateKey::from_session(&session);
                    if let Some(original) = detector.find_duplicate(&key) {
                        summary.skipped_duplicates += 1;
                        audit.log_duplicate(
                            &file.filename,
                            format!("matches session {}", original.session_id),
                        );
                    } else {
                        audit.log_derived(&file.filename, &session.id, session.route.len());
                        detector.accept(key);
                        sessions.push(session);
                    }
                }
                Err(StrideError::Parse(ParseError::NonRunActivity { activity_type })) => {
                    summary.skipped_non_run += 1;
                    audit.log_non_run(&file.filename, &activity_type);
                }
                Err(e) => {
                    let operation = match &e {
                        StrideError::Parse(_) => OperationType::Parsing,
                        _ => OperationType::Derivation,
                    };
                    audit.log_error(operation, &file.filename, error_code(&e), e.to_string());
                    summary.errors.push(FileError {
                        file: file.filename.clone(),
                        message: e.to_string(),
                    });
                }
            }
            advance(&progress);
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Complete");
        }

        summary.imported = sessions.len();
        summary.duration_ms = start_time.elapsed().as_millis();
        debug!(
            imported = summary.imported,
            duplicates = summary.skipped_duplicates,
            errors = summary.errors.len(),
            "Batch derived"
        );

        BatchResult {
            sessions,
            summary,
            audit,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}

impl Default for BatchImporter {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

fn advance(progress: &Option<ProgressBar>) {
    if let Some(pb) = progress {
        pb.inc(1);
    }
}

fn error_code(error: &StrideError) -> &'static str {
    match error {
        StrideError::Parse(ParseError::MalformedFile { .. }) => "malformed_file",
        StrideError::Parse(ParseError::InsufficientPoints { .. }) => "insufficient_points",
        StrideError::Parse(ParseError::InvalidNumericValue { .. }) => "invalid_numeric_value",
        StrideError::Parse(ParseError::UnsupportedFormat { .. }) => "unsupported_format",
        StrideError::Parse(ParseError::NonRunActivity { .. }) => "non_run_activity",
        StrideError::Calculation(_) => "invalid_numeric_value",
        _ => "internal",
    }
}

/// Track files under `path`: the file itself, or the importable files of a
/// directory tree sorted by path
pub fn collect_track_files(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry_path = entry?.path();
            if entry_path.is_dir() {
                pending.push(entry_path);
            } else if is_track_file(&entry_path) {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_track_file(path: &Path) -> bool {
    matches!(
        super::Format::detect(&path.to_string_lossy()),
        Some(super::Format::Trackpoint | super::Format::BinaryTelemetry)
    )
}
