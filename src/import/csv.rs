use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ParseError;
use crate::import::is_run_activity;
use crate::models::ActivityMetadata;

const FORMAT: &str = "CSV";

/// Activity-level metadata from a tabular export, one row per activity.
///
/// Only run rows are kept; the track files referenced by other rows are
/// remembered so a batch can skip them without parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    pub rows: Vec<ActivityMetadata>,

    /// Track files referenced by non-run rows
    pub non_run_files: Vec<String>,

    /// Row-level problems that did not reject the table
    pub warnings: Vec<String>,
}

impl MetadataTable {
    /// Metadata row whose track file matches `filename` by file name
    pub fn find_by_filename(&self, filename: &str) -> Option<&ActivityMetadata> {
        let wanted = file_key(filename);
        self.rows
            .iter()
            .find(|row| row.filename.as_deref().map(file_key).as_deref() == Some(wanted.as_str()))
    }

    /// Whether the export marks this track file as a non-run activity
    pub fn is_non_run(&self, filename: &str) -> bool {
        let wanted = file_key(filename);
        self.non_run_files.iter().any(|f| file_key(f) == wanted)
    }

    pub fn skipped_non_run(&self) -> usize {
        self.non_run_files.len()
    }
}

/// Tabular export reader with flexible column mapping
pub struct CsvMetadataImporter {
    column_mapping: HashMap<String, String>,
}

impl CsvMetadataImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        // Common column name variations
        Self::add_mapping(&mut column_mapping, "activity_id", &["activity_id", "id"]);
        Self::add_mapping(
            &mut column_mapping,
            "date",
            &["activity_date", "date", "start_time", "start_date"],
        );
        Self::add_mapping(&mut column_mapping, "name", &["activity_name", "name", "title"]);
        Self::add_mapping(
            &mut column_mapping,
            "activity_type",
            &["activity_type", "type", "sport"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "notes",
            &["activity_description", "description", "notes"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "elapsed_time",
            &["elapsed_time", "elapsed", "duration"],
        );
        Self::add_mapping(&mut column_mapping, "filename", &["filename", "file", "file_name"]);
        Self::add_mapping(&mut column_mapping, "media", &["media", "photos", "media_paths"]);

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, String>, standard: &str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard.to_string());
        }
    }

    fn normalize_column_name(&self, name: &str) -> String {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

        self.column_mapping
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    /// Parse an export table. Only a missing track-file column or broken CSV
    /// structure rejects the table.
    pub fn parse(&self, bytes: &[u8]) -> Result<MetadataTable, ParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);

        let headers = reader
            .headers()
            .map_err(|e| ParseError::malformed(FORMAT, e))?
            .clone();

        // Exports repeat some headers; the first occurrence wins
        let mut columns: HashMap<String, usize> = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            columns.entry(self.normalize_column_name(header)).or_insert(i);
        }

        if !columns.contains_key("filename") {
            return Err(ParseError::malformed(FORMAT, "no track file column"));
        }

        let mut table = MetadataTable::default();
        for (line, result) in reader.records().enumerate() {
            let record = result.map_err(|e| ParseError::malformed(FORMAT, e))?;
            let row = Row {
                record: &record,
                columns: &columns,
            };

            let Some(filename) = row.get("filename") else {
                tracing::debug!(row = line + 1, "Skipping export row without a track file");
                continue;
            };

            let activity_type = row.get("activity_type").map(str::to_string);
            if let Some(kind) = activity_type.as_deref() {
                if !is_run_activity(kind) {
                    table.non_run_files.push(filename.to_string());
                    continue;
                }
            }

            let started_at = match row.get("date") {
                Some(text) => match Self::parse_datetime(text) {
                    Some(dt) => Some(dt),
                    None => {
                        table
                            .warnings
                            .push(format!("row {}: unparsable date '{}'", line + 1, text));
                        None
                    }
                },
                None => None,
            };

            let elapsed_time_s = match row.get("elapsed_time") {
                Some(text) => match Self::parse_elapsed(text) {
                    Some(seconds) => Some(seconds),
                    None => {
                        table
                            .warnings
                            .push(format!("row {}: invalid elapsed time '{}'", line + 1, text));
                        None
                    }
                },
                None => None,
            };

            let media_paths = row
                .get("media")
                .map(|media| {
                    media
                        .split([',', '|'])
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            table.rows.push(ActivityMetadata {
                activity_id: row.get("activity_id").map(str::to_string),
                name: row.get("name").map(str::to_string),
                notes: row.get("notes").map(str::to_string),
                activity_type,
                started_at,
                elapsed_time_s,
                filename: Some(filename.to_string()),
                media_paths,
            });
        }

        for warning in &table.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!(
            runs = table.rows.len(),
            non_run = table.non_run_files.len(),
            "Parsed activity export table"
        );

        Ok(table)
    }

    fn parse_datetime(date_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
            return Some(dt.with_timezone(&Utc));
        }

        // Try different datetime formats
        let formats = [
            "%b %d, %Y, %I:%M:%S %p",
            "%b %e, %Y, %l:%M:%S %p",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%d/%m/%Y %H:%M:%S",
            "%m/%d/%Y %H:%M:%S",
        ];

        formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(date_str, format).ok())
            .map(|naive| naive.and_utc())
    }

    /// Seconds, either as a number or as `[H:]MM:SS`
    fn parse_elapsed(text: &str) -> Option<f64> {
        if text.contains(':') {
            let mut total = 0.0;
            for part in text.split(':') {
                let value: f64 = part.trim().parse().ok()?;
                if !value.is_finite() || value < 0.0 {
                    return None;
                }
                total = total * 60.0 + value;
            }
            return Some(total);
        }
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
    }
}

impl Default for CsvMetadataImporter {
    fn default() -> Self {
        Self::new()
    }
}

struct Row<'a> {
    record: &'a StringRecord,
    columns: &'a HashMap<String, usize>,
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .get(column)
            .and_then(|&i| self.record.get(i))
            .filter(|value| !value.is_empty())
    }
}

/// Comparison key for track file references: base name without a gzip suffix
fn file_key(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| path.to_lowercase());
    name.strip_suffix(".gz").map(str::to_string).unwrap_or(name)
}
