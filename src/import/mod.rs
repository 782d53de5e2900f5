use crate::error::ParseError;
use crate::models::ParsedTrack;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Read;
use std::path::Path;

pub mod batch;
pub mod csv;
pub mod fit;
pub mod gpx;
pub mod logging;
pub mod validation;

/// Trait implemented by every point-level format adapter
pub trait TrackAdapter {
    /// Format this adapter decodes
    fn format(&self) -> Format;

    /// Decode raw bytes into a canonical track
    fn parse(&self, bytes: &[u8]) -> Result<ParsedTrack, ParseError>;
}

/// Supported input formats, resolved once at the import entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Namespaced trackpoint XML (GPX)
    Trackpoint,
    /// Binary sensor telemetry (FIT, optionally gzip-wrapped)
    BinaryTelemetry,
    /// Tabular activity export (CSV); metadata only
    Tabular,
}

impl Format {
    /// Detect the format from a file name
    pub fn detect(filename: &str) -> Option<Format> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".gpx") || lower.ends_with(".gpx.gz") {
            Some(Format::Trackpoint)
        } else if lower.ends_with(".fit") || lower.ends_with(".fit.gz") {
            Some(Format::BinaryTelemetry)
        } else if lower.ends_with(".csv") {
            Some(Format::Tabular)
        } else {
            None
        }
    }

    /// Parse a caller-supplied format hint
    pub fn from_hint(hint: &str) -> Result<Format, ParseError> {
        match hint.trim().to_lowercase().as_str() {
            "gpx" | "trackpoint" | "xml" => Ok(Format::Trackpoint),
            "fit" | "fit.gz" | "binary" | "telemetry" => Ok(Format::BinaryTelemetry),
            "csv" | "tabular" => Ok(Format::Tabular),
            other => Err(ParseError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }

    /// Resolve the format from an explicit hint, falling back to the file name
    pub fn resolve(filename: &str, hint: Option<&str>) -> Result<Format, ParseError> {
        match hint {
            Some(hint) => Self::from_hint(hint),
            None => Self::detect(filename).ok_or_else(|| ParseError::UnsupportedFormat {
                format: Path::new(filename)
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.to_string()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Trackpoint => "GPX",
            Format::BinaryTelemetry => "FIT",
            Format::Tabular => "CSV",
        }
    }

    /// Decode a point-level track. Tabular exports carry no geometry.
    pub fn parse(&self, bytes: &[u8]) -> Result<ParsedTrack, ParseError> {
        match self {
            Format::Trackpoint => gpx::GpxAdapter.parse(bytes),
            Format::BinaryTelemetry => fit::FitAdapter.parse(bytes),
            Format::Tabular => Err(ParseError::UnsupportedFormat {
                format: format!("{} (metadata only, no track points)", self.name()),
            }),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Strip a gzip wrapper if present; other input is returned as-is
pub(crate) fn decompress_if_gzipped<'a>(
    bytes: &'a [u8],
    format: Format,
) -> Result<Cow<'a, [u8]>, ParseError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut decoded = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut decoded)
        .map_err(|e| ParseError::malformed(format.name(), format!("gzip stream: {}", e)))?;
    Ok(Cow::Owned(decoded))
}

/// Whether an activity-type label describes a run.
///
/// Accepts free-text labels ("Run", "Trail Run", "running", "VirtualRun") and
/// the numeric GPX type code some exporters write for runs.
pub fn is_run_activity(activity_type: &str) -> bool {
    let normalized = activity_type
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ");
    normalized == "9" || normalized.contains("run")
}

/// Reject a known non-run activity type; unknown types pass
pub fn ensure_run_activity(activity_type: Option<&str>) -> Result<(), ParseError> {
    match activity_type {
        Some(kind) if !kind.trim().is_empty() && !is_run_activity(kind) => {
            Err(ParseError::NonRunActivity {
                activity_type: kind.to_string(),
            })
        }
        _ => Ok(()),
    }
}
