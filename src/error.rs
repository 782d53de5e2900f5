//! Unified error hierarchy for stridelog
//!
//! Format errors abort a single file, derivation errors abort a single session,
//! and crop/recalculation errors are returned synchronously to the caller.

use thiserror::Error;

/// Top-level error type for all stridelog operations
#[derive(Debug, Error)]
pub enum StrideError {
    /// Track file parsing errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Geospatial / derivation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Crop request errors
    #[error("Crop error: {0}")]
    Crop(#[from] CropError),

    /// Storage errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No session with the given id exists
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// Another full recalculation holds the leaderboard
    #[error("A full recalculation is already running")]
    RecalculationInProgress,

    /// Bulk import batch exceeds the configured bound
    #[error("Batch of {files} files exceeds the limit of {limit}")]
    BatchTooLarge { files: usize, limit: usize },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the format adapters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Unparsable structure
    #[error("Malformed {format} file: {reason}")]
    MalformedFile { format: String, reason: String },

    /// Fewer than two usable points
    #[error("Insufficient points: found {found}, need at least 2")]
    InsufficientPoints { found: usize },

    /// NaN, infinite or out-of-range numeric input
    #[error("Invalid numeric value for {field}: {value}")]
    InvalidNumericValue { field: String, value: String },

    /// No adapter produces a track for this format
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// Activity is not a run
    #[error("Not a run activity: {activity_type}")]
    NonRunActivity { activity_type: String },
}

impl ParseError {
    pub fn malformed(format: &str, reason: impl ToString) -> Self {
        ParseError::MalformedFile {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while deriving metrics from a track
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    /// Non-finite or out-of-range input; rejected, never clamped
    #[error("Invalid numeric value for {field}: {value}")]
    InvalidNumericValue { field: String, value: String },

    /// Invalid parameter passed to a calculator
    #[error("Invalid parameter {parameter}={value}")]
    InvalidParameter { parameter: String, value: String },
}

impl CalculationError {
    pub fn invalid_value(field: &str, value: f64) -> Self {
        CalculationError::InvalidNumericValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors raised by the crop orchestrator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CropError {
    /// Trim bounds invalid
    #[error("Invalid crop bounds: {reason}")]
    Validation { reason: String },

    /// Session has neither a time series nor route data
    #[error("Session has no time series or route data to trim")]
    NoTrimmableData,

    /// Re-derivation of the retained points failed
    #[error("Re-derivation failed: {0}")]
    Derivation(#[from] CalculationError),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Result type alias for stridelog operations
pub type Result<T> = std::result::Result<T, StrideError>;

impl StrideError {
    /// Check if the caller may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrideError::Database(DatabaseError::Sqlite(_))
                | StrideError::Io(_)
                | StrideError::RecalculationInProgress
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StrideError::Parse(ParseError::NonRunActivity { .. }) => ErrorSeverity::Info,
            StrideError::Parse(_) => ErrorSeverity::Warning,
            StrideError::Crop(_) => ErrorSeverity::Warning,
            StrideError::SessionNotFound { .. } => ErrorSeverity::Warning,
            StrideError::RecalculationInProgress => ErrorSeverity::Warning,
            StrideError::Database(DatabaseError::Corrupt { .. }) => ErrorSeverity::Critical,
            StrideError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            StrideError::Parse(ParseError::InsufficientPoints { found }) => format!(
                "The file contains {} usable point(s); a run needs at least two.",
                found
            ),
            StrideError::Parse(ParseError::MalformedFile { format, .. }) => {
                format!("The {} file could not be read. It may be corrupted.", format)
            }
            StrideError::Crop(CropError::NoTrimmableData) => {
                "This run has no recorded data that can be trimmed.".to_string()
            }
            StrideError::Crop(CropError::Validation { reason }) => {
                format!("Cannot trim this run: {}", reason)
            }
            StrideError::RecalculationInProgress => {
                "A recalculation is already running. Try again when it finishes.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = StrideError::Parse(ParseError::InsufficientPoints { found: 1 });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = StrideError::Internal("test".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = StrideError::Parse(ParseError::NonRunActivity {
            activity_type: "Ride".to_string(),
        });
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_error_retryable() {
        assert!(StrideError::RecalculationInProgress.is_retryable());
        assert!(!StrideError::Crop(CropError::NoTrimmableData).is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err: StrideError = ParseError::InsufficientPoints { found: 1 }.into();
        assert!(err.user_message().contains("at least two"));

        let err: StrideError = CropError::Validation {
            reason: "trim exceeds duration".to_string(),
        }
        .into();
        assert!(err.user_message().contains("trim exceeds duration"));
    }

    #[test]
    fn test_calculation_error_converts_into_crop_error() {
        let err: CropError = CalculationError::invalid_value("elevation", f64::NAN).into();
        assert!(matches!(err, CropError::Derivation(_)));
    }
}
