use thiserror::Error;

use crate::models::Table;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while fetching
/// rosters from the upstream API and persisting them into the record store.
/// It uses the `thiserror` crate for ergonomic error handling and automatic
/// conversion from underlying library errors.
///
/// # Error Conversion
///
/// Most errors automatically convert from their source types using the `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```no_run
/// use roster_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// This error wraps all errors from SQLx database operations, including
    /// connection failures, query errors, and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP client request failed.
    ///
    /// This error occurs when HTTP requests fail due to network issues,
    /// timeouts, or server errors.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// A lookup table (Country, State, LearningArea, YearLevel) could not be read.
    ///
    /// Fatal to a sync run: nothing is written once this is returned.
    #[error("Error reading lookups: {0}")]
    LookupRead(String),

    /// The school existence check or the school insert failed.
    #[error("School resolution failed: {0}")]
    Resolution(String),

    /// A batch write failed part-way through an entity type.
    ///
    /// `written` counts the records committed before the failing batch.
    /// Those records are not rolled back.
    #[error("error saving to {table}: {message} ({written} records written before failure)")]
    Persistence {
        table: Table,
        written: usize,
        message: String,
    },

    /// A record store backend failed for a reason other than SQL.
    #[error("Record store error: {0}")]
    Store(String),

    /// An invocation body was missing fields or malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL or use --dry-run.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ClientError(msg) => {
                if msg.contains("401") || msg.contains("403") {
                    "The roster API rejected the token.\n   Check your WONDE_API_TOKEN environment variable.".to_string()
                } else if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The roster API may be slow or unreachable.\n   Try again later.".to_string()
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!("Request timed out after {} seconds.\n   The server may be overloaded. Try again later.", secs)
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::LookupRead(msg) => {
                format!(
                    "Error reading lookups: {}\n   Seed them first with: roster-sync seed-lookups <file>",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use roster_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::Resolution("duplicate".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ClientError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_error() {
        let err = AppError::Generic("Something went wrong".to_string());
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_persistence_error_display() {
        let err = AppError::Persistence {
            table: Table::User,
            written: 50,
            message: "throughput exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "error saving to User: throughput exceeded (50 records written before failure)"
        );
    }

    #[test]
    fn test_lookup_read_user_message() {
        let err = AppError::LookupRead("table Country missing".to_string());
        assert!(err.user_message().contains("seed-lookups"));
    }

    #[test]
    fn test_user_message_auth() {
        let err = AppError::ClientError("HTTP 401 from https://api".to_string());
        assert!(err.user_message().contains("WONDE_API_TOKEN"));
    }

    #[test]
    fn test_error_from_serde() {
        let result: Result<serde_json::Value, _> = serde_json::from_str("{ invalid json }");
        let app_err: AppError = result.unwrap_err().into();
        assert!(matches!(app_err, AppError::SerializationError(_)));
    }

    #[test]
    fn test_user_message_database_connection() {
        let err = AppError::DatabaseError(sqlx::Error::PoolTimedOut);
        let msg = err.user_message();
        assert!(msg.contains("Cannot connect to database") || msg.contains("Database error"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(AppError::NetworkError("timeout".to_string()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(!AppError::LookupRead("x".to_string()).is_retryable());
        assert!(!AppError::InvalidRequest("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_timeout_error() {
        let err = AppError::Timeout(30);
        assert_eq!(err.to_string(), "Request timed out after 30 seconds");
    }
}
