//! Common error types for the spheroid toolkit

use thiserror::Error;

/// Common result type for spheroid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store and the analysis stages
///
/// Data-quality anomalies (an unmatched barcode, an object without
/// neighbors) are never reported through this type; they show up as
/// absent values in the stage output.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV input could not be read or decoded
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Required configuration value missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Selector resolved to zero measurement definitions (or other lookup miss)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Selector resolved to more definitions than the operation accepts
    #[error("Ambiguous measurement: {0}")]
    AmbiguousMeasurement(String),

    /// Uniqueness constraint violated on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation requires an earlier stage that has not run
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Invalid caller input or malformed stored data
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Map a unique-constraint violation to [`Error::Conflict`], leaving
    /// every other database error untouched.
    pub fn conflict_on_unique(err: sqlx::Error, context: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Conflict(format!("{}: {}", context.into(), db_err.message()))
            }
            _ => Error::Database(err),
        }
    }
}
