//! Error types for the MyWoW data layer

use thiserror::Error;

/// Unified error type for store, schema and record operations
#[derive(Debug, Error)]
pub enum MyWowError {
    /// Table name is empty or does not exist in the store
    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    /// An operation was given an empty or malformed value set
    #[error("invalid values: {0}")]
    InvalidValues(String),

    /// A record was constructed without a required field
    #[error("missing data: {0}")]
    MissingData(String),

    /// A record field failed to parse or violates a domain invariant
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A table could not be created, or its live definition drifted
    /// from the registry's expected definition
    #[error("table construction failed: {0}")]
    TableConstruction(String),

    /// A mirror file exists but its header does not match the registry
    #[error("invalid local storage: {0}")]
    InvalidLocalStorage(String),

    /// A table name outside the registry's whitelist was requested
    #[error("invalid data source: {0}")]
    InvalidDataSource(String),

    /// The external market-data fetcher failed
    #[error("market data error: {0}")]
    Api(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MyWowError>;
