//! Error types for the ETL pipeline.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("data fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not parse CSV for {dataset}: no encoding/delimiter combination yields more than one column")]
    CsvFormat { dataset: String },

    #[error("CSV error in {dataset}: {source}")]
    Csv {
        dataset: String,
        #[source]
        source: csv::Error,
    },

    #[error("comunidad autónoma '{region}' not found; run the geography seeding first")]
    RegionNotSeeded { region: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("migration source {} is not a directory", .0.display())]
    MigrationSource(PathBuf),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_SCHEMA must be a plain SQL identifier, got {0:?}")]
    InvalidSchema(String),

    #[error("invalid DATABASE_URL: {0}")]
    InvalidDatabaseUrl(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("administración not found: {0}")]
    NotFound(Uuid),

    #[error("administración {0} already exists")]
    Duplicate(Uuid),

    #[error("parent {parent} of {id} is not in the hierarchy")]
    UnknownParent { id: Uuid, parent: Uuid },

    #[error("making {parent} the parent of {id} would introduce a cycle")]
    Cycle { id: Uuid, parent: Uuid },

    #[error("administración {0} is already closed")]
    AlreadyClosed(Uuid),
}

/// Row-level failure while turning a source row into an envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("field '{field}' exceeds {max} characters ({len})")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
