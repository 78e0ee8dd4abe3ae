//! SQLite storage bootstrap and schema version checks.
//!
//! # Responsibility
//! - Open and configure the single SQLite connection used by the store.
//! - Create declared tables on first open and verify their shape afterwards.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - No application data is read or written before the schema check passes.

use crate::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    InvalidSchema(SchemaError),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// On-disk data predates the declared schema and no migration exists.
    MigrationRequired {
        db_version: u32,
        schema_version: u32,
    },
    ShapeMismatch {
        table: String,
        detail: String,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidSchema(err) => write!(f, "invalid schema: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MigrationRequired {
                db_version,
                schema_version,
            } => write!(
                f,
                "database schema version {db_version} requires migration to {schema_version}"
            ),
            Self::ShapeMismatch { table, detail } => {
                write!(f, "table `{table}` does not match schema: {detail}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidSchema(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::MigrationRequired { .. }
            | Self::ShapeMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<SchemaError> for DbError {
    fn from(value: SchemaError) -> Self {
        Self::InvalidSchema(value)
    }
}
