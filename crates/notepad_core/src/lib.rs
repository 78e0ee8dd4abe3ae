//! Core domain logic for Notepad.
//! Local note storage with write transactions and live queries.

pub mod db;
pub mod logging;
pub mod model;
pub mod schema;
pub mod service;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::note::Note;
pub use model::{FieldBinding, Model, RawRecord, RecordId};
pub use schema::{app_schema, AppSchema, ColumnKind, ColumnSchema, TableSchema};
pub use service::note_service::{
    open_notes_database, open_notes_database_in_memory, NoteService, NoteServiceError,
};
pub use store::{
    Collection, Database, Query, SortOrder, StoreError, StoreResult, Subscription,
    SubscriptionId,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
