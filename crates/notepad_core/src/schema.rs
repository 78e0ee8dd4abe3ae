//! Static table and column descriptors for the local store.
//!
//! # Responsibility
//! - Declare the persisted shape of every table and the schema version.
//! - Render the DDL used to bootstrap a fresh database file.
//!
//! # Invariants
//! - Every table carries an implicit `id TEXT PRIMARY KEY` column.
//! - `id` is reserved and may not be declared as a regular column.
//! - Table and column names are plain identifiers, unique in their scope.
//! - Schema version starts at 1; `0` means "never bootstrapped" on disk.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Implicit primary key column present on every table.
pub const ID_COLUMN: &str = "id";
/// Table holding user notes.
pub const NOTES_TABLE: &str = "notes";
/// Current schema version of the notes application.
pub const SCHEMA_VERSION: u32 = 1;

/// Storage class of one declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    /// Integer or real; timestamps are stored as epoch milliseconds.
    Number,
    Boolean,
}

impl ColumnKind {
    fn sql_type(self) -> &'static str {
        match self {
            Self::String => "TEXT",
            // NUMERIC affinity keeps integers as integers and reals as reals.
            Self::Number => "NUMERIC",
            Self::Boolean => "INTEGER",
        }
    }
}

/// One declared column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub is_optional: bool,
}

impl ColumnSchema {
    /// Declares a required column.
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            is_optional: false,
        }
    }

    /// Marks the column as nullable.
    pub const fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// Declared shape of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: &'static str, columns: Vec<ColumnSchema>) -> Self {
        Self { name, columns }
    }

    /// Looks up a declared column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns whether `name` is the implicit id or a declared column.
    pub fn has_column(&self, name: &str) -> bool {
        name == ID_COLUMN || self.column(name).is_some()
    }

    /// Renders the `CREATE TABLE` statement for this table.
    pub fn create_table_sql(&self) -> String {
        let mut parts = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(ID_COLUMN))];
        for column in &self.columns {
            let null_clause = if column.is_optional { "" } else { " NOT NULL" };
            parts.push(format!(
                "{} {}{null_clause}",
                quote_ident(column.name),
                column.kind.sql_type()
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_ident(self.name),
            parts.join(", ")
        )
    }
}

/// Versioned set of tables consumed once at store initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSchema {
    pub version: u32,
    pub tables: Vec<TableSchema>,
}

impl AppSchema {
    pub fn new(version: u32, tables: Vec<TableSchema>) -> Self {
        Self { version, tables }
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    /// Checks naming and uniqueness rules before the schema touches disk.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.version == 0 {
            return Err(SchemaError::InvalidVersion);
        }

        let mut table_names = BTreeSet::new();
        for table in &self.tables {
            if !is_identifier(table.name) {
                return Err(SchemaError::InvalidIdentifier(table.name.to_string()));
            }
            if !table_names.insert(table.name) {
                return Err(SchemaError::DuplicateTable(table.name.to_string()));
            }

            let mut column_names = BTreeSet::new();
            for column in &table.columns {
                if column.name == ID_COLUMN {
                    return Err(SchemaError::ReservedColumn {
                        table: table.name.to_string(),
                    });
                }
                if !is_identifier(column.name) {
                    return Err(SchemaError::InvalidIdentifier(column.name.to_string()));
                }
                if !column_names.insert(column.name) {
                    return Err(SchemaError::DuplicateColumn {
                        table: table.name.to_string(),
                        column: column.name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Schema used by the notes application.
///
/// `desc` is optional; `created_at` holds epoch milliseconds.
pub fn app_schema() -> AppSchema {
    AppSchema::new(
        SCHEMA_VERSION,
        vec![TableSchema::new(
            NOTES_TABLE,
            vec![
                ColumnSchema::new("title", ColumnKind::String),
                ColumnSchema::new("desc", ColumnKind::String).optional(),
                ColumnSchema::new("created_at", ColumnKind::Number),
            ],
        )],
    )
}

/// Descriptor rule violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidVersion,
    InvalidIdentifier(String),
    DuplicateTable(String),
    DuplicateColumn { table: String, column: String },
    ReservedColumn { table: String },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidVersion => write!(f, "schema version must be at least 1"),
            Self::InvalidIdentifier(name) => write!(f, "invalid schema identifier `{name}`"),
            Self::DuplicateTable(name) => write!(f, "table `{name}` declared twice"),
            Self::DuplicateColumn { table, column } => {
                write!(f, "column `{column}` declared twice in table `{table}`")
            }
            Self::ReservedColumn { table } => {
                write!(f, "table `{table}` declares reserved column `{ID_COLUMN}`")
            }
        }
    }
}

impl Error for SchemaError {}

/// Quotes a validated identifier for use in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::{app_schema, AppSchema, ColumnKind, ColumnSchema, SchemaError, TableSchema};

    #[test]
    fn app_schema_is_valid() {
        let schema = app_schema();
        schema.validate().expect("app schema should validate");
        assert_eq!(schema.version, 1);
        let notes = schema.table("notes").expect("notes table");
        assert!(notes.column("desc").expect("desc column").is_optional);
        assert!(notes.has_column("id"));
    }

    #[test]
    fn create_table_sql_quotes_keyword_columns() {
        let sql = app_schema().tables[0].create_table_sql();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"notes\" (\"id\" TEXT PRIMARY KEY NOT NULL, \
             \"title\" TEXT NOT NULL, \"desc\" TEXT, \"created_at\" NUMERIC NOT NULL);"
        );
    }

    #[test]
    fn validate_rejects_reserved_and_duplicate_columns() {
        let reserved = AppSchema::new(
            1,
            vec![TableSchema::new(
                "notes",
                vec![ColumnSchema::new("id", ColumnKind::String)],
            )],
        );
        assert!(matches!(
            reserved.validate(),
            Err(SchemaError::ReservedColumn { .. })
        ));

        let duplicate = AppSchema::new(
            1,
            vec![TableSchema::new(
                "notes",
                vec![
                    ColumnSchema::new("title", ColumnKind::String),
                    ColumnSchema::new("title", ColumnKind::String),
                ],
            )],
        );
        assert!(matches!(
            duplicate.validate(),
            Err(SchemaError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn validate_rejects_version_zero_and_bad_identifiers() {
        assert_eq!(
            AppSchema::new(0, Vec::new()).validate(),
            Err(SchemaError::InvalidVersion)
        );
        let bad = AppSchema::new(1, vec![TableSchema::new("no tes", Vec::new())]);
        assert!(matches!(
            bad.validate(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }
}
