//! Schema bootstrap and on-disk version/shape checks.
//!
//! # Responsibility
//! - Create declared tables atomically on a never-bootstrapped database.
//! - Reject databases whose version or table shape disagrees with the schema.
//!
//! # Invariants
//! - `PRAGMA user_version` mirrors `AppSchema::version` after bootstrap.
//! - Only version 1 exists; older non-zero versions are never migrated.

use crate::db::{DbError, DbResult};
use crate::schema::{quote_ident, AppSchema, ID_COLUMN};
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Creates or verifies every table declared by `schema`.
pub fn apply_schema(conn: &mut Connection, schema: &AppSchema) -> DbResult<()> {
    let current_version = current_user_version(conn)?;

    if current_version > schema.version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: schema.version,
        });
    }

    if current_version == 0 {
        let tx = conn.transaction()?;
        for table in &schema.tables {
            tx.execute_batch(&table.create_table_sql())?;
        }
        tx.execute_batch(&format!("PRAGMA user_version = {};", schema.version))?;
        tx.commit()?;
    } else if current_version < schema.version {
        return Err(DbError::MigrationRequired {
            db_version: current_version,
            schema_version: schema.version,
        });
    }

    verify_shape(conn, schema)
}

/// Returns the schema version recorded in the database file.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn verify_shape(conn: &Connection, schema: &AppSchema) -> DbResult<()> {
    for table in &schema.tables {
        let existing = table_columns(conn, table.name)?;
        if existing.is_empty() {
            return Err(DbError::ShapeMismatch {
                table: table.name.to_string(),
                detail: "table is missing".to_string(),
            });
        }

        let expected =
            std::iter::once(ID_COLUMN).chain(table.columns.iter().map(|column| column.name));
        for column in expected {
            if !existing.contains(column) {
                return Err(DbError::ShapeMismatch {
                    table: table.name.to_string(),
                    detail: format!("column `{column}` is missing"),
                });
            }
        }
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeSet::new();
    while let Some(row) = rows.next()? {
        columns.insert(row.get::<_, String>("name")?);
    }
    Ok(columns)
}
