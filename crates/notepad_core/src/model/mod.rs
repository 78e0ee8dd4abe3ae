//! Record mapping between typed models and table rows.
//!
//! # Responsibility
//! - Define the `Model` contract the store uses to read and write rows.
//! - Describe field-to-column bindings as an explicit table.
//!
//! # Invariants
//! - Bindings are validated against the schema once, at model registration.
//! - Read-only bindings are written on insert and never on update.
//! - The implicit `id` column is owned by the store, never by a binding.

pub mod note;

use crate::schema::{TableSchema, ID_COLUMN};
use crate::store::{StoreError, StoreResult};
use rusqlite::types::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Stable identifier assigned by the store on create.
pub type RecordId = Uuid;

/// Binds one model field to one table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: &'static str,
    pub column: &'static str,
    pub read_only: bool,
}

impl FieldBinding {
    /// Mutable binding, persisted on insert and update.
    pub const fn field(field: &'static str, column: &'static str) -> Self {
        Self {
            field,
            column,
            read_only: false,
        }
    }

    /// Read-only binding, persisted on insert only.
    pub const fn read_only(field: &'static str, column: &'static str) -> Self {
        Self {
            field,
            column,
            read_only: true,
        }
    }
}

/// Column values of one row, keyed by column name. Excludes `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    values: BTreeMap<&'static str, Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) {
        self.values.insert(column, value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Reads a required text column.
    pub fn text(&self, column: &str) -> StoreResult<String> {
        match self.get(column) {
            Some(Value::Text(value)) => Ok(value.clone()),
            other => Err(invalid_value(column, "text", other)),
        }
    }

    /// Reads a nullable text column.
    pub fn optional_text(&self, column: &str) -> StoreResult<Option<String>> {
        match self.get(column) {
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            Some(Value::Null) | None => Ok(None),
            other => Err(invalid_value(column, "text or null", other)),
        }
    }

    /// Reads a required integer column.
    pub fn integer(&self, column: &str) -> StoreResult<i64> {
        match self.get(column) {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(invalid_value(column, "integer", other)),
        }
    }
}

/// Typed view over one row of a table.
///
/// Implementors declare their table and bindings statically; the store
/// handles ids, timestamps, SQL and change notification.
pub trait Model: Clone + Send + 'static {
    /// Table this model is bound to.
    const TABLE: &'static str;
    /// Field-to-column bindings, validated at registration.
    const FIELDS: &'static [FieldBinding];

    fn id(&self) -> RecordId;

    /// Builds a fresh record before caller assignments run.
    ///
    /// `created_at` is the store-allocated creation time in epoch ms.
    fn prepare_create(id: RecordId, created_at: i64) -> Self;

    /// Decodes a persisted row.
    fn from_record(id: RecordId, record: &RawRecord) -> StoreResult<Self>;

    /// Encodes every bound column.
    fn to_record(&self) -> RawRecord;
}

/// Checks `fields` against the declared table shape.
pub(crate) fn validate_bindings(table: &TableSchema, fields: &[FieldBinding]) -> StoreResult<()> {
    let mut seen_fields = BTreeSet::new();
    let mut bound_columns = BTreeSet::new();

    for binding in fields {
        if !seen_fields.insert(binding.field) {
            return Err(StoreError::Binding(format!(
                "field `{}` bound twice for table `{}`",
                binding.field, table.name
            )));
        }
        if binding.column == ID_COLUMN {
            return Err(StoreError::Binding(format!(
                "field `{}` may not bind reserved column `{ID_COLUMN}`",
                binding.field
            )));
        }
        if table.column(binding.column).is_none() {
            return Err(StoreError::Binding(format!(
                "field `{}` binds unknown column `{}.{}`",
                binding.field, table.name, binding.column
            )));
        }
        if !bound_columns.insert(binding.column) {
            return Err(StoreError::Binding(format!(
                "column `{}.{}` bound by more than one field",
                table.name, binding.column
            )));
        }
    }

    if let Some(unbound) = table
        .columns
        .iter()
        .find(|column| !column.is_optional && !bound_columns.contains(column.name))
    {
        return Err(StoreError::Binding(format!(
            "required column `{}.{}` has no field binding",
            table.name, unbound.name
        )));
    }

    Ok(())
}

fn invalid_value(column: &str, expected: &str, actual: Option<&Value>) -> StoreError {
    let actual = match actual {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Integer(_)) => "integer",
        Some(Value::Real(_)) => "real",
        Some(Value::Text(_)) => "text",
        Some(Value::Blob(_)) => "blob",
    };
    StoreError::InvalidData(format!(
        "column `{column}` expected {expected}, found {actual}"
    ))
}

#[cfg(test)]
mod tests {
    use super::{validate_bindings, FieldBinding, RawRecord};
    use crate::schema::app_schema;
    use crate::store::StoreError;
    use rusqlite::types::Value;

    #[test]
    fn validate_bindings_requires_every_required_column() {
        let schema = app_schema();
        let notes = schema.table("notes").unwrap();
        let err = validate_bindings(notes, &[FieldBinding::field("title", "title")]).unwrap_err();
        assert!(matches!(err, StoreError::Binding(message) if message.contains("created_at")));
    }

    #[test]
    fn validate_bindings_rejects_unknown_and_duplicate_columns() {
        let schema = app_schema();
        let notes = schema.table("notes").unwrap();

        let unknown = validate_bindings(
            notes,
            &[
                FieldBinding::field("title", "title"),
                FieldBinding::field("body", "body"),
            ],
        );
        assert!(matches!(unknown, Err(StoreError::Binding(_))));

        let duplicate = validate_bindings(
            notes,
            &[
                FieldBinding::field("title", "title"),
                FieldBinding::field("heading", "title"),
            ],
        );
        assert!(matches!(duplicate, Err(StoreError::Binding(_))));
    }

    #[test]
    fn raw_record_accessors_reject_wrong_types() {
        let mut record = RawRecord::new();
        record.set("title", 7_i64);
        record.set("desc", Value::Null);

        assert!(matches!(
            record.text("title"),
            Err(StoreError::InvalidData(_))
        ));
        assert_eq!(record.optional_text("desc").unwrap(), None);
        assert_eq!(record.integer("title").unwrap(), 7);
    }
}
