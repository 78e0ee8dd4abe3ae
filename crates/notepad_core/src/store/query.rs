//! Query builder over one collection.
//!
//! # Invariants
//! - Filter and sort columns are checked against the table schema before
//!   any SQL runs.
//! - Results without an explicit order come back in insertion order; an
//!   explicit order falls back to insertion order for ties.
//! - Equality filters use `IS`, so filtering on `NULL` matches absent values.
//! - A filter value that cannot be bound fails the query, not the builder.

use super::{Database, StoreError, StoreResult, Subscription};
use crate::model::{Model, RawRecord, RecordId};
use crate::schema::{quote_ident, TableSchema, ID_COLUMN};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::marker::PhantomData;
use uuid::Uuid;

/// Sort direction for `Query::sort_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Untyped query description shared by fetches and live observers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuerySpec {
    pub(crate) table: &'static str,
    conditions: Vec<(String, Value)>,
    sort: Vec<(String, SortOrder)>,
}

impl QuerySpec {
    pub(crate) fn new(table: &'static str) -> Self {
        Self {
            table,
            conditions: Vec::new(),
            sort: Vec::new(),
        }
    }

    pub(crate) fn validate(&self, schema: &TableSchema) -> StoreResult<()> {
        let columns = self
            .conditions
            .iter()
            .map(|(column, _)| column)
            .chain(self.sort.iter().map(|(column, _)| column));
        for column in columns {
            if !schema.has_column(column) {
                return Err(StoreError::UnknownColumn {
                    table: self.table,
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Runs the query and decodes every row into `M`.
    pub(crate) fn fetch<M: Model>(&self, conn: &Connection) -> StoreResult<Vec<M>> {
        let mut selected = vec![quote_ident(ID_COLUMN)];
        selected.extend(M::FIELDS.iter().map(|binding| quote_ident(binding.column)));
        let (sql, params) = self.render(&selected.join(", "), true);

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(ID_COLUMN)?;
            let id = parse_record_id(&id_text, self.table)?;
            let mut raw = RawRecord::new();
            for binding in M::FIELDS {
                raw.set(binding.column, row.get::<_, Value>(binding.column)?);
            }
            records.push(M::from_record(id, &raw)?);
        }
        Ok(records)
    }

    pub(crate) fn count(&self, conn: &Connection) -> StoreResult<u64> {
        let (sql, params) = self.render("COUNT(*)", false);
        let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn render(&self, selection: &str, ordered: bool) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {selection} FROM {}", quote_ident(self.table));
        let mut params = Vec::with_capacity(self.conditions.len());

        for (index, (column, value)) in self.conditions.iter().enumerate() {
            sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} IS ?", quote_ident(column)));
            params.push(value.clone());
        }

        if ordered {
            sql.push_str(" ORDER BY ");
            for (column, order) in &self.sort {
                sql.push_str(&format!("{} {}, ", quote_ident(column), order.sql()));
            }
            sql.push_str("rowid ASC");
        }

        sql.push(';');
        (sql, params)
    }
}

/// Typed query over the rows of one collection.
pub struct Query<'db, M: Model> {
    db: &'db Database,
    spec: QuerySpec,
    /// First filter value that failed to convert.
    invalid_filter: Option<String>,
    _model: PhantomData<fn() -> M>,
}

impl<'db, M: Model> Query<'db, M> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            spec: QuerySpec::new(M::TABLE),
            invalid_filter: None,
            _model: PhantomData,
        }
    }

    /// Keeps rows whose `column` equals `value`.
    ///
    /// Accepts anything SQLite can bind: `&str`, `String`, integers,
    /// `Option<T>` (where `None` matches absent values) or a raw `Value`.
    pub fn where_eq(mut self, column: &str, value: impl ToSql) -> Self {
        match owned_value(&value) {
            Ok(value) => self.spec.conditions.push((column.to_string(), value)),
            Err(message) => {
                self.invalid_filter.get_or_insert(format!(
                    "filter on `{}.{column}`: {message}",
                    M::TABLE
                ));
            }
        }
        self
    }

    /// Adds a sort key; earlier keys take precedence.
    pub fn sort_by(mut self, column: &str, order: SortOrder) -> Self {
        self.spec.sort.push((column.to_string(), order));
        self
    }

    /// Returns the current matching rows.
    pub fn fetch(&self) -> StoreResult<Vec<M>> {
        self.validate()?;
        self.db.read(|conn| self.spec.fetch::<M>(conn))
    }

    /// Returns the number of matching rows.
    pub fn fetch_count(&self) -> StoreResult<u64> {
        self.validate()?;
        self.db.read(|conn| self.spec.count(conn))
    }

    /// Subscribes to this query.
    ///
    /// The current snapshot is pending immediately; a new full snapshot
    /// follows every committed write touching this table.
    ///
    /// # Errors
    /// - `InvalidState` when called from inside a write transaction.
    pub fn observe(&self) -> StoreResult<Subscription<M>> {
        self.validate()?;
        self.db.observe::<M>(self.spec.clone())
    }

    fn validate(&self) -> StoreResult<()> {
        if let Some(message) = &self.invalid_filter {
            return Err(StoreError::InvalidData(message.clone()));
        }
        self.spec.validate(self.db.table_schema(M::TABLE)?)
    }
}

fn owned_value(value: &dyn ToSql) -> Result<Value, String> {
    match value.to_sql().map_err(|err| err.to_string())? {
        ToSqlOutput::Borrowed(borrowed) => Ok(Value::from(borrowed)),
        ToSqlOutput::Owned(owned) => Ok(owned),
        _ => Err("unsupported filter value".to_string()),
    }
}

fn parse_record_id(value: &str, table: &str) -> StoreResult<RecordId> {
    Uuid::parse_str(value).map_err(|_| {
        StoreError::InvalidData(format!("invalid id value `{value}` in {table}.{ID_COLUMN}"))
    })
}

#[cfg(test)]
mod tests {
    use super::{owned_value, QuerySpec, SortOrder};
    use rusqlite::types::Value;

    #[test]
    fn owned_value_accepts_literals_and_options() {
        assert_eq!(owned_value(&"pinned"), Ok(Value::Text("pinned".to_string())));
        assert_eq!(owned_value(&"x".to_string()), Ok(Value::Text("x".to_string())));
        assert_eq!(owned_value(&42_i64), Ok(Value::Integer(42)));
        assert_eq!(owned_value(&None::<String>), Ok(Value::Null));
        assert_eq!(owned_value(&Value::Null), Ok(Value::Null));
    }

    #[test]
    fn render_orders_by_sort_keys_then_insertion() {
        let mut spec = QuerySpec::new("notes");
        spec.conditions
            .push(("title".to_string(), Value::Text("Milk".to_string())));
        spec.sort.push(("created_at".to_string(), SortOrder::Desc));

        let (sql, params) = spec.render("\"id\"", true);
        assert_eq!(
            sql,
            "SELECT \"id\" FROM \"notes\" WHERE \"title\" IS ? \
             ORDER BY \"created_at\" DESC, rowid ASC;"
        );
        assert_eq!(params, vec![Value::Text("Milk".to_string())]);
    }

    #[test]
    fn render_count_skips_ordering() {
        let (sql, params) = QuerySpec::new("notes").render("COUNT(*)", false);
        assert_eq!(sql, "SELECT COUNT(*) FROM \"notes\";");
        assert!(params.is_empty());
    }
}
