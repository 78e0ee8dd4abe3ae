//! Typed collection handle: lookups and row mutations for one table.
//!
//! # Invariants
//! - `create`, `update` and the destroy operations only run inside an active
//!   write transaction on the calling thread.
//! - Ids and creation timestamps are allocated here, never by callers.
//! - Updates never write read-only bindings.

use super::query::Query;
use super::{now_epoch_ms, Database, StoreError, StoreResult};
use crate::model::{Model, RecordId};
use crate::schema::{quote_ident, ID_COLUMN};
use log::debug;
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use std::marker::PhantomData;
use uuid::Uuid;

/// Queryable handle for every row of one table.
pub struct Collection<'db, M: Model> {
    db: &'db Database,
    _model: PhantomData<fn() -> M>,
}

impl<'db, M: Model> Collection<'db, M> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            _model: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        M::TABLE
    }

    /// Starts an unfiltered query over this collection.
    pub fn query(&self) -> Query<'db, M> {
        Query::new(self.db)
    }

    /// Loads one record by id.
    pub fn find(&self, id: RecordId) -> StoreResult<M> {
        self.query()
            .where_eq(ID_COLUMN, id.to_string())
            .fetch()?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound {
                table: M::TABLE,
                id,
            })
    }

    /// Creates a record with a fresh id and creation timestamp.
    ///
    /// `build` assigns the initial field values before the insert.
    pub fn create(&self, build: impl FnOnce(&mut M)) -> StoreResult<M> {
        self.db.ensure_writer(M::TABLE, "create")?;
        let id = Uuid::new_v4();
        let mut record = M::prepare_create(id, now_epoch_ms());
        build(&mut record);
        let raw = record.to_record();

        self.db.mutate(M::TABLE, "create", |conn| {
            let mut columns = vec![quote_ident(ID_COLUMN)];
            let mut values = vec![Value::Text(id.to_string())];
            for binding in M::FIELDS {
                columns.push(quote_ident(binding.column));
                values.push(raw.get(binding.column).cloned().unwrap_or(Value::Null));
            }
            let placeholders = vec!["?"; columns.len()].join(", ");

            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders});",
                    quote_ident(M::TABLE),
                    columns.join(", ")
                ),
                params_from_iter(values),
            )?;
            debug!("event=record_create module=store status=ok table={}", M::TABLE);
            Ok(record)
        })
    }

    /// Applies `apply` to the persisted record and saves mutable fields.
    ///
    /// # Errors
    /// - `InvalidState` outside a write transaction.
    /// - `NotFound` when the row no longer exists.
    pub fn update(&self, id: RecordId, apply: impl FnOnce(&mut M)) -> StoreResult<M> {
        self.db.ensure_writer(M::TABLE, "update")?;
        let mut record = self.find(id)?;
        apply(&mut record);

        let raw = record.to_record();
        let mutable = M::FIELDS
            .iter()
            .filter(|binding| !binding.read_only)
            .collect::<Vec<_>>();
        if mutable.is_empty() {
            return Ok(record);
        }

        self.db.mutate(M::TABLE, "update", |conn| {
            let assignments = mutable
                .iter()
                .map(|binding| format!("{} = ?", quote_ident(binding.column)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut values = mutable
                .iter()
                .map(|binding| raw.get(binding.column).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>();
            values.push(Value::Text(id.to_string()));

            let changed = conn.execute(
                &format!(
                    "UPDATE {} SET {assignments} WHERE {} = ?;",
                    quote_ident(M::TABLE),
                    quote_ident(ID_COLUMN)
                ),
                params_from_iter(values),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    table: M::TABLE,
                    id,
                });
            }
            Ok(record)
        })
    }

    /// Removes the record's row permanently.
    ///
    /// # Errors
    /// - `InvalidState` outside a write transaction; the row stays intact.
    /// - `NotFound` when the row was already removed.
    pub fn destroy_permanently(&self, record: &M) -> StoreResult<()> {
        self.destroy_by_id(record.id())
    }

    /// Removes the row with `id` permanently.
    pub fn destroy_by_id(&self, id: RecordId) -> StoreResult<()> {
        self.db.mutate(M::TABLE, "destroy", |conn| {
            let changed = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1;",
                    quote_ident(M::TABLE),
                    quote_ident(ID_COLUMN)
                ),
                [id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    table: M::TABLE,
                    id,
                });
            }
            debug!("event=record_destroy module=store status=ok table={}", M::TABLE);
            Ok(())
        })
    }

    /// Destroys every row of a fetched snapshot in the active write.
    ///
    /// Rows run one after another on the write connection, so either all of
    /// them disappear at commit or none do. Returns the number destroyed.
    pub fn destroy_all_permanently(&self) -> StoreResult<usize> {
        self.db.ensure_writer(M::TABLE, "destroy_all")?;
        let snapshot = self.query().fetch()?;
        for record in &snapshot {
            self.destroy_permanently(record)?;
        }
        Ok(snapshot.len())
    }
}
