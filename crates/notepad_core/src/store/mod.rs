//! Local database handle: collections, write transactions, live queries.
//!
//! # Responsibility
//! - Own the single SQLite connection and mediate every read and write.
//! - Apply mutations atomically inside explicit write transactions.
//! - Push fresh query snapshots to observers after each committed write.
//!
//! # Invariants
//! - Only the thread running `Database::write` may mutate rows, and only
//!   while its closure runs.
//! - Write transactions are serialized by the write gate; nested writes on
//!   the same thread are rejected.
//! - Readers outside the active write wait for it, so they only ever see
//!   committed state.
//! - Observers are notified after commit and before the write gate is
//!   released, so snapshots arrive in commit order.
//! - A rolled-back write notifies nobody.

mod collection;
mod observe;
mod query;

pub use collection::Collection;
pub use observe::{Subscription, SubscriptionId};
pub use query::{Query, SortOrder};

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::{validate_bindings, Model, RecordId};
use crate::schema::{AppSchema, TableSchema};
use log::{debug, info, warn};
use observe::{ObserverRegistry, SnapshotListener, SnapshotSlot};
use query::QuerySpec;
use rusqlite::Connection;
use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error taxonomy.
#[derive(Debug)]
pub enum StoreError {
    /// Persistence failure: SQLite I/O, constraint, or schema mismatch.
    Db(DbError),
    /// Operation requires a different transaction state.
    InvalidState(String),
    NotFound {
        table: &'static str,
        id: RecordId,
    },
    UnknownTable(String),
    UnknownColumn {
        table: &'static str,
        column: String,
    },
    /// Model bindings disagree with the declared schema.
    Binding(String),
    /// Persisted value cannot be decoded into the model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::NotFound { table, id } => write!(f, "record not found: {table}/{id}"),
            Self::UnknownTable(name) => write!(f, "unknown table `{name}`"),
            Self::UnknownColumn { table, column } => {
                write!(f, "unknown column `{column}` in table `{table}`")
            }
            Self::Binding(message) => write!(f, "invalid field binding: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Handle to one local database.
///
/// Construct once at process start, register models, then share by
/// reference (or `Arc`) with every consumer.
pub struct Database {
    schema: AppSchema,
    models: BTreeMap<&'static str, TypeId>,
    conn: Mutex<Connection>,
    write_gate: Mutex<()>,
    writer: Mutex<Option<ThreadId>>,
    touched: Mutex<BTreeSet<&'static str>>,
    observers: Arc<Mutex<ObserverRegistry>>,
}

impl Database {
    /// Opens (or creates) a database file bound to `schema`.
    pub fn open(path: impl AsRef<Path>, schema: AppSchema) -> StoreResult<Self> {
        let conn = open_db(path, &schema)?;
        Ok(Self::with_connection(conn, schema))
    }

    /// Opens an in-memory database bound to `schema`.
    pub fn open_in_memory(schema: AppSchema) -> StoreResult<Self> {
        let conn = open_db_in_memory(&schema)?;
        Ok(Self::with_connection(conn, schema))
    }

    fn with_connection(conn: Connection, schema: AppSchema) -> Self {
        Self {
            schema,
            models: BTreeMap::new(),
            conn: Mutex::new(conn),
            write_gate: Mutex::new(()),
            writer: Mutex::new(None),
            touched: Mutex::new(BTreeSet::new()),
            observers: Arc::new(Mutex::new(ObserverRegistry::default())),
        }
    }

    /// Binds model `M` to its table after validating its field bindings.
    ///
    /// Registering the same model twice is a no-op.
    pub fn register<M: Model>(&mut self) -> StoreResult<()> {
        let table = self.table_schema(M::TABLE)?;
        validate_bindings(table, M::FIELDS)?;

        match self.models.get(M::TABLE) {
            Some(existing) if *existing == TypeId::of::<M>() => Ok(()),
            Some(_) => Err(StoreError::Binding(format!(
                "table `{}` is already bound to another model",
                M::TABLE
            ))),
            None => {
                self.models.insert(M::TABLE, TypeId::of::<M>());
                debug!("event=model_register module=store status=ok table={}", M::TABLE);
                Ok(())
            }
        }
    }

    pub fn schema(&self) -> &AppSchema {
        &self.schema
    }

    /// Returns the collection handle for `table`.
    ///
    /// # Errors
    /// - `UnknownTable` when the schema does not declare `table`.
    /// - `InvalidState` when `M` is not the model registered for `table`.
    pub fn collection<M: Model>(&self, table: &str) -> StoreResult<Collection<'_, M>> {
        self.table_schema(table)?;
        if M::TABLE != table || self.models.get(table) != Some(&TypeId::of::<M>()) {
            return Err(StoreError::InvalidState(format!(
                "no matching model registered for table `{table}`"
            )));
        }
        Ok(Collection::new(self))
    }

    /// Runs `work` as one atomic write transaction.
    ///
    /// Every create, update and destroy issued by `work` on this thread
    /// commits together. When `work` returns an error (or panics) the
    /// transaction rolls back, observers are not notified, and the error is
    /// returned unchanged.
    ///
    /// Reads from other threads wait until the write ends. `work` must not
    /// block on another thread that reads this database (for example by
    /// joining it), or both wait on each other forever.
    ///
    /// # Errors
    /// - `InvalidState` when called from inside another write on this thread.
    /// - Persistence errors from `BEGIN`/`COMMIT`.
    pub fn write<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let current = thread::current().id();
        if self.is_writer(current) {
            return Err(StoreError::InvalidState(
                "write transaction already active on this thread".to_string(),
            )
            .into());
        }

        let _gate = self.lock_gate();
        let started_at = Instant::now();
        self.lock_conn()
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(StoreError::from)?;
        let mut scope = WriteScope::enter(self, current);

        let value = match work() {
            Ok(value) => value,
            Err(err) => {
                drop(scope);
                warn!(
                    "event=db_write module=store status=rolled_back duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        if let Err(err) = scope.commit() {
            drop(scope);
            warn!(
                "event=db_write module=store status=error duration_ms={} error_code=commit_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
        let touched = scope.take_touched();
        drop(scope);

        info!(
            "event=db_write module=store status=ok duration_ms={} tables={}",
            started_at.elapsed().as_millis(),
            touched.iter().copied().collect::<Vec<_>>().join(",")
        );
        self.notify_observers(&touched);
        Ok(value)
    }

    /// Returns whether the calling thread is inside `write`.
    pub fn in_write(&self) -> bool {
        self.is_writer(thread::current().id())
    }

    /// Number of live subscriptions across all tables.
    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    pub(crate) fn table_schema(&self, table: &str) -> StoreResult<&TableSchema> {
        self.schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    /// Runs a read against committed state, or against the active write's
    /// state when called from the writing thread.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        if self.in_write() {
            return f(&self.lock_conn());
        }
        let _gate = self.lock_gate();
        let conn = self.lock_conn();
        f(&conn)
    }

    /// Runs a mutation of `table` inside the active write.
    pub(crate) fn mutate<T>(
        &self,
        table: &'static str,
        operation: &str,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.ensure_writer(table, operation)?;
        let value = f(&self.lock_conn())?;
        lock(&self.touched).insert(table);
        Ok(value)
    }

    pub(crate) fn ensure_writer(&self, table: &str, operation: &str) -> StoreResult<()> {
        if self.in_write() {
            return Ok(());
        }
        Err(StoreError::InvalidState(format!(
            "{operation} on `{table}` requires an active write transaction"
        )))
    }

    /// Registers a live query and delivers its current snapshot.
    pub(crate) fn observe<M: Model>(&self, spec: QuerySpec) -> StoreResult<Subscription<M>> {
        if self.in_write() {
            return Err(StoreError::InvalidState(
                "cannot observe from inside a write transaction".to_string(),
            ));
        }

        let _gate = self.lock_gate();
        let snapshot = spec.fetch::<M>(&self.lock_conn())?;
        let slot = Arc::new(SnapshotSlot::new(snapshot));

        let table = spec.table;
        let listener = SnapshotListener::new(spec, Arc::downgrade(&slot));
        let id = lock(&self.observers).insert(Box::new(listener));
        debug!("event=observe module=store status=ok table={table} subscription_id={id}");
        Ok(Subscription::new(
            id,
            table,
            slot,
            Arc::downgrade(&self.observers),
        ))
    }

    fn notify_observers(&self, touched: &BTreeSet<&'static str>) {
        if touched.is_empty() {
            return;
        }
        let mut registry = lock(&self.observers);
        let conn = self.lock_conn();
        registry.notify(&conn, touched);
    }

    fn is_writer(&self, thread: ThreadId) -> bool {
        *lock(&self.writer) == Some(thread)
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        lock(&self.write_gate)
    }
}

/// Active write transaction on the current thread.
///
/// Dropping an uncommitted scope rolls the transaction back.
struct WriteScope<'db> {
    db: &'db Database,
    committed: bool,
}

impl<'db> WriteScope<'db> {
    fn enter(db: &'db Database, thread: ThreadId) -> Self {
        *lock(&db.writer) = Some(thread);
        lock(&db.touched).clear();
        Self {
            db,
            committed: false,
        }
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.db.lock_conn().execute_batch("COMMIT;")?;
        self.committed = true;
        Ok(())
    }

    fn take_touched(&mut self) -> BTreeSet<&'static str> {
        std::mem::take(&mut *lock(&self.db.touched))
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // Fails harmlessly when SQLite already rolled back on its own.
            let _ = self.db.lock_conn().execute_batch("ROLLBACK;");
            lock(&self.db.touched).clear();
        }
        *lock(&self.db.writer) = None;
    }
}

/// Locks `mutex`, recovering the guard when a previous holder panicked.
///
/// Rollback on unwind keeps the guarded state consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current wall-clock time in Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{Database, StoreError};
    use crate::model::note::Note;
    use crate::schema::app_schema;

    fn notes_db() -> Database {
        let mut db = Database::open_in_memory(app_schema()).unwrap();
        db.register::<Note>().unwrap();
        db
    }

    #[test]
    fn collection_rejects_unknown_table() {
        let db = notes_db();
        let err = db.collection::<Note>("todos").err().unwrap();
        assert!(matches!(err, StoreError::UnknownTable(name) if name == "todos"));
    }

    #[test]
    fn collection_requires_registered_model() {
        let db = Database::open_in_memory(app_schema()).unwrap();
        let err = db.collection::<Note>("notes").err().unwrap();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn nested_write_is_rejected() {
        let db = notes_db();
        let result: Result<(), StoreError> = db.write(|| db.write(|| Ok(())));
        assert!(matches!(result, Err(StoreError::InvalidState(_))));
        assert!(!db.in_write());
    }

    #[test]
    fn in_write_is_scoped_to_the_closure() {
        let db = notes_db();
        assert!(!db.in_write());
        let inside: bool = db.write(|| Ok::<_, StoreError>(db.in_write())).unwrap();
        assert!(inside);
        assert!(!db.in_write());
    }
}
