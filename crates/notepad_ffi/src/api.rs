//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose note use-cases (add, delete, delete-all, list, live list) to Dart.
//! - Own the single process-wide database handle behind the bridge.
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - Failures come back as envelopes with `ok=false` and a message.
//! - Live lists are polled: `poll_notes` returns only the newest snapshot.

use log::warn;
use notepad_core::{
    init_logging as init_logging_inner, open_notes_database, Database, Note, NoteService,
    NoteServiceError, Subscription,
};
use once_cell::sync::{Lazy, OnceCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

const DB_FILE_NAME: &str = "notepad.sqlite3";
const DB_PATH_ENV: &str = "NOTEPAD_DB_PATH";

static STORE: OnceCell<StoreHandle> = OnceCell::new();
static SUBSCRIPTIONS: Lazy<Mutex<BTreeMap<u64, Subscription<Note>>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

struct StoreHandle {
    path: PathBuf,
    db: Database,
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Sync call; may perform small file-system setup work.
/// - Idempotent for the same `level + log_dir`; conflicting calls fail.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Opens the notes database at `db_path`.
///
/// An empty `db_path` falls back to `NOTEPAD_DB_PATH`, then to
/// `notepad.sqlite3` in the system temp directory.
///
/// # FFI contract
/// - Sync call; opens the file and checks its schema.
/// - Idempotent for the same path; a different path after init fails.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_store(db_path: String) -> String {
    let trimmed = db_path.trim();
    let resolved = if trimmed.is_empty() {
        default_db_path()
    } else {
        ensure_absolute(PathBuf::from(trimmed))
    };
    let path = match resolved {
        Ok(path) => path,
        Err(err) => return err,
    };

    match STORE.get_or_try_init(|| open_store(&path)) {
        Ok(handle) if handle.path == path => String::new(),
        Ok(handle) => format!(
            "store already initialized at `{}`; refusing to switch to `{}`",
            handle.path.display(),
            path.display()
        ),
        Err(err) => err,
    }
}

/// One note row as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteItem {
    /// Stable note id, used as the list key.
    pub id: String,
    pub title: String,
    pub desc: Option<String>,
    /// Creation time in epoch milliseconds.
    pub created_at_ms: i64,
}

/// Result envelope for note mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteActionResponse {
    pub ok: bool,
    /// Created or deleted note id, when there is exactly one.
    pub note_id: Option<String>,
    /// Human-readable message for diagnostics/UI.
    pub message: String,
}

impl NoteActionResponse {
    fn success(message: impl Into<String>, note_id: Option<String>) -> Self {
        Self {
            ok: true,
            note_id,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            note_id: None,
            message: message.into(),
        }
    }
}

/// Result envelope for one-shot note listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesListResponse {
    pub ok: bool,
    pub items: Vec<NoteItem>,
    pub message: String,
}

/// Result envelope for `subscribe_notes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSubscribeResponse {
    pub ok: bool,
    pub subscription_id: Option<u64>,
    pub message: String,
}

/// Result envelope for `poll_notes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesPollResponse {
    pub ok: bool,
    /// `true` when `items` holds a snapshot newer than the last poll.
    pub changed: bool,
    pub items: Vec<NoteItem>,
    pub message: String,
}

/// Adds a note with `title` and optional `desc`.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - Blank titles are rejected without writing.
/// - Returns the created note id on success.
#[flutter_rust_bridge::frb(sync)]
pub fn add_note(title: String, desc: String) -> NoteActionResponse {
    match with_service(|service| service.add_note(&title, &desc)) {
        Ok(note) => NoteActionResponse::success("Note added.", Some(note.id().to_string())),
        Err(err) => failed_action("add_note", err),
    }
}

/// Permanently deletes the note with `note_id`.
#[flutter_rust_bridge::frb(sync)]
pub fn delete_note(note_id: String) -> NoteActionResponse {
    let Ok(id) = Uuid::parse_str(note_id.trim()) else {
        return NoteActionResponse::failure(format!("delete_note failed: invalid note id `{note_id}`"));
    };
    match with_service(|service| service.delete_note(id)) {
        Ok(()) => NoteActionResponse::success("Note deleted.", Some(id.to_string())),
        Err(err) => failed_action("delete_note", err),
    }
}

/// Permanently deletes every note in one transaction.
#[flutter_rust_bridge::frb(sync)]
pub fn delete_all_notes() -> NoteActionResponse {
    match with_service(NoteService::delete_all_notes) {
        Ok(count) => NoteActionResponse::success(format!("Deleted {count} note(s)."), None),
        Err(err) => failed_action("delete_all_notes", err),
    }
}

/// Returns every note in creation order.
#[flutter_rust_bridge::frb(sync)]
pub fn list_notes() -> NotesListResponse {
    match with_service(|service| service.list_notes().map_err(NoteServiceError::from)) {
        Ok(notes) => NotesListResponse {
            message: format!("Found {} note(s).", notes.len()),
            items: notes.iter().map(to_note_item).collect(),
            ok: true,
        },
        Err(err) => NotesListResponse {
            ok: false,
            items: Vec::new(),
            message: format!("list_notes failed: {err}"),
        },
    }
}

/// Starts a live note list.
///
/// The first `poll_notes` call returns the current list; later polls return
/// the newest list after each committed change.
#[flutter_rust_bridge::frb(sync)]
pub fn subscribe_notes() -> NoteSubscribeResponse {
    let subscription =
        match with_service(|service| service.subscribe_to_notes().map_err(NoteServiceError::from))
        {
            Ok(subscription) => subscription,
            Err(err) => {
                return NoteSubscribeResponse {
                    ok: false,
                    subscription_id: None,
                    message: format!("subscribe_notes failed: {err}"),
                }
            }
        };

    let subscription_id = subscription.id();
    lock_subscriptions().insert(subscription_id, subscription);
    NoteSubscribeResponse {
        ok: true,
        subscription_id: Some(subscription_id),
        message: "Subscribed.".to_string(),
    }
}

/// Returns the newest pending snapshot for `subscription_id`, if any.
///
/// # FFI contract
/// - Sync call, never blocks on new changes.
/// - `changed=false` means nothing was committed since the previous poll.
#[flutter_rust_bridge::frb(sync)]
pub fn poll_notes(subscription_id: u64) -> NotesPollResponse {
    let subscriptions = lock_subscriptions();
    let Some(subscription) = subscriptions.get(&subscription_id) else {
        return NotesPollResponse {
            ok: false,
            changed: false,
            items: Vec::new(),
            message: format!("poll_notes failed: unknown subscription {subscription_id}"),
        };
    };

    match subscription.latest() {
        Some(snapshot) => NotesPollResponse {
            ok: true,
            changed: true,
            items: snapshot.iter().map(to_note_item).collect(),
            message: format!("Found {} note(s).", snapshot.len()),
        },
        None => NotesPollResponse {
            ok: true,
            changed: false,
            items: Vec::new(),
            message: "No changes.".to_string(),
        },
    }
}

/// Stops the live list for `subscription_id`.
#[flutter_rust_bridge::frb(sync)]
pub fn unsubscribe_notes(subscription_id: u64) -> NoteActionResponse {
    match lock_subscriptions().remove(&subscription_id) {
        Some(subscription) => {
            subscription.unsubscribe();
            NoteActionResponse::success("Unsubscribed.", None)
        }
        None => NoteActionResponse::failure(format!(
            "unsubscribe_notes failed: unknown subscription {subscription_id}"
        )),
    }
}

fn open_store(path: &Path) -> Result<StoreHandle, String> {
    let db = open_notes_database(path)
        .map_err(|err| format!("store open failed at `{}`: {err}", path.display()))?;
    Ok(StoreHandle {
        path: path.to_path_buf(),
        db,
    })
}

fn default_db_path() -> Result<PathBuf, String> {
    db_path_from_env(std::env::var(DB_PATH_ENV).ok())
}

fn db_path_from_env(raw: Option<String>) -> Result<PathBuf, String> {
    match raw.as_deref().map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => ensure_absolute(PathBuf::from(trimmed)),
        _ => Ok(std::env::temp_dir().join(DB_FILE_NAME)),
    }
}

fn ensure_absolute(path: PathBuf) -> Result<PathBuf, String> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(format!(
            "db_path must be an absolute path, got `{}`",
            path.display()
        ))
    }
}

fn store() -> Result<&'static StoreHandle, String> {
    STORE.get_or_try_init(|| open_store(&default_db_path()?))
}

fn with_service<T>(
    f: impl FnOnce(&NoteService<'static>) -> Result<T, NoteServiceError>,
) -> Result<T, String> {
    let handle = store()?;
    let service = NoteService::new(&handle.db);
    f(&service).map_err(|err| err.to_string())
}

fn failed_action(operation: &str, message: String) -> NoteActionResponse {
    warn!("event={operation} module=ffi status=error error={message}");
    NoteActionResponse::failure(format!("{operation} failed: {message}"))
}

fn lock_subscriptions() -> std::sync::MutexGuard<'static, BTreeMap<u64, Subscription<Note>>> {
    SUBSCRIPTIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn to_note_item(note: &Note) -> NoteItem {
    NoteItem {
        id: note.id().to_string(),
        title: note.title.clone(),
        desc: note.desc.clone(),
        created_at_ms: note.created_at(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        add_note, db_path_from_env, delete_all_notes, delete_note, init_logging, init_store,
        list_notes, poll_notes, store, subscribe_notes, unsubscribe_notes, DB_FILE_NAME,
    };
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Tests share the process-wide store; delete-all must not race the others.
    static STORE_TESTS: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        STORE_TESTS.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(error.contains("unsupported log level"));
    }

    #[test]
    fn init_store_rejects_relative_path() {
        let error = init_store("notes.sqlite3".to_string());
        assert!(error.contains("absolute"));
    }

    #[test]
    fn init_store_is_idempotent_for_active_path() {
        let _serial = serial();
        let active = store().expect("store should open").path.clone();
        let error = init_store(active.to_str().unwrap().to_string());
        assert!(error.is_empty(), "{error}");
    }

    #[test]
    fn add_list_and_delete_note() {
        let _serial = serial();
        let title = unique_token("ffi-add");
        let created = add_note(title.clone(), "2%".to_string());
        assert!(created.ok, "{}", created.message);
        let note_id = created.note_id.expect("created note should return note_id");

        let listed = list_notes();
        assert!(listed.ok, "{}", listed.message);
        let item = listed
            .items
            .iter()
            .find(|item| item.id == note_id)
            .expect("created note should be listed");
        assert_eq!(item.title, title);
        assert_eq!(item.desc.as_deref(), Some("2%"));

        let deleted = delete_note(note_id.clone());
        assert!(deleted.ok, "{}", deleted.message);
        assert!(!list_notes().items.iter().any(|item| item.id == note_id));

        let again = delete_note(note_id);
        assert!(!again.ok);
        assert!(again.message.contains("not found"));
    }

    #[test]
    fn add_note_persists_row_in_store_file() {
        let _serial = serial();
        let title = unique_token("ffi-file");
        let created = add_note(title.clone(), String::new());
        assert!(created.ok, "{}", created.message);
        let note_id = created.note_id.unwrap();

        let path = store().unwrap().path.clone();
        let conn = rusqlite::Connection::open(path).expect("open db");
        let (stored_title, stored_desc): (String, Option<String>) = conn
            .query_row(
                "SELECT title, \"desc\" FROM notes WHERE id = ?1",
                [note_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("query note row");
        assert_eq!(stored_title, title);
        assert_eq!(stored_desc, None);
    }

    #[test]
    fn add_note_rejects_blank_title() {
        let response = add_note("   ".to_string(), "desc".to_string());
        assert!(!response.ok);
        assert!(response.message.contains("title"));
    }

    #[test]
    fn delete_note_rejects_malformed_id() {
        let response = delete_note("not-a-uuid".to_string());
        assert!(!response.ok);
        assert!(response.message.contains("invalid note id"));
    }

    #[test]
    fn subscribe_poll_and_unsubscribe() {
        let _serial = serial();
        let subscribed = subscribe_notes();
        assert!(subscribed.ok, "{}", subscribed.message);
        let subscription_id = subscribed.subscription_id.unwrap();

        let initial = poll_notes(subscription_id);
        assert!(initial.ok && initial.changed);

        let created = add_note(unique_token("ffi-live"), String::new());
        let note_id = created.note_id.unwrap();
        let after = poll_notes(subscription_id);
        assert!(after.changed);
        assert!(after.items.iter().any(|item| item.id == note_id));

        assert!(unsubscribe_notes(subscription_id).ok);
        assert!(!poll_notes(subscription_id).ok);
        assert!(!unsubscribe_notes(subscription_id).ok);
    }

    #[test]
    fn env_db_path_must_be_absolute() {
        let error = db_path_from_env(Some("relative/notes.sqlite3".to_string())).unwrap_err();
        assert!(error.contains("absolute"));

        let blank = db_path_from_env(Some("   ".to_string())).unwrap();
        assert!(blank.ends_with(DB_FILE_NAME));
        assert!(db_path_from_env(None).unwrap().is_absolute());
    }

    #[test]
    fn delete_all_notes_empties_list_and_live_snapshot() {
        let _serial = serial();
        let created = ["ffi-all-a", "ffi-all-b"]
            .into_iter()
            .map(|prefix| {
                let response = add_note(unique_token(prefix), String::new());
                assert!(response.ok, "{}", response.message);
                response.note_id.unwrap()
            })
            .collect::<Vec<_>>();

        let subscription_id = subscribe_notes().subscription_id.unwrap();
        let before = poll_notes(subscription_id);
        assert!(created
            .iter()
            .all(|id| before.items.iter().any(|item| &item.id == id)));

        let deleted = delete_all_notes();
        assert!(deleted.ok, "{}", deleted.message);
        assert!(deleted.note_id.is_none());

        let listed = list_notes();
        assert!(listed.ok, "{}", listed.message);
        assert!(!listed.items.iter().any(|item| created.contains(&item.id)));

        let after = poll_notes(subscription_id);
        assert!(after.ok && after.changed);
        assert!(after.items.is_empty());

        assert!(unsubscribe_notes(subscription_id).ok);
    }

    fn unique_token(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }
}
