//! Note use-case service.
//!
//! # Responsibility
//! - Provide the add/delete/delete-all/subscribe entry points used by the UI.
//! - Own the note content rules the store does not enforce.
//!
//! # Invariants
//! - A note title must contain non-whitespace characters.
//! - An empty description is persisted as absent.
//! - Every mutation runs in its own write transaction.

use crate::model::note::Note;
use crate::model::RecordId;
use crate::schema::{app_schema, NOTES_TABLE};
use crate::store::{Collection, Database, StoreError, StoreResult, Subscription};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Errors returned by note use-cases.
#[derive(Debug)]
pub enum NoteServiceError {
    EmptyTitle,
    Store(StoreError),
}

impl Display for NoteServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "note title cannot be empty"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for NoteServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyTitle => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for NoteServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Opens the notes database file with the note model registered.
pub fn open_notes_database(path: impl AsRef<Path>) -> StoreResult<Database> {
    let mut db = Database::open(path, app_schema())?;
    db.register::<Note>()?;
    Ok(db)
}

/// Opens an in-memory notes database with the note model registered.
pub fn open_notes_database_in_memory() -> StoreResult<Database> {
    let mut db = Database::open_in_memory(app_schema())?;
    db.register::<Note>()?;
    Ok(db)
}

/// Use-case service over a shared notes database.
pub struct NoteService<'db> {
    db: &'db Database,
}

impl<'db> NoteService<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Creates one note.
    ///
    /// # Contract
    /// - Rejects a blank title with `EmptyTitle` before touching storage.
    /// - Title is stored as given; an empty `desc` is stored as absent.
    pub fn add_note(&self, title: &str, desc: &str) -> Result<Note, NoteServiceError> {
        ensure_title(title)?;
        let notes = self.notes()?;
        let note = self.db.write(|| {
            notes.create(|note| {
                note.title = title.to_string();
                note.desc = normalize_desc(desc);
            })
        })?;
        info!("event=note_add module=service status=ok");
        Ok(note)
    }

    /// Replaces title and description of an existing note.
    pub fn update_note(
        &self,
        id: RecordId,
        title: &str,
        desc: &str,
    ) -> Result<Note, NoteServiceError> {
        ensure_title(title)?;
        let notes = self.notes()?;
        let note = self.db.write(|| {
            notes.update(id, |note| {
                note.title = title.to_string();
                note.desc = normalize_desc(desc);
            })
        })?;
        Ok(note)
    }

    /// Permanently deletes one note.
    ///
    /// Returns `NotFound` when the note is already gone.
    pub fn delete_note(&self, id: RecordId) -> Result<(), NoteServiceError> {
        let notes = self.notes()?;
        self.db.write(|| notes.destroy_by_id(id))?;
        info!("event=note_delete module=service status=ok");
        Ok(())
    }

    /// Permanently deletes every note in one write. Returns the count.
    pub fn delete_all_notes(&self) -> Result<usize, NoteServiceError> {
        let notes = self.notes()?;
        let deleted = self.db.write(|| notes.destroy_all_permanently())?;
        info!("event=note_delete_all module=service status=ok count={deleted}");
        Ok(deleted)
    }

    /// Returns every note in creation order.
    pub fn list_notes(&self) -> StoreResult<Vec<Note>> {
        self.notes()?.query().fetch()
    }

    /// Subscribes to the full note list.
    pub fn subscribe_to_notes(&self) -> StoreResult<Subscription<Note>> {
        self.notes()?.query().observe()
    }

    fn notes(&self) -> StoreResult<Collection<'db, Note>> {
        self.db.collection(NOTES_TABLE)
    }
}

fn ensure_title(title: &str) -> Result<(), NoteServiceError> {
    if title.trim().is_empty() {
        return Err(NoteServiceError::EmptyTitle);
    }
    Ok(())
}

fn normalize_desc(desc: &str) -> Option<String> {
    if desc.is_empty() {
        None
    } else {
        Some(desc.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_desc, open_notes_database_in_memory, NoteService, NoteServiceError};

    #[test]
    fn add_note_rejects_blank_title_without_writing() {
        let db = open_notes_database_in_memory().unwrap();
        let service = NoteService::new(&db);

        let err = service.add_note("   ", "body").unwrap_err();
        assert!(matches!(err, NoteServiceError::EmptyTitle));
        assert!(service.list_notes().unwrap().is_empty());
    }

    #[test]
    fn empty_desc_is_stored_as_absent() {
        assert_eq!(normalize_desc(""), None);
        assert_eq!(normalize_desc(" "), Some(" ".to_string()));
    }
}
