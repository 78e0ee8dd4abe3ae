//! Note entity bound to the `notes` table.
//!
//! # Invariants
//! - `id` and `created_at` are set once by the store and never change.
//! - `title`/`desc` are only persisted through a write transaction.
//! - No content validation here; callers decide what a valid title is.

use crate::model::{FieldBinding, Model, RawRecord, RecordId};
use crate::schema::NOTES_TABLE;
use crate::store::StoreResult;
use serde::{Deserialize, Serialize};

const TITLE: &str = "title";
const DESC: &str = "desc";
const CREATED_AT: &str = "created_at";

const NOTE_FIELDS: &[FieldBinding] = &[
    FieldBinding::field("title", TITLE),
    FieldBinding::field("desc", DESC),
    FieldBinding::read_only("created_at", CREATED_AT),
];

/// One persisted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    id: RecordId,
    /// Required, non-empty by convention of the note service.
    pub title: String,
    /// Optional free-form description.
    pub desc: Option<String>,
    /// Unix epoch milliseconds.
    created_at: i64,
}

impl Note {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Creation time in Unix epoch milliseconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl Model for Note {
    const TABLE: &'static str = NOTES_TABLE;
    const FIELDS: &'static [FieldBinding] = NOTE_FIELDS;

    fn id(&self) -> RecordId {
        self.id
    }

    fn prepare_create(id: RecordId, created_at: i64) -> Self {
        Self {
            id,
            title: String::new(),
            desc: None,
            created_at,
        }
    }

    fn from_record(id: RecordId, record: &RawRecord) -> StoreResult<Self> {
        Ok(Self {
            id,
            title: record.text(TITLE)?,
            desc: record.optional_text(DESC)?,
            created_at: record.integer(CREATED_AT)?,
        })
    }

    fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new();
        record.set(TITLE, self.title.clone());
        record.set(DESC, self.desc.clone());
        record.set(CREATED_AT, self.created_at);
        record
    }
}
