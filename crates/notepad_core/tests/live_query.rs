use notepad_core::{open_notes_database_in_memory, Note, NoteService, SortOrder, StoreError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn titles(snapshot: &[Note]) -> Vec<&str> {
    snapshot.iter().map(|note| note.title.as_str()).collect()
}

#[test]
fn subscribe_yields_current_snapshot_immediately() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    service.add_note("existing", "").unwrap();

    let subscription = service.subscribe_to_notes().unwrap();

    let initial = subscription.try_recv().expect("initial snapshot");
    assert_eq!(titles(&initial), vec!["existing"]);
    assert!(subscription.try_recv().is_none());
}

#[test]
fn committed_create_and_destroy_each_emit_a_snapshot() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    let subscription = service.subscribe_to_notes().unwrap();
    assert!(subscription.try_recv().unwrap().is_empty());

    let milk = service.add_note("Milk", "2%").unwrap();
    let after_create = subscription.try_recv().expect("snapshot after create");
    assert_eq!(titles(&after_create), vec!["Milk"]);

    service.delete_note(milk.id()).unwrap();
    let after_delete = subscription.try_recv().expect("snapshot after delete");
    assert!(after_delete.is_empty());
}

#[test]
fn one_write_emits_one_snapshot() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    for title in ["a", "b", "c"] {
        service.add_note(title, "").unwrap();
    }
    let subscription = service.subscribe_to_notes().unwrap();
    subscription.try_recv().unwrap();

    assert_eq!(service.delete_all_notes().unwrap(), 3);

    assert!(subscription.try_recv().unwrap().is_empty());
    assert!(subscription.try_recv().is_none());
}

#[test]
fn rolled_back_write_emits_nothing() {
    let db = open_notes_database_in_memory().unwrap();
    let notes = db.collection::<Note>("notes").unwrap();
    let subscription = notes.query().observe().unwrap();
    subscription.try_recv().unwrap();

    let result: Result<(), StoreError> = db.write(|| {
        notes.create(|n| n.title = "discarded".to_string())?;
        Err(StoreError::InvalidState("cancel".to_string()))
    });

    assert!(result.is_err());
    assert!(subscription.try_recv().is_none());
}

#[test]
fn unsubscribe_stops_delivery_and_releases_entry() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    let kept = service.subscribe_to_notes().unwrap();
    let dropped = service.subscribe_to_notes().unwrap();
    assert_eq!(db.observer_count(), 2);

    dropped.unsubscribe();
    assert_eq!(db.observer_count(), 1);

    service.add_note("after", "").unwrap();
    assert_eq!(kept.latest().map(|snapshot| snapshot.len()), Some(1));

    drop(kept);
    assert_eq!(db.observer_count(), 0);
}

#[test]
fn newer_commit_replaces_unread_snapshot() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    let subscription = service.subscribe_to_notes().unwrap();

    for idx in 0..3 {
        service.add_note(&format!("note {idx}"), "").unwrap();
    }

    let newest = subscription.latest().expect("pending snapshot");
    assert_eq!(titles(&newest), vec!["note 0", "note 1", "note 2"]);
    assert!(subscription.latest().is_none());
}

#[test]
fn undrained_subscription_keeps_at_most_one_snapshot() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    let subscription = service.subscribe_to_notes().unwrap();

    for idx in 0..200 {
        service.add_note(&format!("note {idx}"), "").unwrap();
    }

    let pending = subscription.try_recv().expect("pending snapshot");
    assert_eq!(pending.len(), 200);
    assert!(subscription.try_recv().is_none());
    assert!(subscription.recv_timeout(Duration::from_millis(20)).is_none());
}

#[test]
fn filtered_observer_sees_only_matching_rows() {
    let db = open_notes_database_in_memory().unwrap();
    let service = NoteService::new(&db);
    let notes = db.collection::<Note>("notes").unwrap();
    let pinned = notes
        .query()
        .where_eq("desc", "pinned")
        .sort_by("title", SortOrder::Asc)
        .observe()
        .unwrap();
    assert!(pinned.try_recv().unwrap().is_empty());

    service.add_note("zeta", "pinned").unwrap();
    service.add_note("other", "").unwrap();
    service.add_note("alpha", "pinned").unwrap();

    let newest = pinned.latest().unwrap();
    assert_eq!(titles(&newest), vec!["alpha", "zeta"]);
}

#[test]
fn observe_inside_write_is_invalid_state() {
    let db = open_notes_database_in_memory().unwrap();
    let notes = db.collection::<Note>("notes").unwrap();

    let result = db.write(|| notes.query().observe().map(|_| ()));
    assert!(matches!(result, Err(StoreError::InvalidState(_))));
}

#[test]
fn snapshots_arrive_in_commit_order_across_threads() {
    let db = Arc::new(open_notes_database_in_memory().unwrap());
    let subscription = NoteService::new(&db).subscribe_to_notes().unwrap();
    subscription.recv_timeout(WAIT).unwrap();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let service = NoteService::new(&db);
            for idx in 0..20 {
                service.add_note(&format!("note {idx}"), "").unwrap();
            }
        })
    };

    let mut sizes = Vec::new();
    while sizes.last() != Some(&20) {
        let snapshot = subscription.recv_timeout(WAIT).expect("snapshot in time");
        sizes.push(snapshot.len());
    }
    writer.join().unwrap();

    // Unread snapshots may be replaced, but never by an older one.
    assert!(sizes.windows(2).all(|pair| pair[0] < pair[1]), "{sizes:?}");
    assert!(subscription.try_recv().is_none());
}

#[test]
fn subscription_ends_when_database_is_dropped() {
    let db = open_notes_database_in_memory().unwrap();
    let subscription = NoteService::new(&db).subscribe_to_notes().unwrap();
    subscription.try_recv().unwrap();

    drop(db);

    assert!(subscription.recv().is_none());
}
