//! Live query registry and subscription handles.
//!
//! # Responsibility
//! - Track active live queries per table.
//! - Re-run affected queries after a commit and publish full snapshots.
//!
//! # Invariants
//! - An entry exists exactly as long as its `Subscription` is alive.
//! - Once `unsubscribe` (or drop) returns, no further snapshot is delivered.
//! - Each subscription holds at most one pending snapshot; a newer commit
//!   replaces an unread one.
//! - Entries whose subscription vanished are pruned on the next notification.

use super::query::QuerySpec;
use crate::model::Model;
use log::{debug, error};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Identifier of one live subscription, unique per database handle.
pub type SubscriptionId = u64;

/// Type-erased observer kept in the registry.
pub(crate) trait Listener: Send {
    fn table(&self) -> &'static str;

    /// Re-runs the query and publishes the snapshot.
    ///
    /// Returns `false` once the subscription is gone.
    fn deliver(&self, conn: &Connection) -> bool;
}

/// Single-slot mailbox shared by a listener and its subscription.
pub(crate) struct SnapshotSlot<M> {
    state: Mutex<SlotState<M>>,
    ready: Condvar,
}

struct SlotState<M> {
    pending: Option<Vec<M>>,
    closed: bool,
}

impl<M> SnapshotSlot<M> {
    pub(crate) fn new(initial: Vec<M>) -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: Some(initial),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, snapshot: Vec<M>) {
        self.lock().pending = Some(snapshot);
        self.ready.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn take(&self) -> Option<Vec<M>> {
        self.lock().pending.take()
    }

    /// Waits for a snapshot until `deadline` (forever when `None`).
    ///
    /// Returns `None` on timeout or once the slot is closed and drained.
    fn wait(&self, deadline: Option<Instant>) -> Option<Vec<M>> {
        let mut state = self.lock();
        loop {
            if let Some(snapshot) = state.pending.take() {
                return Some(snapshot);
            }
            if state.closed {
                return None;
            }
            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.checked_duration_since(Instant::now())?;
                    self.ready
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct SnapshotListener<M: Model> {
    spec: QuerySpec,
    slot: Weak<SnapshotSlot<M>>,
}

impl<M: Model> SnapshotListener<M> {
    pub(crate) fn new(spec: QuerySpec, slot: Weak<SnapshotSlot<M>>) -> Self {
        Self { spec, slot }
    }
}

impl<M: Model> Listener for SnapshotListener<M> {
    fn table(&self) -> &'static str {
        self.spec.table
    }

    fn deliver(&self, conn: &Connection) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        match self.spec.fetch::<M>(conn) {
            Ok(snapshot) => slot.publish(snapshot),
            Err(err) => {
                // Keep the subscription; the next commit retries the query.
                error!(
                    "event=observe_refresh module=store status=error table={} error={}",
                    self.spec.table, err
                );
            }
        }
        true
    }
}

impl<M: Model> Drop for SnapshotListener<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.close();
        }
    }
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: SubscriptionId,
    entries: BTreeMap<SubscriptionId, Box<dyn Listener>>,
}

impl ObserverRegistry {
    pub(crate) fn insert(&mut self, listener: Box<dyn Listener>) -> SubscriptionId {
        self.next_id += 1;
        self.entries.insert(self.next_id, listener);
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Pushes fresh snapshots to every observer of a touched table.
    pub(crate) fn notify(&mut self, conn: &Connection, touched: &BTreeSet<&'static str>) {
        let stale = self
            .entries
            .iter()
            .filter(|(_, listener)| touched.contains(listener.table()))
            .filter(|(_, listener)| !listener.deliver(conn))
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        for id in stale {
            self.entries.remove(&id);
            debug!("event=observe_prune module=store status=ok subscription_id={id}");
        }
    }
}

/// Live view of a query's newest committed result.
///
/// Holds at most one pending snapshot. A commit that lands before the
/// pending one is read replaces it, so readers always get the newest state
/// and never a backlog. Dropping the handle unsubscribes.
pub struct Subscription<M: Model> {
    id: SubscriptionId,
    table: &'static str,
    slot: Arc<SnapshotSlot<M>>,
    registry: Weak<Mutex<ObserverRegistry>>,
}

impl<M: Model> Subscription<M> {
    pub(crate) fn new(
        id: SubscriptionId,
        table: &'static str,
        slot: Arc<SnapshotSlot<M>>,
        registry: Weak<Mutex<ObserverRegistry>>,
    ) -> Self {
        Self {
            id,
            table,
            slot,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Blocks until a snapshot is pending.
    ///
    /// Returns `None` once the database handle is gone.
    pub fn recv(&self) -> Option<Vec<M>> {
        self.slot.wait(None)
    }

    /// Takes the pending snapshot without blocking.
    pub fn try_recv(&self) -> Option<Vec<M>> {
        self.slot.take()
    }

    /// Waits up to `timeout` for a pending snapshot.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<M>> {
        self.slot.wait(Some(Instant::now() + timeout))
    }

    /// Returns the newest unread snapshot, if any.
    pub fn latest(&self) -> Option<Vec<M>> {
        self.try_recv()
    }

    /// Stops delivery and releases the registry entry.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.id);
        if removed {
            debug!(
                "event=unsubscribe module=store status=ok table={} subscription_id={}",
                self.table, self.id
            );
        }
    }
}

impl<M: Model> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.detach();
    }
}
