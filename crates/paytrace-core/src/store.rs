//! In-flight action table
//!
//! Every operation runs inside one critical section. Removal and timer
//! cancellation happen together, which is what makes finalization
//! exactly-once when a timeout races a normal `end`.
//!
//! The lock is never held across an await point or a network call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use paytrace_span::{ActionId, ActionRecord, ActionStatus};

use crate::error::{Result, TelemetryError};
use crate::timeout::TimeoutHandle;

/// How many supervisor-retired ids are remembered.
const TOMBSTONE_CAPACITY: usize = 1024;

/// A tracked action together with its armed timer
#[derive(Debug)]
pub struct ActionContext {
    record: ActionRecord,
    timeout: Option<TimeoutHandle>,
}

impl ActionContext {
    pub fn new(record: ActionRecord) -> Self {
        Self {
            record,
            timeout: None,
        }
    }

    pub fn id(&self) -> ActionId {
        self.record.id
    }

    pub fn record(&self) -> &ActionRecord {
        &self.record
    }

    pub fn into_record(self) -> ActionRecord {
        self.record
    }

    fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.cancel();
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<ActionId, (u64, ActionContext)>,
    order: BTreeMap<u64, ActionId>,
    next_seq: u64,
    tombstones: VecDeque<(ActionId, ActionStatus)>,
}

impl StoreInner {
    fn take(&mut self, id: &ActionId) -> Option<ActionContext> {
        let (seq, mut ctx) = self.entries.remove(id)?;
        self.order.remove(&seq);
        ctx.cancel_timeout();
        Some(ctx)
    }

    fn bury(&mut self, id: ActionId, status: ActionStatus) {
        if self.tombstones.len() == TOMBSTONE_CAPACITY {
            self.tombstones.pop_front();
        }
        self.tombstones.push_back((id, status));
    }
}

/// Concurrent id -> context table of open actions
#[derive(Debug, Default)]
pub struct ActionStore {
    inner: Mutex<StoreInner>,
}

impl ActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the maps half-updated,
    // so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new context. Fails if the id is already open.
    pub fn insert(&self, ctx: ActionContext) -> Result<()> {
        let mut inner = self.lock();
        let id = ctx.id();
        if inner.entries.contains_key(&id) {
            return Err(TelemetryError::DuplicateAction(id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, id);
        inner.entries.insert(id, (seq, ctx));
        Ok(())
    }

    /// Attach the timer for an open action.
    ///
    /// If the action was finalized between insert and arming, the timer is
    /// cancelled right away. Returns whether the timer was attached.
    pub fn arm(&self, id: &ActionId, handle: TimeoutHandle) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(id) {
            Some((_, ctx)) => {
                if let Some(previous) = ctx.timeout.replace(handle) {
                    previous.cancel();
                }
                true
            }
            None => {
                handle.cancel();
                false
            }
        }
    }

    /// Remove an action, cancelling its timer in the same critical section.
    pub fn remove(&self, id: &ActionId) -> Option<ActionContext> {
        self.lock().take(id)
    }

    /// Remove an action on behalf of the timeout supervisor, crash path or
    /// shutdown and remember which status retired it.
    pub fn retire(&self, id: &ActionId, status: ActionStatus) -> Option<ActionContext> {
        let mut inner = self.lock();
        let ctx = inner.take(id)?;
        inner.bury(*id, status);
        Some(ctx)
    }

    /// Status with which the supervisor or crash path retired `id`, if it
    /// did so recently.
    pub fn retired_as(&self, id: &ActionId) -> Option<ActionStatus> {
        self.lock()
            .tombstones
            .iter()
            .rev()
            .find(|(retired, _)| retired == id)
            .map(|(_, status)| *status)
    }

    /// Snapshot of an open action.
    pub fn lookup(&self, id: &ActionId) -> Option<ActionRecord> {
        self.lock()
            .entries
            .get(id)
            .map(|(_, ctx)| ctx.record.clone())
    }

    /// Mutate an open action's record.
    pub fn update<F>(&self, id: &ActionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ActionRecord),
    {
        let mut inner = self.lock();
        let (_, ctx) = inner
            .entries
            .get_mut(id)
            .ok_or(TelemetryError::UnknownAction(*id))?;
        f(&mut ctx.record);
        Ok(())
    }

    /// Retire every open action (oldest first) with `status`, cancelling
    /// all timers.
    pub fn drain(&self, status: ActionStatus) -> Vec<ActionContext> {
        let mut inner = self.lock();
        let ids: Vec<ActionId> = inner.order.values().copied().collect();
        let mut drained = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ctx) = inner.take(&id) {
                inner.bury(id, status);
                drained.push(ctx);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.lock().entries.contains_key(id)
    }
}
