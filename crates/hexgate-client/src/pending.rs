//! Correlation table for outstanding executions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hexgate_common::{CorrelationId, ExecutionResult, GatewayError, Result};
use tokio::sync::oneshot;

/// What a pending execution eventually resolves to.
pub type Outcome = Result<ExecutionResult>;

#[derive(Default)]
struct Inner {
    entries: HashMap<CorrelationId, (u64, oneshot::Sender<Outcome>)>,
    /// Epoch of the live connection, `None` while disconnected.
    live_epoch: Option<u64>,
}

/// Outstanding executions keyed by correlation id.
///
/// Each entry is tagged with the epoch of the connection it was sent on.
/// Insertion is refused unless that epoch is the live one, so a request
/// can never slip in after its connection's drop was processed and then
/// wait forever.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `epoch` as the live connection.
    pub fn open(&self, epoch: u64) {
        self.lock().live_epoch = Some(epoch);
    }

    /// Records a pending execution and returns the receiving end of its slot.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ConnectionLost`] if `epoch` is not the live connection
    /// - [`GatewayError::TooManyPending`] if `limit` entries are outstanding
    pub fn insert(
        &self,
        id: CorrelationId,
        epoch: u64,
        limit: usize,
    ) -> Result<oneshot::Receiver<Outcome>> {
        let mut inner = self.lock();
        if inner.live_epoch != Some(epoch) {
            return Err(GatewayError::ConnectionLost(
                "engine session dropped before the request was sent".to_string(),
            ));
        }
        if inner.entries.len() >= limit {
            return Err(GatewayError::TooManyPending(limit));
        }

        let (tx, rx) = oneshot::channel();
        inner.entries.insert(id, (epoch, tx));
        Ok(rx)
    }

    /// Fills the slot for `id`. Returns `false` if nothing was waiting.
    pub fn resolve(&self, id: CorrelationId, outcome: Outcome) -> bool {
        let entry = self.lock().entries.remove(&id);
        match entry {
            // The waiter may have given up already; the entry is gone either way.
            Some((_, tx)) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fails every execution sent on `epoch` with `ConnectionLost` and closes
    /// the epoch. Returns how many were failed.
    pub fn fail_all(&self, epoch: u64, reason: &str) -> usize {
        let failed: Vec<_> = {
            let mut inner = self.lock();
            if inner.live_epoch == Some(epoch) {
                inner.live_epoch = None;
            }
            let ids: Vec<CorrelationId> = inner
                .entries
                .iter()
                .filter(|(_, (entry_epoch, _))| *entry_epoch == epoch)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.entries.remove(&id))
                .collect()
        };

        let count = failed.len();
        for (_, tx) in failed {
            let _ = tx.send(Err(GatewayError::ConnectionLost(reason.to_string())));
        }
        count
    }

    /// Drops the slot for `id` without resolving it.
    pub fn remove(&self, id: CorrelationId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its entry from the table when dropped.
///
/// Held across the await in `execute`, so a caller that is cancelled or
/// times out frees its slot.
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingTable, id: CorrelationId) -> Self {
        Self { table, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
