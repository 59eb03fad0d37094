//! Registry of open transactions.
//!
//! Owners lock their transaction one statement at a time, so cleanup can
//! step in between statements and roll back whatever was left open.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::warn;

/// A transaction that can be abandoned by someone other than its owner.
#[async_trait]
pub trait Abandon: Sized + Send + 'static {
    async fn abandon(self) -> StoreResult<()>;
}

type Slot<T> = Arc<AsyncMutex<Option<T>>>;

pub struct TransactionRegistry<T> {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Slot<T>>>,
}

impl<T: Abandon> TransactionRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(self: &Arc<Self>, tx: T) -> RegisteredTransaction<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(AsyncMutex::new(Some(tx)));
        self.live.lock().insert(id, Arc::clone(&slot));
        RegisteredTransaction {
            id,
            slot,
            registry: Arc::clone(self),
        }
    }

    /// Transactions registered and not yet finished.
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, id: u64) {
        self.live.lock().remove(&id);
    }

    /// Rolls back every transaction still open and returns how many were
    /// rolled back. A statement in flight finishes first.
    pub async fn rollback_all(&self) -> u64 {
        let slots: Vec<(u64, Slot<T>)> = self.live.lock().drain().collect();
        let mut rolled_back = 0;
        for (id, slot) in slots {
            let Some(tx) = slot.lock().await.take() else {
                continue;
            };
            match tx.abandon().await {
                Ok(()) => rolled_back += 1,
                Err(err) => warn!(id, error = %err, "transaction rollback failed"),
            }
        }
        rolled_back
    }
}

impl<T: Abandon> Default for TransactionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TransactionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("open", &self.live.lock().len())
            .finish()
    }
}

/// Owner side of a registered transaction. Dropping it unregisters the
/// transaction and drops it.
pub struct RegisteredTransaction<T: Abandon> {
    id: u64,
    slot: Slot<T>,
    registry: Arc<TransactionRegistry<T>>,
}

impl<T: Abandon> RegisteredTransaction<T> {
    /// Locks the transaction for one statement.
    pub async fn lock(&self) -> StoreResult<OwnedMappedMutexGuard<Option<T>, T>> {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        OwnedMutexGuard::try_map(guard, Option::as_mut).map_err(|_| StoreError::RolledBack)
    }

    /// Takes the transaction back to finish it.
    pub async fn take(&self) -> StoreResult<T> {
        let taken = self.slot.lock().await.take();
        self.registry.forget(self.id);
        taken.ok_or(StoreError::RolledBack)
    }
}

impl<T: Abandon> Drop for RegisteredTransaction<T> {
    fn drop(&mut self) {
        self.registry.forget(self.id);
    }
}
