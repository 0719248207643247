use crate::domain::payment::PaymentId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<PaymentId, Arc<AsyncMutex<()>>>;

/// Per-row lock table backing the stores' locking reads.
///
/// An entry lives only while someone holds or waits for it.
#[derive(Default, Clone)]
pub struct RowLocks {
    rows: Arc<Mutex<LockTable>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the row is free and returns a guard holding it.
    pub async fn acquire(&self, id: PaymentId) -> RowGuard {
        let row = {
            let mut rows = self.rows.lock();
            rows.entry(id).or_default().clone()
        };
        let guard = row.lock_owned().await;

        RowGuard {
            id,
            guard: Some(guard),
            rows: self.rows.clone(),
        }
    }

    /// Number of rows currently locked or awaited.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the row on drop.
pub struct RowGuard {
    id: PaymentId,
    guard: Option<OwnedMutexGuard<()>>,
    rows: Arc<Mutex<LockTable>>,
}

impl RowGuard {
    pub fn id(&self) -> PaymentId {
        self.id
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut rows = self.rows.lock();
        // Waiters hold their own clone of the mutex, so a count of one means
        // nobody else is interested in this row.
        if rows
            .get(&self.id)
            .is_some_and(|row| Arc::strong_count(row) == 1)
        {
            rows.remove(&self.id);
        }
    }
}
