use super::row_lock::{RowGuard, RowLocks};
use crate::domain::payment::{NewPayment, Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{LockedPayment, LockedPaymentBox, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    payments: HashMap<PaymentId, Payment>,
    references: HashMap<String, PaymentId>,
}

/// A thread-safe in-memory payment store.
///
/// Rows live in `Arc<RwLock<..>>` so clones share state; locking reads are
/// serialised per row through [`RowLocks`]. Suited to tests and to runs where
/// persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<Tables>>,
    locks: RowLocks,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.payments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, new: NewPayment) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        if tables.references.contains_key(&new.reference) {
            return Err(PaymentError::Conflict(new.reference));
        }

        let payment = Payment::pending(new, Utc::now());
        tables
            .references
            .insert(payment.reference.clone(), payment.id);
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .references
            .get(reference)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn get_with_lock(&self, id: PaymentId) -> Result<Option<LockedPaymentBox>> {
        let guard = self.locks.acquire(id).await;
        let Some(payment) = self.get(id).await? else {
            return Ok(None);
        };

        Ok(Some(Box::new(InMemoryLockedPayment {
            payment,
            tables: self.tables.clone(),
            _guard: guard,
        })))
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables.payments.values().cloned().collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }
}

struct InMemoryLockedPayment {
    payment: Payment,
    tables: Arc<RwLock<Tables>>,
    _guard: RowGuard,
}

#[async_trait]
impl LockedPayment for InMemoryLockedPayment {
    fn payment(&self) -> &Payment {
        &self.payment
    }

    async fn update_status(&mut self, status: PaymentStatus) -> Result<Payment> {
        let mut updated = self.payment.clone();
        updated.transition_to(status, Utc::now())?;

        let mut tables = self.tables.write().await;
        tables.payments.insert(updated.id, updated.clone());
        self.payment = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Currency, PaymentRequest};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn new_payment(reference: &str) -> NewPayment {
        PaymentRequest {
            amount: dec!(100),
            currency: "USD".to_string(),
            reference: reference.to_string(),
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let store = InMemoryPaymentStore::new();
        let created = store.create(new_payment("r1")).await.unwrap();

        assert_eq!(created.status, PaymentStatus::Pending);
        assert_eq!(created.currency, Currency::Usd);

        let by_id = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);

        let by_ref = store.get_by_reference("r1").await.unwrap().unwrap();
        assert_eq!(by_ref.id, created.id);

        assert!(store.get(PaymentId::new()).await.unwrap().is_none());
        assert!(store.get_by_reference("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_rejected() {
        let store = InMemoryPaymentStore::new();
        store.create(new_payment("r1")).await.unwrap();

        let err = store.create(new_payment("r1")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(ref r) if r == "r1"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_locked_update_is_write_once() {
        let store = InMemoryPaymentStore::new();
        let created = store.create(new_payment("r1")).await.unwrap();

        let mut row = store.get_with_lock(created.id).await.unwrap().unwrap();
        let updated = row.update_status(PaymentStatus::Failed).await.unwrap();
        assert_eq!(updated.status, PaymentStatus::Failed);
        assert!(row.update_status(PaymentStatus::Success).await.is_err());
        drop(row);

        let stored = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn test_locking_read_blocks_same_row() {
        let store = InMemoryPaymentStore::new();
        let created = store.create(new_payment("r1")).await.unwrap();

        let held = store.get_with_lock(created.id).await.unwrap().unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let row = store.get_with_lock(created.id).await.unwrap().unwrap();
                row.payment().status
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // Plain reads are not blocked by the row lock.
        assert!(store.get(created.id).await.unwrap().is_some());

        let mut held = held;
        held.update_status(PaymentStatus::Success).await.unwrap();
        drop(held);

        let seen = waiter.await.unwrap();
        assert_eq!(seen, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn test_locking_read_of_missing_row() {
        let store = InMemoryPaymentStore::new();
        assert!(store.get_with_lock(PaymentId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_is_ordered_by_creation() {
        let store = InMemoryPaymentStore::new();
        let first = store.create(new_payment("a")).await.unwrap();
        let second = store.create(new_payment("b")).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|p| p.id == first.id));
        assert!(all.iter().any(|p| p.id == second.id));
        assert!(all[0].created_at <= all[1].created_at);
    }
}
