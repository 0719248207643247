use super::row_lock::{RowGuard, RowLocks};
use crate::domain::payment::{NewPayment, Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{LockedPayment, LockedPaymentBox, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family holding payments keyed by their 16 identifier bytes.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping a creation reference to its payment identifier.
pub const CF_REFERENCES: &str = "references";

/// A persistent payment store implementation using RocksDB.
///
/// Payments and the reference index live in separate Column Families and are
/// written together in one `WriteBatch`. RocksDB has no row locks of its own,
/// so locking reads go through an in-process [`RowLocks`] table and creates
/// are serialised to keep references unique.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbPaymentStore {
    db: Arc<DB>,
    locks: RowLocks,
    create_lock: Arc<Mutex<()>>,
}

impl RocksDbPaymentStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_references = ColumnFamilyDescriptor::new(CF_REFERENCES, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payments, cf_references])
            .map_err(PaymentError::persistence)?;

        Ok(Self {
            db: Arc::new(db),
            locks: RowLocks::new(),
            create_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, id: PaymentId) -> Result<Option<Payment>> {
        read_payment(&self.db, id)
    }
}

fn column<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        PaymentError::persistence(format!("{name} column family not found"))
    })
}

fn read_payment(db: &DB, id: PaymentId) -> Result<Option<Payment>> {
    let cf = column(db, CF_PAYMENTS)?;
    let Some(bytes) = db
        .get_cf(cf, id.as_bytes())
        .map_err(PaymentError::persistence)?
    else {
        return Ok(None);
    };

    let payment = serde_json::from_slice(&bytes).map_err(PaymentError::persistence)?;
    Ok(Some(payment))
}

fn write_payment(db: &DB, batch: &mut WriteBatch, payment: &Payment) -> Result<()> {
    let cf = column(db, CF_PAYMENTS)?;
    let value = serde_json::to_vec(payment).map_err(PaymentError::persistence)?;
    batch.put_cf(cf, payment.id.as_bytes(), value);
    Ok(())
}

#[async_trait]
impl PaymentStore for RocksDbPaymentStore {
    async fn create(&self, new: NewPayment) -> Result<Payment> {
        let _create = self.create_lock.lock().await;

        let references = column(&self.db, CF_REFERENCES)?;
        let taken = self
            .db
            .get_pinned_cf(references, new.reference.as_bytes())
            .map_err(PaymentError::persistence)?;
        if taken.is_some() {
            return Err(PaymentError::Conflict(new.reference));
        }

        let payment = Payment::pending(new, Utc::now());
        let mut batch = WriteBatch::default();
        write_payment(&self.db, &mut batch, &payment)?;
        batch.put_cf(
            references,
            payment.reference.as_bytes(),
            payment.id.as_bytes(),
        );
        self.db.write(batch).map_err(PaymentError::persistence)?;

        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read(id)
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let cf = column(&self.db, CF_REFERENCES)?;
        let Some(bytes) = self
            .db
            .get_cf(cf, reference.as_bytes())
            .map_err(PaymentError::persistence)?
        else {
            return Ok(None);
        };

        let id: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
            PaymentError::persistence(format!("corrupt reference index entry for {reference:?}"))
        })?;
        self.read(PaymentId::from_bytes(id))
    }

    async fn get_with_lock(&self, id: PaymentId) -> Result<Option<LockedPaymentBox>> {
        let guard = self.locks.acquire(id).await;
        let Some(payment) = self.read(id)? else {
            return Ok(None);
        };

        Ok(Some(Box::new(RocksDbLockedPayment {
            payment,
            db: self.db.clone(),
            _guard: guard,
        })))
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let cf = column(&self.db, CF_PAYMENTS)?;

        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(PaymentError::persistence)?;
            let payment: Payment =
                serde_json::from_slice(&value).map_err(PaymentError::persistence)?;
            payments.push(payment);
        }

        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }
}

struct RocksDbLockedPayment {
    payment: Payment,
    db: Arc<DB>,
    _guard: RowGuard,
}

#[async_trait]
impl LockedPayment for RocksDbLockedPayment {
    fn payment(&self) -> &Payment {
        &self.payment
    }

    async fn update_status(&mut self, status: PaymentStatus) -> Result<Payment> {
        let mut updated = self.payment.clone();
        updated.transition_to(status, Utc::now())?;

        let mut batch = WriteBatch::default();
        write_payment(&self.db, &mut batch, &updated)?;
        self.db.write(batch).map_err(PaymentError::persistence)?;

        self.payment = updated.clone();
        Ok(updated)
    }
}
