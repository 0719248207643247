use crate::domain::payment::{Payment, PaymentId, PaymentRequest, PaymentStatus};
use crate::domain::ports::{EventPublisherBox, PaymentProcessorBox, PaymentStoreBox};
use crate::error::{PaymentError, Result};
use tracing::{error, info, warn};

/// Business logic for creating, reading and processing payments.
///
/// `PaymentService` owns its collaborators; share it between workers behind
/// an `Arc`.
pub struct PaymentService {
    store: PaymentStoreBox,
    publisher: EventPublisherBox,
    processor: PaymentProcessorBox,
}

impl PaymentService {
    /// Creates a new `PaymentService`.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable payment records.
    /// * `publisher` - Queue that receives a processing task per created payment.
    /// * `processor` - The processing effect run once per payment.
    pub fn new(
        store: PaymentStoreBox,
        publisher: EventPublisherBox,
        processor: PaymentProcessorBox,
    ) -> Self {
        Self {
            store,
            publisher,
            processor,
        }
    }

    /// Validates and records a new payment, then enqueues it for processing.
    ///
    /// A failed publish is logged and otherwise ignored: the payment is
    /// already committed and stays `PENDING` until someone republishes it.
    pub async fn create_payment(&self, request: PaymentRequest) -> Result<Payment> {
        let new = request.validate()?;

        if self.store.get_by_reference(&new.reference).await?.is_some() {
            return Err(PaymentError::Conflict(new.reference));
        }

        let payment = self.store.create(new).await?;
        info!(payment_id = %payment.id, reference = %payment.reference, "Payment created");

        if let Err(e) = self.publisher.publish(payment.id).await {
            // TODO: route through a transactional outbox so this payment is
            // republished instead of staying PENDING forever.
            error!(
                payment_id = %payment.id,
                error = %e,
                "Failed to publish payment for processing"
            );
        }

        Ok(payment)
    }

    pub async fn get_payment(&self, id: &str) -> Result<Payment> {
        let payment_id: PaymentId = id.parse()?;
        self.store
            .get(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        self.store.all().await
    }

    /// Drives one payment out of `PENDING`.
    ///
    /// The row stays locked from the status check until the new status is
    /// written, so concurrent calls for the same id run one after another and
    /// all but the first see a terminal status and return `Ok(())` without
    /// touching anything.
    pub async fn process_payment(&self, id: &str) -> Result<()> {
        let payment_id: PaymentId = id.parse()?;

        let mut row = self
            .store
            .get_with_lock(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;

        let current = row.payment().status;
        if current != PaymentStatus::Pending {
            info!(payment_id = %payment_id, status = %current, "Payment already processed");
            return Ok(());
        }

        let payment = row.payment().clone();
        let outcome = self.processor.process(&payment).await;
        let status = PaymentStatus::from(outcome);

        if let Err(e) = row.update_status(status).await {
            warn!(
                payment_id = %payment_id,
                status = %status,
                error = %e,
                "Failed to record payment status"
            );
            return Err(e);
        }

        info!(payment_id = %payment_id, status = %status, "Payment processed");
        Ok(())
    }
}
