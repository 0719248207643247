use super::payment::{NewPayment, Payment, PaymentId, PaymentStatus, ProcessingOutcome};
use crate::error::{BrokerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Durable payment records keyed by identifier.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new `PENDING` payment. Fails with `Conflict` if the
    /// reference is already taken.
    async fn create(&self, new: NewPayment) -> Result<Payment>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn get_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    /// Locking read. Other callers locking the same id wait until the
    /// returned handle is dropped.
    async fn get_with_lock(&self, id: PaymentId) -> Result<Option<LockedPaymentBox>>;
    async fn all(&self) -> Result<Vec<Payment>>;
}

/// A payment row held under its row lock.
#[async_trait]
pub trait LockedPayment: Send {
    fn payment(&self) -> &Payment;
    /// Writes a new status while the lock is still held.
    async fn update_status(&mut self, status: PaymentStatus) -> Result<Payment>;
}

/// Enqueues processing tasks.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, payment_id: PaymentId) -> std::result::Result<(), BrokerError>;
}

/// The external processing effect run once per payment.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn process(&self, payment: &Payment) -> ProcessingOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
        }
    }
}

/// A message handed to a consumer. It stays unacknowledged until settled.
#[async_trait]
pub trait Delivery: Send {
    fn body(&self) -> &[u8];
    fn redelivered(&self) -> bool;
    async fn ack(self: Box<Self>) -> std::result::Result<(), BrokerError>;
    async fn nack(self: Box<Self>, requeue: bool) -> std::result::Result<(), BrokerError>;
}

pub type DeliveryBox = Box<dyn Delivery>;
pub type Subscription = mpsc::Receiver<DeliveryBox>;

/// Queue broker with manual acknowledgement.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn declare_queue(
        &self,
        queue: &str,
        options: QueueOptions,
    ) -> std::result::Result<(), BrokerError>;
    /// Caps the number of unacknowledged deliveries per subscription.
    async fn set_prefetch(&self, count: usize) -> std::result::Result<(), BrokerError>;
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> std::result::Result<Subscription, BrokerError>;
    async fn close(&self) -> std::result::Result<(), BrokerError>;
}

pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type LockedPaymentBox = Box<dyn LockedPayment>;
pub type EventPublisherBox = Box<dyn EventPublisher>;
pub type PaymentProcessorBox = Box<dyn PaymentProcessor>;
pub type MessageBrokerRef = Arc<dyn MessageBroker>;
