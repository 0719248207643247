//! In-process message broker with at-least-once semantics.
//!
//! Mirrors the parts of an AMQP broker the consumer relies on: durable queue
//! declaration, per-subscription prefetch, manual ack, nack with or without
//! requeue, a dead-letter list per queue, and redelivery of anything a
//! consumer drops without settling.

use crate::domain::payment::PaymentId;
use crate::domain::ports::{
    Delivery, DeliveryBox, EventPublisher, MessageBroker, QueueOptions, Subscription,
};
use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BrokerResult<T> = Result<T, BrokerError>;

/// A message rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: Vec<u8>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub dead_lettered: usize,
}

#[derive(Debug)]
struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

struct QueueState {
    options: QueueOptions,
    ready: VecDeque<Message>,
    unacked: usize,
    dead_letters: Vec<DeadLetter>,
}

impl QueueState {
    fn new(options: QueueOptions) -> Self {
        Self {
            options,
            ready: VecDeque::new(),
            unacked: 0,
            dead_letters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Ack,
    Requeue,
    DeadLetter,
}

struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    prefetch: AtomicUsize,
    next_tag: AtomicU64,
    /// Signalled whenever a message becomes ready.
    available: Notify,
    /// Signalled whenever a delivery is settled.
    settled: Notify,
    closed: CancellationToken,
}

impl Shared {
    fn pop(&self, queue: &str) -> Option<Message> {
        let mut queues = self.queues.lock();
        let state = queues.get_mut(queue)?;
        let message = state.ready.pop_front()?;
        state.unacked += 1;
        Some(message)
    }

    fn settle(&self, queue: &str, body: Vec<u8>, settle: Settle) {
        {
            let mut queues = self.queues.lock();
            let Some(state) = queues.get_mut(queue) else {
                return;
            };
            state.unacked = state.unacked.saturating_sub(1);
            match settle {
                Settle::Ack => {}
                Settle::Requeue => state.ready.push_front(Message {
                    body,
                    redelivered: true,
                }),
                Settle::DeadLetter => state.dead_letters.push(DeadLetter {
                    body,
                    dead_lettered_at: Utc::now(),
                }),
            }
        }

        if settle == Settle::Requeue {
            self.available.notify_waiters();
        }
        self.settled.notify_waiters();
    }
}

/// Cloneable handle to an in-process broker. Clones share queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                prefetch: AtomicUsize::new(0),
                next_tag: AtomicU64::new(1),
                available: Notify::new(),
                settled: Notify::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Declares `queue` as durable and returns a publisher bound to it.
    pub async fn publisher(&self, queue: &str) -> BrokerResult<QueuePublisher> {
        self.declare_queue(queue, QueueOptions::durable()).await?;
        Ok(QueuePublisher {
            broker: self.clone(),
            queue: queue.to_string(),
        })
    }

    pub fn publish(&self, queue: &str, body: Vec<u8>) -> BrokerResult<()> {
        if self.shared.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        {
            let mut queues = self.shared.queues.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            state.ready.push_back(Message {
                body,
                redelivered: false,
            });
        }
        self.shared.available.notify_waiters();
        Ok(())
    }

    pub fn stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        let queues = self.shared.queues.lock();
        let state = queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        Ok(QueueStats {
            ready: state.ready.len(),
            unacked: state.unacked,
            dead_lettered: state.dead_letters.len(),
        })
    }

    pub fn dead_letters(&self, queue: &str) -> BrokerResult<Vec<DeadLetter>> {
        let queues = self.shared.queues.lock();
        let state = queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        Ok(state.dead_letters.clone())
    }

    pub fn queue_options(&self, queue: &str) -> Option<QueueOptions> {
        self.shared.queues.lock().get(queue).map(|state| state.options)
    }

    pub fn prefetch(&self) -> usize {
        self.shared.prefetch.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once `queue` has nothing ready and nothing unacknowledged.
    pub async fn wait_until_drained(&self, queue: &str) -> BrokerResult<()> {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let stats = self.stats(queue)?;
            if stats.ready == 0 && stats.unacked == 0 {
                return Ok(());
            }
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shared.closed.cancelled() => {}
            }
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut queues = self.shared.queues.lock();
        queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(options));
        Ok(())
    }

    async fn set_prefetch(&self, count: usize) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.shared.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<Subscription> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if !self.shared.queues.lock().contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let prefetch = self.prefetch();
        let (tx, rx) = mpsc::channel(prefetch.max(1));
        tokio::spawn(dispatch(
            self.shared.clone(),
            queue.to_string(),
            consumer_tag.to_string(),
            prefetch,
            tx,
        ));

        debug!(queue, consumer_tag, prefetch, "Subscription registered");
        Ok(rx)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.shared.closed.cancel();
        self.shared.available.notify_waiters();
        self.shared.settled.notify_waiters();
        info!("Broker connection closed");
        Ok(())
    }
}

/// Moves ready messages of one queue into a subscription channel while
/// keeping at most `prefetch` of them unacknowledged (`0` means unlimited).
async fn dispatch(
    shared: Arc<Shared>,
    queue: String,
    consumer_tag: String,
    prefetch: usize,
    tx: mpsc::Sender<DeliveryBox>,
) {
    let limit = if prefetch == 0 {
        Semaphore::MAX_PERMITS
    } else {
        prefetch
    };
    let permits = Arc::new(Semaphore::new(limit));

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = tx.closed() => break,
            _ = shared.closed.cancelled() => break,
        };

        let message = loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = shared.pop(&queue) {
                break Some(message);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tx.closed() => break None,
                _ = shared.closed.cancelled() => break None,
            }
        };
        let Some(message) = message else {
            break;
        };

        let delivery = InMemoryDelivery {
            tag: shared.next_tag.fetch_add(1, Ordering::SeqCst),
            queue: queue.clone(),
            body: message.body,
            redelivered: message.redelivered,
            shared: shared.clone(),
            permit: Some(permit),
            settled: false,
        };

        // On failure the returned delivery is dropped, which requeues it.
        if tx.send(Box::new(delivery)).await.is_err() {
            break;
        }
    }

    debug!(queue = %queue, consumer_tag = %consumer_tag, "Dispatcher stopped");
}

struct InMemoryDelivery {
    tag: u64,
    queue: String,
    body: Vec<u8>,
    redelivered: bool,
    shared: Arc<Shared>,
    permit: Option<OwnedSemaphorePermit>,
    settled: bool,
}

impl InMemoryDelivery {
    fn settle(&mut self, settle: Settle) {
        let body = std::mem::take(&mut self.body);
        self.shared.settle(&self.queue, body, settle);
        self.settled = true;
        drop(self.permit.take());
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(mut self: Box<Self>) -> BrokerResult<()> {
        if self.shared.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.settle(Settle::Ack);
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> BrokerResult<()> {
        if self.shared.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let settle = if requeue {
            Settle::Requeue
        } else {
            Settle::DeadLetter
        };
        self.settle(settle);
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                queue = %self.queue,
                delivery_tag = self.tag,
                "Delivery dropped without settlement, requeueing"
            );
            self.settle(Settle::Requeue);
        }
    }
}

/// Publishes payment identifiers onto one queue.
#[derive(Clone)]
pub struct QueuePublisher {
    broker: InMemoryBroker,
    queue: String,
}

impl QueuePublisher {
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl EventPublisher for QueuePublisher {
    async fn publish(&self, payment_id: PaymentId) -> BrokerResult<()> {
        self.broker
            .publish(&self.queue, payment_id.to_string().into_bytes())?;
        debug!(queue = %self.queue, payment_id = %payment_id, "Payment published");
        Ok(())
    }
}
