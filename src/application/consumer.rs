use super::retry::RetryPolicy;
use super::service::PaymentService;
use crate::config::ConsumerConfig;
use crate::domain::ports::{DeliveryBox, MessageBrokerRef, QueueOptions, Subscription};
use crate::domain::task::{Disposition, ProcessingTask, TaskState};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONSUMER_TAG: &str = "payment-consumer";

/// Pulls processing tasks off the queue and drives them through
/// [`PaymentService::process_payment`] on a fixed pool of workers.
///
/// Every task ends in exactly one settlement: an ack when processing
/// succeeded or failed for good, or a nack without requeue once a transient
/// failure has used up the retry budget.
pub struct QueueConsumer {
    broker: MessageBrokerRef,
    service: Arc<PaymentService>,
    queue: String,
    workers: usize,
    policy: RetryPolicy,
}

impl QueueConsumer {
    /// Declares the queue and limits unacknowledged deliveries to one per
    /// worker.
    pub async fn connect(
        broker: MessageBrokerRef,
        service: Arc<PaymentService>,
        config: &ConsumerConfig,
    ) -> Result<Self> {
        let workers = config.workers();
        let policy = config.retry_policy();

        broker
            .declare_queue(&config.queue, QueueOptions::durable())
            .await?;
        broker.set_prefetch(workers).await?;

        info!(
            queue = %config.queue,
            workers,
            max_attempts = policy.attempts(),
            strategy = ?policy.strategy(),
            "Consumer connected"
        );

        Ok(Self {
            broker,
            service,
            queue: config.queue.clone(),
            workers,
            policy,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs the worker pool until `shutdown` is cancelled or the subscription
    /// ends, and returns once every worker has exited.
    ///
    /// Workers check for cancellation only between tasks, so a task that is
    /// already running finishes together with its retries. Deliveries still
    /// buffered when the pool stops go back to the queue.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let subscription = self.broker.consume(&self.queue, CONSUMER_TAG).await?;
        let inbound = Arc::new(Mutex::new(subscription));

        let mut pool = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                inbound: inbound.clone(),
                service: self.service.clone(),
                policy: self.policy.clone(),
                shutdown: shutdown.clone(),
            };
            pool.spawn(worker.run());
        }
        drop(inbound);

        info!(queue = %self.queue, workers = self.workers, "Consumer started");

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker terminated abnormally");
            }
        }

        info!(queue = %self.queue, "Consumer stopped");
        Ok(())
    }

    /// Releases the broker connection.
    pub async fn close(self) -> Result<()> {
        self.broker.close().await?;
        Ok(())
    }
}

struct Worker {
    id: usize,
    inbound: Arc<Mutex<Subscription>>,
    service: Arc<PaymentService>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                delivery = next(&self.inbound) => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.handle(delivery).await;
        }

        debug!(worker = self.id, "Worker stopped");
    }

    async fn handle(&self, delivery: DeliveryBox) {
        let task = ProcessingTask::from_body(delivery.body(), delivery.redelivered());
        debug!(
            worker = self.id,
            payment_id = %task.payload,
            redelivered = task.redelivered,
            "Task received"
        );

        let disposition = self.process(&task).await;
        let settled = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::DeadLetter => delivery.nack(false).await,
        };
        if let Err(e) = settled {
            error!(
                worker = self.id,
                payment_id = %task.payload,
                disposition = ?disposition,
                error = %e,
                "Failed to settle task"
            );
            return;
        }

        debug!(
            worker = self.id,
            payment_id = %task.payload,
            state = ?TaskState::from(disposition),
            "Task settled"
        );
    }

    async fn process(&self, task: &ProcessingTask) -> Disposition {
        let service = &*self.service;
        let payload = task.payload.as_str();
        let max_attempts = self.policy.attempts();
        let mut state = TaskState::Received;

        let result = self
            .policy
            .run(
                move || service.process_payment(payload),
                PaymentError::is_retryable,
                |attempt, err, delay| {
                    state = TaskState::Retrying { attempt };
                    warn!(
                        worker = self.id,
                        payment_id = payload,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %err,
                        "Processing failed, retrying"
                    );
                },
            )
            .await;

        match result {
            Ok(success) => {
                debug!(
                    worker = self.id,
                    payment_id = payload,
                    attempts = success.attempts,
                    "Task completed"
                );
                Disposition::Ack
            }
            Err(failure) if failure.error.is_retryable() => {
                error!(
                    worker = self.id,
                    payment_id = payload,
                    attempts = failure.attempts,
                    max_attempts,
                    last_state = ?state,
                    error = %failure.error,
                    "Retries exhausted, dead-lettering task"
                );
                Disposition::DeadLetter
            }
            Err(failure) => {
                warn!(
                    worker = self.id,
                    payment_id = payload,
                    code = failure.error.code(),
                    error = %failure.error,
                    "Discarding task after non-retryable failure"
                );
                Disposition::Ack
            }
        }
    }
}

async fn next(inbound: &Mutex<Subscription>) -> Option<DeliveryBox> {
    inbound.lock().await.recv().await
}
