#![allow(dead_code)]

use async_trait::async_trait;
use paygate::application::retry::DelayStrategy;
use paygate::application::service::PaymentService;
use paygate::config::ConsumerConfig;
use paygate::domain::payment::{
    NewPayment, Payment, PaymentId, PaymentRequest, PaymentStatus, ProcessingOutcome,
};
use paygate::domain::ports::{
    LockedPayment, LockedPaymentBox, PaymentProcessor, PaymentStore,
};
use paygate::error::{PaymentError, Result};
use paygate::infrastructure::broker::InMemoryBroker;
use paygate::infrastructure::in_memory::InMemoryPaymentStore;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const QUEUE: &str = "payment_processing";

/// In-memory store that can fail its locking reads or its status writes, and
/// counts what the service does with it.
#[derive(Clone, Default)]
pub struct TestStore {
    pub inner: InMemoryPaymentStore,
    /// Locking reads that still have to fail. `usize::MAX` fails forever.
    pub lock_failures: Arc<AtomicUsize>,
    pub lock_calls: Arc<AtomicUsize>,
    /// Status writes that still have to fail, counted like `lock_failures`.
    pub write_failures: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        let store = Self::default();
        store.lock_failures.store(times, Ordering::SeqCst);
        store
    }

    pub fn failing_writes(times: usize) -> Self {
        let store = Self::default();
        store.write_failures.store(times, Ordering::SeqCst);
        store
    }

    pub fn lock_calls(&self) -> usize {
        self.lock_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn status(&self, id: PaymentId) -> PaymentStatus {
        self.inner.get(id).await.unwrap().unwrap().status
    }

}

fn take_failure(left: &AtomicUsize) -> bool {
    left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
        0 => None,
        usize::MAX => Some(usize::MAX),
        n => Some(n - 1),
    })
    .is_ok()
}

#[async_trait]
impl PaymentStore for TestStore {
    async fn create(&self, new: NewPayment) -> Result<Payment> {
        self.inner.create(new).await
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.inner.get(id).await
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        self.inner.get_by_reference(reference).await
    }

    async fn get_with_lock(&self, id: PaymentId) -> Result<Option<LockedPaymentBox>> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.lock_failures) {
            return Err(PaymentError::persistence("database is unavailable"));
        }

        let row = self.inner.get_with_lock(id).await?;
        Ok(row.map(|inner| {
            Box::new(CountingRow {
                inner,
                writes: self.writes.clone(),
                write_failures: self.write_failures.clone(),
            }) as LockedPaymentBox
        }))
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        self.inner.all().await
    }
}

struct CountingRow {
    inner: LockedPaymentBox,
    writes: Arc<AtomicUsize>,
    write_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl LockedPayment for CountingRow {
    fn payment(&self) -> &Payment {
        self.inner.payment()
    }

    async fn update_status(&mut self, status: PaymentStatus) -> Result<Payment> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.write_failures) {
            return Err(PaymentError::persistence("status write was lost"));
        }
        self.inner.update_status(status).await
    }
}

/// Always returns the same outcome after `latency`, tracking concurrency.
#[derive(Clone)]
pub struct TestProcessor {
    pub outcome: ProcessingOutcome,
    pub latency: Duration,
    pub calls: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl TestProcessor {
    pub fn new(outcome: ProcessingOutcome, latency: Duration) -> Self {
        Self {
            outcome,
            latency,
            calls: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for TestProcessor {
    async fn process(&self, _payment: &Payment) -> ProcessingOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcome
    }
}

pub struct Harness {
    pub broker: InMemoryBroker,
    pub store: TestStore,
    pub processor: TestProcessor,
    pub service: Arc<PaymentService>,
}

pub async fn harness(store: TestStore, processor: TestProcessor) -> Harness {
    let broker = InMemoryBroker::new();
    let publisher = broker.publisher(QUEUE).await.unwrap();
    let service = PaymentService::new(
        Box::new(store.clone()),
        Box::new(publisher),
        Box::new(processor.clone()),
    );
    Harness {
        broker,
        store,
        processor,
        service: Arc::new(service),
    }
}

pub fn consumer_config(workers: i64, attempts: i64) -> ConsumerConfig {
    ConsumerConfig {
        queue: QUEUE.to_string(),
        workers,
        retry_attempts: attempts,
        retry_delay_type: DelayStrategy::Fixed,
        retry_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_secs(1),
    }
}

pub fn request(reference: &str) -> PaymentRequest {
    PaymentRequest {
        amount: dec!(250.00),
        currency: "ETB".to_string(),
        reference: reference.to_string(),
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Writes `rows` valid creation requests with references `ref-1..=rows`.
pub fn generate_csv(path: &std::path::Path, rows: usize) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["amount", "currency", "reference"])?;
    for i in 1..=rows {
        let currency = if i % 2 == 0 { "ETB" } else { "USD" };
        wtr.write_record([&format!("{i}.25"), currency, &format!("ref-{i}")])?;
    }

    wtr.flush()?;
    Ok(())
}
