use crate::domain::payment::{Payment, ProcessingOutcome};
use crate::domain::ports::PaymentProcessor;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Stand-in for a payment provider: waits for a fixed latency, then declines
/// with the configured probability.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedProcessor {
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            latency,
            failure_rate,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 0.3)
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn process(&self, _payment: &Payment) -> ProcessingOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::thread_rng().gen_bool(self.failure_rate) {
            ProcessingOutcome::Declined
        } else {
            ProcessingOutcome::Succeeded
        }
    }
}
