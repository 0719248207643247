use std::future::Future;
use std::time::Duration;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DelayStrategy {
    /// Wait the base delay before every retry.
    #[default]
    Fixed,
    /// Double the wait before each retry, starting from the base delay.
    Backoff,
}

/// Bounded retry with a configurable delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    strategy: DelayStrategy,
    delay: Duration,
    max_delay: Duration,
}

#[derive(Debug)]
pub struct RetrySuccess<T> {
    pub value: T,
    pub attempts: u32,
}

/// The error of the last attempt, and how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

impl RetryPolicy {
    /// `attempts` counts the first try; it is raised to at least one.
    /// A zero `max_delay` leaves delays uncapped.
    pub fn new(attempts: u32, strategy: DelayStrategy, delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            strategy,
            delay,
            max_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn strategy(&self) -> DelayStrategy {
        self.strategy
    }

    /// Wait before retry number `retry` (the first retry is `1`).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.strategy {
            DelayStrategy::Fixed => self.delay,
            DelayStrategy::Backoff => {
                let exponent = retry.saturating_sub(1).min(31);
                self.delay.saturating_mul(1u32 << exponent)
            }
        };

        if self.max_delay.is_zero() {
            delay
        } else {
            delay.min(self.max_delay)
        }
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt budget is spent.
    ///
    /// `on_retry(attempt, &error, delay)` fires after each failed attempt
    /// that will be retried, before sleeping.
    pub async fn run<T, E, Op, Fut, Pred, OnRetry>(
        &self,
        mut op: Op,
        is_retryable: Pred,
        mut on_retry: OnRetry,
    ) -> Result<RetrySuccess<T>, RetryFailure<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Pred: Fn(&E) -> bool,
        OnRetry: FnMut(u32, &E, Duration),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    return Ok(RetrySuccess {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    if attempt >= self.attempts || !is_retryable(&error) {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    on_retry(attempt, &error, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            DelayStrategy::Fixed,
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
    }
}
