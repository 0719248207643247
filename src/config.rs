//! Runtime configuration.
//!
//! Every setting has a default and can be overridden by a command-line flag
//! or an environment variable. Durations are written the way the rest of the
//! deployment writes them: `250ms`, `5s`, `1m30s`, `1h`.

use crate::application::retry::{DelayStrategy, RetryPolicy};
use crate::infrastructure::simulated::SimulatedProcessor;
use clap::Args;
use std::time::Duration;

pub const DEFAULT_QUEUE: &str = "payment_processing";

/// Largest accepted worker count. It is also the prefetch window.
pub const MAX_WORKERS: i64 = 1024;

/// Queue consumer settings.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct ConsumerConfig {
    /// Queue the consumer reads processing tasks from
    #[arg(long = "queue", env = "MESSAGE_QUEUE", default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Number of concurrent workers, at most 1024 (values below 1 mean 1)
    #[arg(
        long,
        env = "WORKER_COUNT",
        default_value_t = 1,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(..=MAX_WORKERS)
    )]
    pub workers: i64,

    /// Attempts per task, the first one included (values below 1 mean 1)
    #[arg(
        long,
        env = "RETRY_ATTEMPTS",
        default_value_t = 3,
        allow_negative_numbers = true
    )]
    pub retry_attempts: i64,

    /// How the delay between attempts grows
    #[arg(long, env = "RETRY_DELAY_TYPE", value_enum, default_value_t = DelayStrategy::Fixed)]
    pub retry_delay_type: DelayStrategy,

    /// Base delay between attempts
    #[arg(long, env = "RETRY_DELAY", value_parser = parse_duration, default_value = "500ms")]
    pub retry_delay: Duration,

    /// Upper bound for any single delay (0 disables the cap)
    #[arg(long, env = "RETRY_MAX_DELAY", value_parser = parse_duration, default_value = "5s")]
    pub retry_max_delay: Duration,
}

impl ConsumerConfig {
    pub fn workers(&self) -> usize {
        // Bounded for values that bypass the flag parser.
        usize::try_from(self.workers.clamp(1, MAX_WORKERS)).unwrap_or(1)
    }

    pub fn attempts(&self) -> u32 {
        u32::try_from(self.retry_attempts.max(1)).unwrap_or(u32::MAX)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts(),
            self.retry_delay_type,
            self.retry_delay,
            self.retry_max_delay,
        )
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            workers: 1,
            retry_attempts: 3,
            retry_delay_type: DelayStrategy::Fixed,
            retry_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

/// Behaviour of the simulated payment provider.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct SimulationConfig {
    /// Probability in [0, 1] that a processing attempt is declined
    #[arg(long, env = "SIMULATED_FAILURE_RATE", default_value_t = 0.3)]
    pub failure_rate: f64,

    /// Time a processing attempt takes
    #[arg(long, env = "PROCESSING_LATENCY", value_parser = parse_duration, default_value = "2s")]
    pub processing_latency: Duration,
}

impl SimulationConfig {
    pub fn processor(&self) -> SimulatedProcessor {
        SimulatedProcessor::new(self.processing_latency, self.failure_rate)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.3,
            processing_latency: Duration::from_secs(2),
        }
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parses a duration such as `300ms`, `1.5s` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted without a unit.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = |reason: &str| format!("invalid duration {input:?}: {reason}");

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {other:?}"))),
        };

        let nanos = scaled(number, unit_nanos).ok_or_else(|| invalid("bad number"))?;
        total = total
            .checked_add(nanos)
            .ok_or_else(|| invalid("out of range"))?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| invalid("out of range"))?;
    // The remainder is below one second, so it fits.
    let subsec = (total % NANOS_PER_SEC) as u32;
    Ok(Duration::new(secs, subsec))
}

/// `number * unit_nanos` for a decimal `number`, truncated to whole nanoseconds.
fn scaled(number: &str, unit_nanos: u128) -> Option<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit_nanos)?;

    let mut scale = unit_nanos;
    for digit in fraction.chars().take(18) {
        scale /= 10;
        if scale == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit.to_digit(10)?) * scale)?;
    }
    Some(nanos)
}
