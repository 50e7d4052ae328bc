//! Bounded retry with exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use keel_core::Settings;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Total attempts, the first one included.
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for Backoff {
    fn from(s: &Settings) -> Self {
        Self { initial: s.poll_initial, factor: s.poll_factor, max: s.poll_max, attempts: s.poll_attempts }
    }
}

impl Backoff {
    /// Delay after the `n`th failed attempt (1-based).
    pub fn delay(&self, n: u32) -> Duration {
        let exp = self.factor.powi(n.saturating_sub(1) as i32);
        let secs = (self.initial.as_secs_f64() * exp).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Outcome of one failed attempt: keep going, or stop now.
#[derive(Debug)]
pub enum Attempt<E> {
    Retry(String),
    Stop(E),
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: String },
    Stopped(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => write!(f, "gave up after {} attempts: {}", attempts, last),
            RetryError::Stopped(e) => write!(f, "{}", e),
        }
    }
}

/// Run `operation` until it succeeds, asks to stop, or the attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    backoff: &Backoff,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let budget = backoff.attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(v) => return Ok(v),
            Err(Attempt::Stop(e)) => return Err(RetryError::Stopped(e)),
            Err(Attempt::Retry(reason)) => {
                if attempt >= budget {
                    error!(operation = %operation_name, attempt, reason = %reason, "giving up");
                    return Err(RetryError::Exhausted { attempts: attempt, last: reason });
                }
                let delay = backoff.delay(attempt);
                debug!(operation = %operation_name, attempt, reason = %reason, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
