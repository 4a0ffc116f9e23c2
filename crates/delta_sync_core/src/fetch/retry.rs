use std::time::Duration;

use crate::error::FetchError;
use crate::sleep::Sleeper;

pub const DEFAULT_RETRY_TOTAL: u32 = 10;
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Outcome of one attempt as seen by the retry loop.
#[derive(Debug)]
pub enum AttemptError {
    Transient(String),
    Fatal(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first one included.
    pub total: u32,
    pub backoff_factor: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: DEFAULT_RETRY_TOTAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

/// Attempt bookkeeping for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub total: u32,
    pub backoff_factor: Duration,
}

impl RetryState {
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.total
    }

    /// Delay before the next attempt: `factor * 2^(attempt - 1)`.
    pub fn next_delay(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(31);
        self.backoff_factor.saturating_mul(1u32 << exponent)
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.total == 0 {
            return Err("retry budget must allow at least one attempt".to_string());
        }
        if self.backoff_factor.is_zero() {
            return Err("backoff factor must be positive".to_string());
        }
        Ok(())
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Runs `operation` until it succeeds, fails fatally, or the budget runs out.
    pub fn execute<T>(
        &self,
        sleeper: &dyn Sleeper,
        mut operation: impl FnMut(u32) -> Result<T, AttemptError>,
    ) -> Result<T, FetchError> {
        let mut state = RetryState {
            attempt: 0,
            total: self.total.max(1),
            backoff_factor: self.backoff_factor,
        };

        loop {
            state.attempt += 1;
            match operation(state.attempt) {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Transient(message)) => {
                    if state.exhausted() {
                        tracing::error!(
                            component = "retry",
                            event = "budget_exhausted",
                            attempts = state.attempt,
                            error = message.as_str()
                        );
                        return Err(FetchError::RetriesExhausted {
                            attempts: state.attempt,
                            last_error: message,
                        });
                    }
                    let delay = state.next_delay();
                    tracing::warn!(
                        component = "retry",
                        event = "transient_failure",
                        attempt = state.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = message.as_str()
                    );
                    sleeper.sleep(delay);
                }
            }
        }
    }
}
