//! Retry utilities for resilient requests
//!
//! Retries are modeled as an explicit per-request state machine:
//!
//! ```text
//! Attempt ──▶ Success
//!    │
//!    ├──▶ TransientFailure ──▶ Backoff ──▶ Attempt   (while retries remain)
//!    │                    └──▶ Exhausted
//!    └──▶ TerminalFailure
//! ```
//!
//! [`RetryState`] holds the attempt counter and decides the next step without
//! touching the network or the clock, so it can be tested in isolation.
//! [`with_retry_if`] drives an async operation through the machine.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each backoff delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays and no jitter
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Calculate the delay before retry number `retry` using exponential backoff
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms = if retry == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((retry - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }

    fn backoff_delay(&self, retry: u32) -> Duration {
        let delay = self.calculate_delay(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() as u64 / 4).max(1);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Start a fresh state machine for one request
    pub fn start(&self) -> RetryState {
        RetryState::new(self.clone())
    }
}

/// Classification of a single attempt's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    TerminalFailure,
}

/// Current step of a request's retry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Ready to issue attempt number `attempt` (1-based)
    Attempt { attempt: u32 },
    /// Wait `delay`, then issue attempt number `next_attempt`
    Backoff { next_attempt: u32, delay: Duration },
    /// Last attempt succeeded
    Succeeded { attempts: u32 },
    /// Last attempt failed with a non-retryable error
    Failed { attempts: u32 },
    /// Transient failures used up every retry
    Exhausted { attempts: u32 },
}

impl RetryStep {
    /// Whether the machine has reached a final step
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Exhausted { .. }
        )
    }
}

/// Per-request retry state machine
#[derive(Debug, Clone)]
pub struct RetryState {
    config: RetryConfig,
    attempts: u32,
    step: RetryStep,
}

impl RetryState {
    /// Create a machine positioned before the first attempt
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            step: RetryStep::Attempt { attempt: 1 },
        }
    }

    /// Number of attempts issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current step
    pub fn step(&self) -> RetryStep {
        self.step
    }

    /// Mark the start of the next attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.step = RetryStep::Attempt {
            attempt: self.attempts,
        };
        self.attempts
    }

    /// Feed the outcome of the current attempt and move to the next step
    pub fn record(&mut self, outcome: AttemptOutcome) -> RetryStep {
        let attempts = self.attempts;
        self.step = match outcome {
            AttemptOutcome::Success => RetryStep::Succeeded { attempts },
            AttemptOutcome::TerminalFailure => RetryStep::Failed { attempts },
            AttemptOutcome::TransientFailure => {
                let retries_used = attempts.saturating_sub(1);
                if retries_used >= self.config.max_retries {
                    RetryStep::Exhausted { attempts }
                } else {
                    RetryStep::Backoff {
                        next_attempt: attempts + 1,
                        delay: self.config.backoff_delay(attempts),
                    }
                }
            }
        };
        self.step
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryError<E> {
    /// Error returned by the last attempt
    pub error: E,

    /// Attempts issued, including the first
    pub attempts: u32,

    /// True when transient failures used up every retry
    pub exhausted: bool,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exhausted {
            write!(f, "{} (gave up after {} attempts)", self.error, self.attempts)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

/// Execute an operation through the retry state machine
///
/// `operation` receives the 1-based attempt number. `is_transient` decides
/// whether a failure is retried; terminal failures stop immediately.
///
/// Returns the value together with the number of attempts used.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut state = config.start();

    loop {
        let attempt = state.begin_attempt();

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                state.record(AttemptOutcome::Success);
                return Ok((value, attempt));
            }
            Err(e) => e,
        };

        let outcome = if is_transient(&error) {
            AttemptOutcome::TransientFailure
        } else {
            AttemptOutcome::TerminalFailure
        };

        match state.record(outcome) {
            RetryStep::Backoff {
                next_attempt,
                delay,
            } => {
                warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed, will retry"
                );
                debug!(next_attempt, "Backing off");
                tokio::time::sleep(delay).await;
            }
            step => {
                let exhausted = matches!(step, RetryStep::Exhausted { .. });
                if exhausted {
                    warn!(attempts = state.attempts(), error = %error, "Retries exhausted");
                } else {
                    debug!(error = %error, "Non-retryable error encountered");
                }
                return Err(RetryError {
                    error,
                    attempts: state.attempts(),
                    exhausted,
                });
            }
        }
    }
}
