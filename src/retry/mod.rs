//! Per-attempt execution of remote calls: classification, deadline, and
//! deterministic exponential backoff.
//!
//! One executor call covers the whole retry budget of a single operation.
//! Every attempt — success or failure — is recorded on the durable store
//! before the outcome is reported, so a crash never loses attempt history.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ErrorClass, OutpostError, RemoteFailure, Result};
use crate::model::PendingOperation;
use crate::store::DurableStore;

/// Backoff and deadline parameters, decoupled from the config layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Per-attempt deadline. An attempt that exceeds it counts as spent, and
    /// the operation reverts to `pending` when the budget runs out on
    /// timeouts alone.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier,
            request_timeout: config.request_timeout,
        }
    }
}

impl RetryPolicy {
    /// Backoff slept after failed attempt `attempt` (1-based):
    /// `min(base_delay * multiplier^(attempt-1), max_delay)`. No jitter, so
    /// the schedule is reproducible in tests and in the field.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Terminal state of one executor call.
#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    /// The remote call went through.
    Success(T),
    /// Terminal failure: a non-retryable class, or a retryable one with the
    /// attempt budget spent.
    Failed { class: ErrorClass, message: String },
    /// The service reported a conflicting concurrent write; resolution takes
    /// over from here.
    Conflict(RemoteFailure),
}

/// Outcome plus bookkeeping for reports and tests.
#[derive(Debug)]
pub struct ExecutionReport<T> {
    pub outcome: ExecutionOutcome<T>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> ExecutionReport<T> {
    /// Whether the budget ran out on a timed-out attempt. The queue reverts
    /// such operations to `pending` instead of marking them failed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(
            &self.outcome,
            ExecutionOutcome::Failed {
                class: ErrorClass::Timeout,
                ..
            }
        )
    }
}

/// Drives one operation's remote call through its retry budget.
pub struct RetryExecutor {
    store: Arc<dyn DurableStore>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(store: Arc<dyn DurableStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until success, a terminal classification, a conflict, or an
    /// exhausted budget. `call` receives the 1-based attempt number; the
    /// caller closes over the operation's stable idempotency key, so every
    /// attempt presents the same one.
    pub async fn execute<T, F, Fut>(
        &self,
        op: &PendingOperation,
        mut call: F,
    ) -> Result<ExecutionReport<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match time::timeout(self.policy.request_timeout, call(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(OutpostError::Timeout(format!(
                    "attempt exceeded {}ms",
                    self.policy.request_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    self.store.record_attempt(op.local_id, None)?;
                    debug!(local_id = op.local_id, attempt, "Remote call succeeded");
                    return Ok(ExecutionReport {
                        outcome: ExecutionOutcome::Success(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(err) => {
                    let class = err.class();
                    let message = err.to_string();
                    self.store.record_attempt(op.local_id, Some(&message))?;

                    if class == ErrorClass::Conflict {
                        let failure = match err {
                            OutpostError::Remote(failure) => failure,
                            _ => RemoteFailure::new(409, message),
                        };
                        debug!(
                            local_id = op.local_id,
                            attempt, "Remote reported conflicting write"
                        );
                        return Ok(ExecutionReport {
                            outcome: ExecutionOutcome::Conflict(failure),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }

                    if !class.is_retryable() || attempt >= self.policy.max_attempts {
                        warn!(
                            local_id = op.local_id,
                            attempt,
                            class = %class,
                            error = %message,
                            "Remote call failed terminally"
                        );
                        return Ok(ExecutionReport {
                            outcome: ExecutionOutcome::Failed { class, message },
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    debug!(
                        local_id = op.local_id,
                        attempt,
                        class = %class,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    time::sleep(delay).await;
                }
            }
        }
    }
}
