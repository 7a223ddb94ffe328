//! Backend trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_core::Outputs;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Provisioning backend abstraction
///
/// A backend performs the actual create, update and delete calls for a
/// resource kind. It is handed configuration with every reference already
/// resolved.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the backend name (e.g., "simulated")
    fn name(&self) -> &str;

    /// Create a new instance and report its identifier and outputs
    async fn create_resource(
        &self,
        kind: &str,
        name: &str,
        config: &serde_json::Value,
    ) -> BackendResult<Provisioned>;

    /// Update the instance `id` in place and report its outputs
    async fn update_resource(
        &self,
        kind: &str,
        id: &str,
        config: &serde_json::Value,
    ) -> BackendResult<Outputs>;

    /// Delete the instance `id`
    async fn delete_resource(&self, kind: &str, id: &str) -> BackendResult<()>;

    /// Called once the run lock of `stack` is held, before any other call
    async fn open_stack(&self, _stack: &str) -> BackendResult<()> {
        Ok(())
    }

    /// Called after the run of `stack`, while its lock is still held
    async fn close_stack(&self, _stack: &str) -> BackendResult<()> {
        Ok(())
    }
}

/// A freshly created instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioned {
    pub id: String,
    pub outputs: Outputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying (throttling, timeouts)
    Transient,
    Permanent,
}

/// Failure reported by a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: FailureKind,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Retry configuration for backend operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    ///
    /// Saturates at `max_delay` when the backoff overflows or is not a valid
    /// duration.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently or runs out of attempts.
///
/// Returns the last result together with the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    label: &str,
    op: F,
) -> (BackendResult<T>, u32)
where
    F: Fn() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
        assert_eq!(retry.delay_for(100), Duration::from_secs(30));
        assert_eq!(retry.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_saturates_on_invalid_multiplier() {
        for multiplier in [-1.0, f64::NAN, f64::INFINITY] {
            let retry = RetryConfig {
                backoff_multiplier: multiplier,
                ..Default::default()
            };
            assert_eq!(retry.delay_for(2), Duration::from_secs(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_retry_run_never_overflows() {
        let retry = RetryConfig {
            max_attempts: 100,
            ..Default::default()
        };
        let (result, attempts) = with_retry(&retry, "update", || async {
            Err::<(), _>(BackendError::transient("throttled"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts, 100);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = with_retry(&quick(), "create", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::transient("throttled"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = with_retry(&quick(), "create", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BackendError::permanent("quota exceeded"))
        })
        .await;

        assert_eq!(result.unwrap_err().message, "quota exceeded");
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) = with_retry(&quick(), "delete", || async {
            Err::<(), _>(BackendError::transient("timeout"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
