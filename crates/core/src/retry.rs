//! Retry with exponential backoff and jitter
//!
//! Used by the transfer primitive for transient failures (timeouts,
//! throttling, 5xx). The sync engine itself never retries.

use std::time::Duration;

use crate::alias::RetryConfig;
use crate::error::{Error, Result};

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// `label` names the operation in debug logs (usually the object key).
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts || !is_retryable(&e) => return Err(e),
            Err(e) => {
                let backoff = backoff_for(config, attempt);
                tracing::debug!(
                    operation = label,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// initial * 2^(attempt-1), capped, plus jitter in [0, capped)
fn backoff_for(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let capped = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_backoff_ms);
    Duration::from_millis(capped + jitter(capped))
}

fn jitter(max: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Whether an error is worth retrying
pub fn is_retryable_error(error: &Error) -> bool {
    const TRANSIENT: &[&str] = &[
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "broken pipe",
        "500",
        "502",
        "503",
        "504",
        "service unavailable",
        "internal error",
        "too many requests",
        "429",
        "slow down",
        "request rate",
    ];

    match error {
        Error::Network(msg) => {
            let msg = msg.to_lowercase();
            TRANSIENT.iter().any(|needle| msg.contains(needle))
        }
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        Error::General(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout") || msg.contains("temporary")
        }
        _ => false,
    }
}

/// Builds a `RetryConfig` starting from an alias's policy
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self::from_config(RetryConfig::default())
    }

    pub fn from_config(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[test]
    fn test_backoff_growth() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        };

        let b1 = backoff_for(&config, 1).as_millis();
        assert!((100..200).contains(&b1));

        let b3 = backoff_for(&config, 3).as_millis();
        assert!((400..800).contains(&b3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 30,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        // cap plus at most cap of jitter
        assert!(backoff_for(&config, 30).as_millis() < 10000);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Network("request timeout".into())));
        assert!(is_retryable_error(&Error::Network("503 Slow Down".into())));
        assert!(is_retryable_error(&Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        ))));

        assert!(!is_retryable_error(&Error::Auth("access denied".into())));
        assert!(!is_retryable_error(&Error::NotFound("key".into())));
        assert!(!is_retryable_error(&Error::Io(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied
        ))));
    }

    #[test]
    fn test_builder_overrides_alias_policy() {
        let config = RetryBuilder::from_config(RetryConfig::default())
            .max_attempts(10)
            .initial_backoff_ms(50)
            .max_backoff_ms(2000)
            .build();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.initial_backoff_ms, 50);
        assert_eq!(config.max_backoff_ms, 2000);

        assert_eq!(RetryBuilder::new().max_attempts(0).build().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &fast(3),
            "obj",
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Network("timeout".into()))
                    } else {
                        Ok(7)
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(2),
            "obj",
            || {
                calls += 1;
                async { Err(Error::Network("timeout".into())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(5),
            "obj",
            || {
                calls += 1;
                async { Err(Error::NotFound("missing".into())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
