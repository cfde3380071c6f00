//! Optimistic-concurrency writes against the remote store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::remote::{RemoteError, RemoteRecord, RemoteStore, SaveMode};

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for both computed delays and server-suggested retry-after.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_factor() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl BackoffConfig {
    /// Fails quickly to keep tests fast.
    pub fn testing() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            factor: 2.0,
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let initial = Duration::from_millis(self.initial_delay_ms);
        if attempt == 0 {
            return initial;
        }

        let multiplier = self.factor.powi((attempt - 1) as i32);
        let delay = Duration::from_secs_f64(initial.as_secs_f64() * multiplier);

        std::cmp::min(delay, self.max_delay())
    }
}

/// Bounded retry around a single field write.
///
/// On conflict the record is refetched and the same already computed value
/// is resubmitted; it is not re-merged against the refetched state. A writer
/// landing between the refetch and the resubmit can therefore be overwritten.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Option<BackoffConfig>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> Option<&BackoffConfig> {
        self.backoff.as_ref()
    }

    /// Writes `encoded` into field `field` of `record_id` with a conditional
    /// save, retrying conflicts and transient failures up to the budget.
    pub async fn save_with_retry(
        &self,
        remote: &dyn RemoteStore,
        record_id: &str,
        field: &str,
        encoded: &str,
    ) -> Result<RemoteRecord> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match Self::attempt(remote, record_id, field, encoded).await {
                Ok(saved) => {
                    if attempt > 1 {
                        tracing::debug!("Saved {}.{} after {} attempts", record_id, field, attempt);
                    }
                    return Ok(saved);
                }
                Err(err) => SyncError::from(err),
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= self.max_retries {
                tracing::warn!(
                    "Giving up on {}.{} after {} attempts: {}",
                    record_id,
                    field,
                    attempt,
                    err
                );
                return Err(SyncError::MaxRetriesExceeded {
                    record_id: record_id.to_string(),
                    attempts: attempt,
                });
            }

            tracing::debug!("Retrying {}.{} (attempt {}): {}", record_id, field, attempt, err);
            if let Some(delay) = self.delay_before_retry(attempt, &err) {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(
        remote: &dyn RemoteStore,
        record_id: &str,
        field: &str,
        encoded: &str,
    ) -> std::result::Result<RemoteRecord, RemoteError> {
        let mut record = remote
            .fetch(record_id)
            .await?
            .unwrap_or_else(|| RemoteRecord::new(record_id));
        record.set_field(field, encoded);
        remote.save(record, SaveMode::IfUnchanged).await
    }

    fn delay_before_retry(&self, attempt: usize, err: &SyncError) -> Option<Duration> {
        let backoff = self.backoff.as_ref()?;
        match err {
            SyncError::RateLimited {
                retry_after: Some(after),
            } => Some(std::cmp::min(*after, backoff.max_delay())),
            _ => Some(backoff.delay_for_attempt(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use std::time::Instant;

    #[test]
    fn test_backoff_schedule() {
        let backoff = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            factor: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_creates_missing_record() {
        let remote = MemoryRemoteStore::new();
        let policy = RetryPolicy::default();

        policy
            .save_with_retry(&remote, "userData", "readItems", "[\"a\"]")
            .await
            .unwrap();
        assert_eq!(remote.field("userData", "readItems").as_deref(), Some("[\"a\"]"));
        assert_eq!(remote.save_count(), 1);
    }

    #[tokio::test]
    async fn test_preserves_other_fields() {
        let remote = MemoryRemoteStore::new();
        remote.put_field("userData", "heartedItems", "[\"h\"]");

        RetryPolicy::default()
            .save_with_retry(&remote, "userData", "readItems", "[]")
            .await
            .unwrap();
        assert_eq!(remote.field("userData", "heartedItems").as_deref(), Some("[\"h\"]"));
    }

    #[tokio::test]
    async fn test_recovers_from_conflicts_within_budget() {
        let remote = MemoryRemoteStore::new();
        remote.force_conflicts(2);

        RetryPolicy::new(3)
            .save_with_retry(&remote, "userData", "readItems", "[]")
            .await
            .unwrap();
        assert_eq!(remote.save_count(), 3);
        assert_eq!(remote.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_stops_calling_remote() {
        let remote = MemoryRemoteStore::new();
        remote.force_conflicts(10);

        let err = RetryPolicy::new(3)
            .save_with_retry(&remote, "userData", "readItems", "[]")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::MaxRetriesExceeded { attempts: 3, .. }
        ));
        assert_eq!(remote.save_count(), 3);
        assert_eq!(remote.fetch_count(), 3);
        assert!(remote.record("userData").is_none());
    }

    #[tokio::test]
    async fn test_resubmits_same_value_over_racing_writer() {
        let remote = MemoryRemoteStore::new();
        remote.put_field("userData", "readItems", "[\"base\"]");
        remote.inject_foreign_write("userData", "readItems", "[\"base\",\"other\"]");

        RetryPolicy::default()
            .save_with_retry(&remote, "userData", "readItems", "[\"base\",\"mine\"]")
            .await
            .unwrap();

        // The racing writer's value is replaced, not merged.
        assert_eq!(
            remote.field("userData", "readItems").as_deref(),
            Some("[\"base\",\"mine\"]")
        );
        assert_eq!(remote.save_count(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        struct Rejecting;
        impl RemoteStore for Rejecting {
            fn fetch<'a>(
                &'a self,
                _record_id: &'a str,
            ) -> crate::BoxFuture<'a, crate::remote::RemoteResult<Option<RemoteRecord>>> {
                Box::pin(async { Ok(None) })
            }
            fn save(
                &self,
                _record: RemoteRecord,
                _mode: SaveMode,
            ) -> crate::BoxFuture<'_, crate::remote::RemoteResult<RemoteRecord>> {
                Box::pin(async { Err(RemoteError::Other("HTTP 400".into())) })
            }
        }

        let err = RetryPolicy::new(5)
            .save_with_retry(&Rejecting, "userData", "readItems", "[]")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
    }

    #[tokio::test]
    async fn test_missing_record_on_save_is_terminal() {
        struct Vanishing;
        impl RemoteStore for Vanishing {
            fn fetch<'a>(
                &'a self,
                _record_id: &'a str,
            ) -> crate::BoxFuture<'a, crate::remote::RemoteResult<Option<RemoteRecord>>> {
                Box::pin(async { Ok(None) })
            }
            fn save(
                &self,
                record: RemoteRecord,
                _mode: SaveMode,
            ) -> crate::BoxFuture<'_, crate::remote::RemoteResult<RemoteRecord>> {
                Box::pin(async move { Err(RemoteError::NotFound(record.id)) })
            }
        }

        let err = RetryPolicy::new(5)
            .save_with_retry(&Vanishing, "userData", "readItems", "[]")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_backoff_honours_retry_after() {
        let remote = MemoryRemoteStore::new();
        remote.rate_limit_saves(1, Some(Duration::from_millis(50)));

        let policy = RetryPolicy::new(3).with_backoff(BackoffConfig::testing());
        let started = Instant::now();
        policy
            .save_with_retry(&remote, "userData", "readItems", "[]")
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(remote.save_count(), 2);
    }

    #[tokio::test]
    async fn test_baseline_retries_without_delay() {
        let remote = MemoryRemoteStore::new();
        remote.rate_limit_saves(2, Some(Duration::from_secs(30)));

        let started = Instant::now();
        RetryPolicy::new(3)
            .save_with_retry(&remote, "userData", "readItems", "[]")
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
