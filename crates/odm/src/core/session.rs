//! Session and retry capability.
//!
//! Transactions are managed by an external collaborator. This module defines
//! the narrow interface the caller's session manager implements, and helpers
//! that retry a unit of work on transient write conflicts. The cascade
//! resolver never opens sessions itself; callers wrap a whole cascade in
//! [`with_session`] when they need it to be atomic.

use std::future::Future;

use async_trait::async_trait;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::StorageResult;

/// An open transactional session.
#[async_trait]
pub trait Session: Send {
    /// Commits the work done in this session.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards the work done in this session.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Opens transactional sessions against the store.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Starts a new session.
    async fn start_session(&self) -> StorageResult<Box<dyn Session>>;
}

/// Runs `operation`, re-running it while it fails with a transient conflict.
///
/// The closure receives the 1-based attempt number. Non-transient errors and
/// the error of the last permitted attempt are returned unchanged.
///
/// # Example
///
/// ```ignore
/// use helios_odm::config::RetryConfig;
/// use helios_odm::core::with_retry;
///
/// let saved = with_retry(&RetryConfig::default(), |_attempt| {
///     manager.cascade_save(&order, SaveOperation::Create)
/// })
/// .await?;
/// ```
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, mut operation: F) -> StorageResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Err(err) if err.is_transient() && attempt <= retry.max_retries => {
                let delay = retry.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transient conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Runs `operation` inside a session, committing on success and aborting on
/// failure. The whole session is retried on transient conflicts, including a
/// conflict reported by the commit itself.
pub async fn with_session<T, F, Fut>(
    provider: &dyn SessionProvider,
    retry: &RetryConfig,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 1;
    loop {
        let session = provider.start_session().await?;
        let result = match operation(attempt).await {
            Ok(value) => session.commit().await.map(|_| value),
            Err(err) => {
                if let Err(abort_err) = session.abort().await {
                    warn!(error = %abort_err, "Failed to abort session");
                }
                Err(err)
            }
        };

        match result {
            Err(err) if err.is_transient() && attempt <= retry.max_retries => {
                let delay = retry.delay_for(attempt);
                warn!(attempt, error = %err, "Retrying session after transient conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
