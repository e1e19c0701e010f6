use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, StoreKind};

/// Bounded retry with exponential backoff for transient store faults and
/// optimistic version conflicts. Everything else returns on first sight.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!("{} attempt {} failed ({}), retrying in {:?}", label, attempt, err, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AppError::VersionConflict(msg)) => {
                    return Err(AppError::Conflict(format!("{} (after {} attempts)", msg, attempt)));
                }
                other => return other,
            }
        }
    }
}

/// Bounds one store call. Elapsed time counts as the store being unavailable.
pub async fn with_timeout<T, Fut>(store: StoreKind, limit: Duration, fut: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} call timed out after {:?}", store, limit);
            Err(AppError::StoreUnavailable(store))
        }
    }
}
