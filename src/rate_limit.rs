//! Provider back-off bookkeeping.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::db::Database;
use crate::error::{Result, TrackerError};
use crate::models::ProviderKind;

/// Durable per-account provider back-off
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitRecorder: Send + Sync {
    /// Remember that the provider refused work for the account until `retry_at`
    async fn record_rate_limit(&self, account_id: &str, provider: ProviderKind, retry_at: DateTime<Utc>)
        -> Result<()>;

    /// Retry time still in force at `now`, if any
    async fn active_retry_at(
        &self,
        account_id: &str,
        provider: ProviderKind,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
impl RateLimitRecorder for Database {
    async fn record_rate_limit(
        &self,
        account_id: &str,
        provider: ProviderKind,
        retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let account_id = account_id.to_string();
        self.run_blocking(move |db| db.record_rate_limit(&account_id, provider, retry_at))
            .await
    }

    async fn active_retry_at(
        &self,
        account_id: &str,
        provider: ProviderKind,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let account_id = account_id.to_string();
        let retry_at = self
            .run_blocking(move |db| db.get_rate_limit(&account_id, provider))
            .await?;
        Ok(retry_at.filter(|at| *at > now))
    }
}

/// How a guarded unit of work ended
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    /// The work finished
    Completed(T),
    /// The provider refused work until `retry_at`, which was recorded
    RateLimited {
        /// Earliest time to try again
        retry_at: DateTime<Utc>,
    },
}

/// Run `work` for one account, turning a provider rate limit into a recorded back-off
/// instead of an error. Other errors pass through.
pub async fn run_with_rate_limit_recording<T, F>(
    recorder: &dyn RateLimitRecorder,
    account_id: &str,
    provider: ProviderKind,
    work: F,
) -> Result<Guarded<T>>
where
    F: Future<Output = Result<T>> + Send,
{
    match work.await {
        Ok(value) => Ok(Guarded::Completed(value)),
        Err(TrackerError::RateLimited { retry_at }) => {
            warn!(
                email_account_id = account_id,
                provider = provider.as_str(),
                %retry_at,
                "Provider rate limit hit, backing off"
            );
            recorder.record_rate_limit(account_id, provider, retry_at).await?;
            Ok(Guarded::RateLimited { retry_at })
        }
        Err(e) => Err(e),
    }
}
