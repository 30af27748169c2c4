//! Idempotency locks for outbound reply processing.
//!
//! A key moves `free → processing → processed`. `processing` expires after a TTL so a
//! crashed worker cannot block retries forever; `processed` never expires.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::db::Database;
use crate::error::Result;

/// Lock identity: one outbound message on one thread of one account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Owning account
    pub email_account_id: String,
    /// Provider thread id
    pub thread_id: String,
    /// Outbound message id
    pub message_id: String,
}

impl LockKey {
    pub fn new(email_account_id: &str, thread_id: &str, message_id: &str) -> Self {
        Self {
            email_account_id: email_account_id.to_string(),
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reply-tracker:{}:{}:{}", self.email_account_id, self.thread_id, self.message_id)
    }
}

/// Per-message processing lock
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lock; false when it is held or already processed
    async fn acquire(&self, key: &LockKey) -> Result<bool>;

    /// Make the key permanently done
    async fn mark_processed(&self, key: &LockKey) -> Result<()>;

    /// Release an in-flight lock so a later delivery can retry
    async fn clear(&self, key: &LockKey) -> Result<()>;
}

/// Lock service backed by the `reply_processing_locks` table
#[derive(Clone)]
pub struct DbLockService {
    db: Database,
    processing_ttl: Duration,
}

impl DbLockService {
    pub const fn new(db: Database, processing_ttl: Duration) -> Self {
        Self { db, processing_ttl }
    }
}

#[async_trait]
impl LockService for DbLockService {
    async fn acquire(&self, key: &LockKey) -> Result<bool> {
        let key = key.to_string();
        let ttl = self.processing_ttl;
        self.db
            .run_blocking(move |db| db.try_acquire_lock(&key, Utc::now(), ttl))
            .await
    }

    async fn mark_processed(&self, key: &LockKey) -> Result<()> {
        let key = key.to_string();
        self.db.run_blocking(move |db| db.mark_lock_processed(&key)).await
    }

    async fn clear(&self, key: &LockKey) -> Result<()> {
        let key = key.to_string();
        self.db.run_blocking(move |db| db.clear_lock(&key)).await
    }
}
