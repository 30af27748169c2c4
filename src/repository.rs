use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::Result;
use crate::models::{
    DraftSendLog, EmailAccount, ExecutedAction, LabelKind, NewThreadTracker, ThreadTracker, TrackerType,
    WriteOutcome,
};

/// Async view of the conversation status store used by the processors.
///
/// Both the outbound processor and the follow-up sweeper write trackers through this
/// trait; the uniqueness constraint on (account, thread, message) arbitrates their races.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list_follow_up_accounts(&self) -> Result<Vec<EmailAccount>>;

    async fn create_tracker(&self, new: NewThreadTracker, now: DateTime<Utc>) -> Result<WriteOutcome<ThreadTracker>>;

    async fn update_tracker_follow_up(
        &self,
        tracker_id: i64,
        message_id: &str,
        sent_at: DateTime<Utc>,
        follow_up_applied_at: DateTime<Utc>,
    ) -> Result<WriteOutcome<ThreadTracker>>;

    async fn upsert_tracker(&self, new: NewThreadTracker, now: DateTime<Utc>) -> Result<ThreadTracker>;

    async fn find_unresolved_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        tracker_type: TrackerType,
    ) -> Result<Option<ThreadTracker>>;

    async fn resolve_trackers(
        &self,
        account_id: &str,
        thread_id: &str,
        keep_type: Option<TrackerType>,
    ) -> Result<usize>;

    async fn processed_ledger(
        &self,
        account_id: &str,
        thread_ids: &[String],
    ) -> Result<HashMap<String, HashSet<String>>>;

    async fn outstanding_draft_actions(&self, account_id: &str, thread_id: &str) -> Result<Vec<ExecutedAction>>;

    async fn mark_draft_sent_status(&self, action_id: i64, was_sent: bool) -> Result<()>;

    async fn record_draft_send(
        &self,
        action_id: i64,
        sent_message_id: &str,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> Result<DraftSendLog>;

    async fn get_cached_label(&self, account_id: &str, kind: LabelKind) -> Result<Option<String>>;

    async fn cache_label(&self, account_id: &str, kind: LabelKind, label_id: &str, label_name: &str) -> Result<()>;
}

impl Database {
    /// Run a synchronous store call on the blocking pool
    pub(crate) async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl ConversationStore for Database {
    async fn list_follow_up_accounts(&self) -> Result<Vec<EmailAccount>> {
        self.run_blocking(Self::list_follow_up_accounts).await
    }

    async fn create_tracker(&self, new: NewThreadTracker, now: DateTime<Utc>) -> Result<WriteOutcome<ThreadTracker>> {
        self.run_blocking(move |db| db.create_tracker(&new, now)).await
    }

    async fn update_tracker_follow_up(
        &self,
        tracker_id: i64,
        message_id: &str,
        sent_at: DateTime<Utc>,
        follow_up_applied_at: DateTime<Utc>,
    ) -> Result<WriteOutcome<ThreadTracker>> {
        let message_id = message_id.to_string();
        self.run_blocking(move |db| {
            db.update_tracker_follow_up(tracker_id, &message_id, sent_at, follow_up_applied_at)
        })
        .await
    }

    async fn upsert_tracker(&self, new: NewThreadTracker, now: DateTime<Utc>) -> Result<ThreadTracker> {
        self.run_blocking(move |db| db.upsert_tracker(&new, now)).await
    }

    async fn find_unresolved_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        tracker_type: TrackerType,
    ) -> Result<Option<ThreadTracker>> {
        let (account_id, thread_id) = (account_id.to_string(), thread_id.to_string());
        self.run_blocking(move |db| db.find_unresolved_tracker(&account_id, &thread_id, tracker_type))
            .await
    }

    async fn resolve_trackers(
        &self,
        account_id: &str,
        thread_id: &str,
        keep_type: Option<TrackerType>,
    ) -> Result<usize> {
        let (account_id, thread_id) = (account_id.to_string(), thread_id.to_string());
        self.run_blocking(move |db| db.resolve_trackers(&account_id, &thread_id, keep_type))
            .await
    }

    async fn processed_ledger(
        &self,
        account_id: &str,
        thread_ids: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        let account_id = account_id.to_string();
        let thread_ids = thread_ids.to_vec();
        self.run_blocking(move |db| db.processed_ledger(&account_id, &thread_ids))
            .await
    }

    async fn outstanding_draft_actions(&self, account_id: &str, thread_id: &str) -> Result<Vec<ExecutedAction>> {
        let (account_id, thread_id) = (account_id.to_string(), thread_id.to_string());
        self.run_blocking(move |db| db.outstanding_draft_actions(&account_id, &thread_id))
            .await
    }

    async fn mark_draft_sent_status(&self, action_id: i64, was_sent: bool) -> Result<()> {
        self.run_blocking(move |db| db.mark_draft_sent_status(action_id, was_sent))
            .await
    }

    async fn record_draft_send(
        &self,
        action_id: i64,
        sent_message_id: &str,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> Result<DraftSendLog> {
        let sent_message_id = sent_message_id.to_string();
        self.run_blocking(move |db| db.record_draft_send(action_id, &sent_message_id, similarity_score, now))
            .await
    }

    async fn get_cached_label(&self, account_id: &str, kind: LabelKind) -> Result<Option<String>> {
        let account_id = account_id.to_string();
        self.run_blocking(move |db| db.get_cached_label(&account_id, kind)).await
    }

    async fn cache_label(&self, account_id: &str, kind: LabelKind, label_id: &str, label_name: &str) -> Result<()> {
        let (account_id, label_id, label_name) =
            (account_id.to_string(), label_id.to_string(), label_name.to_string());
        self.run_blocking(move |db| db.cache_label(&account_id, kind, &label_id, &label_name))
            .await
    }
}
