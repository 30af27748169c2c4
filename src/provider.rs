//! Collaborator capabilities consumed by the tracker.
//!
//! Mail providers, the AI classifier and the draft generator live outside this crate.
//! Adapters implement these traits and produce the provider-agnostic models from
//! [`crate::models`]; nothing in here knows about Gmail or Graph payloads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ConversationStatus, Draft, EmailAccount, Label, MailMessage, ProviderKind, Thread};

/// Mailbox operations for one account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// All labels currently defined in the mailbox
    async fn get_labels(&self) -> Result<Vec<Label>>;

    /// Create a label with the given display name
    async fn create_label(&self, name: &str) -> Result<Label>;

    /// Add a label to a single message
    async fn label_message(&self, message_id: &str, label_id: &str) -> Result<()>;

    /// Remove labels from every message of a thread
    async fn remove_thread_labels(&self, thread_id: &str, label_ids: &[String]) -> Result<()>;

    /// Threads carrying a label, at most `max_results`
    async fn get_threads_with_label(&self, label_id: &str, max_results: u32) -> Result<Vec<Thread>>;

    /// Newest message of a thread snapshot, without another provider round-trip
    fn latest_message_from_snapshot(&self, thread: &Thread) -> Option<MailMessage>;

    /// Full message history of a thread, oldest first
    async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MailMessage>>;

    /// Fetch a draft, `None` when it no longer exists
    async fn get_draft(&self, draft_id: &str) -> Result<Option<Draft>>;

    /// Delete a draft
    async fn delete_draft(&self, draft_id: &str) -> Result<()>;
}

/// Builds a provider client for an account on demand
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProviderFactory: Send + Sync {
    async fn provider_for(&self, account: &EmailAccount) -> Result<Arc<dyn MailProvider>>;
}

/// Outcome of classifying a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVerdict {
    /// New conversation status
    pub status: ConversationStatus,
    /// Model explanation, logged only
    pub rationale: String,
}

/// AI classification of a thread's history
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn determine_thread_status(
        &self,
        account: &EmailAccount,
        thread_history: &[MailMessage],
    ) -> Result<StatusVerdict>;
}

/// Everything the draft generator needs to write a follow-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpDraftRequest {
    /// Account the draft belongs to
    pub account: EmailAccount,
    /// Thread to follow up on
    pub thread_id: String,
    /// Tracker stamped by the sweep, to attach the draft id to
    pub tracker_id: i64,
}

/// Writes follow-up drafts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate_follow_up_draft(&self, request: FollowUpDraftRequest) -> Result<()>;
}
