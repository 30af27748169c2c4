//! Draft divergence detection.
//!
//! Decides whether an AI draft was left untouched, edited or sent, using the
//! normalized text of both sides. Cleanup only ever deletes drafts proven unmodified.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::metrics::MetricsCollector;
use crate::models::{EmailAccount, ExecutedAction, MailMessage};
use crate::normalizer::{normalize_for_comparison, normalize_text};
use crate::provider::MailProvider;
use crate::repository::ConversationStore;

/// True when `current` still says exactly what the system generated.
///
/// An empty original is never unmodified, so it can never trigger a deletion.
#[must_use]
pub fn is_draft_unmodified(original_content: &str, current: &MailMessage) -> bool {
    let original = normalize_text(original_content);
    if original.is_empty() {
        return false;
    }
    original == normalize_for_comparison(current)
}

/// Normalized Levenshtein similarity of the generated text and what was sent, in `0.0..=1.0`
#[must_use]
pub fn similarity_score(original_content: &str, sent: &MailMessage) -> f64 {
    let original = normalize_text(original_content);
    let sent = normalize_for_comparison(sent);
    strsim::normalized_levenshtein(&original, &sent)
}

/// How an outbound message settled the thread's outstanding draft
#[derive(Debug, Clone, PartialEq)]
pub enum DraftResolution {
    /// No outstanding draft on the thread
    NoOutstandingDraft,
    /// The draft still exists, so the user sent something else
    SentOther {
        /// Draft action marked not sent
        action_id: i64,
    },
    /// The draft is gone and the sent message was scored against it
    Sent {
        /// Draft action closed by a send log
        action_id: i64,
        /// Similarity of the sent text to the generated draft
        similarity_score: f64,
    },
}

/// Result of a stale-draft cleanup pass over one thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Unmodified drafts deleted from the mailbox
    pub deleted: usize,
    /// Drafts the provider no longer has
    pub missing: usize,
    /// Drafts the user edited
    pub kept: usize,
    /// Drafts that could not be checked
    pub errors: usize,
}

enum CleanupStep {
    Deleted,
    Missing,
    Kept,
}

/// Reconciles recorded draft actions with the provider's drafts
#[derive(Clone)]
pub struct DraftReconciler {
    store: Arc<dyn ConversationStore>,
    metrics: MetricsCollector,
}

impl DraftReconciler {
    /// Reconciler recording draft fates in `store`
    pub fn new(store: Arc<dyn ConversationStore>, metrics: MetricsCollector) -> Self {
        Self { store, metrics }
    }

    /// Settle the most recent outstanding draft of a thread after `sent_message` went out
    pub async fn track_sent_draft_status(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        thread_id: &str,
        sent_message: &MailMessage,
    ) -> Result<DraftResolution> {
        let outstanding = self.store.outstanding_draft_actions(&account.id, thread_id).await?;
        let Some((action, draft_id)) = outstanding
            .into_iter()
            .find_map(|action| action.draft_id.clone().map(|id| (action, id)))
        else {
            debug!(email_account_id = %account.id, thread_id, "No outstanding draft to reconcile");
            return Ok(DraftResolution::NoOutstandingDraft);
        };

        if draft_exists(provider, &draft_id).await? {
            self.store.mark_draft_sent_status(action.id, false).await?;
            self.metrics.record_draft_resolution("sent_other");
            info!(
                email_account_id = %account.id,
                thread_id,
                action_id = action.id,
                "Draft still present, user sent a different message"
            );
            return Ok(DraftResolution::SentOther { action_id: action.id });
        }

        let score = similarity_score(&action.content, sent_message);
        self.store
            .record_draft_send(action.id, &sent_message.id, score, Utc::now())
            .await?;
        self.metrics.record_draft_resolution("sent");
        self.metrics.record_draft_similarity(score);
        info!(
            email_account_id = %account.id,
            thread_id,
            action_id = action.id,
            similarity = score,
            "Draft sent"
        );

        Ok(DraftResolution::Sent {
            action_id: action.id,
            similarity_score: score,
        })
    }

    /// Delete unmodified drafts created at or before `older_than`.
    ///
    /// Provider rate limits abort the pass; any other per-draft failure is counted and
    /// the remaining drafts are still processed.
    pub async fn cleanup_thread_drafts(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        thread_id: &str,
        older_than: DateTime<Utc>,
    ) -> Result<CleanupSummary> {
        let outstanding = self.store.outstanding_draft_actions(&account.id, thread_id).await?;
        let mut summary = CleanupSummary::default();

        for action in outstanding.iter().filter(|a| a.created_at <= older_than) {
            match self.cleanup_one(provider, action).await {
                Ok(CleanupStep::Deleted) => summary.deleted += 1,
                Ok(CleanupStep::Missing) => summary.missing += 1,
                Ok(CleanupStep::Kept) => summary.kept += 1,
                Err(e @ TrackerError::RateLimited { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        email_account_id = %account.id,
                        thread_id,
                        action_id = action.id,
                        error = %e,
                        "Failed to clean up draft"
                    );
                    summary.errors += 1;
                }
            }
        }

        if summary != CleanupSummary::default() {
            info!(
                email_account_id = %account.id,
                thread_id,
                deleted = summary.deleted,
                missing = summary.missing,
                kept = summary.kept,
                errors = summary.errors,
                "Draft cleanup finished"
            );
        }

        Ok(summary)
    }

    async fn cleanup_one(&self, provider: &dyn MailProvider, action: &ExecutedAction) -> Result<CleanupStep> {
        let Some(draft_id) = action.draft_id.as_deref() else {
            return Ok(CleanupStep::Kept);
        };

        let draft = match provider.get_draft(draft_id).await {
            Ok(draft) => draft,
            Err(TrackerError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        match draft {
            None => {
                self.store.mark_draft_sent_status(action.id, false).await?;
                self.metrics.record_draft_resolution("missing");
                Ok(CleanupStep::Missing)
            }
            Some(draft) if is_draft_unmodified(&action.content, &draft.message) => {
                provider.delete_draft(draft_id).await?;
                self.store.mark_draft_sent_status(action.id, false).await?;
                self.metrics.record_draft_resolution("deleted");
                Ok(CleanupStep::Deleted)
            }
            Some(_) => {
                debug!(action_id = action.id, "Draft edited by user, keeping it");
                Ok(CleanupStep::Kept)
            }
        }
    }
}

async fn draft_exists(provider: &dyn MailProvider, draft_id: &str) -> Result<bool> {
    match provider.get_draft(draft_id).await {
        Ok(draft) => Ok(draft.is_some()),
        Err(TrackerError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
