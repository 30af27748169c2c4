//! Outbound reply processing.
//!
//! Runs once per sent message. A lock keyed by (account, thread, message) moves from
//! unlocked to processing to processed; every early exit after the lock is taken
//! clears it again so a later delivery can retry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::divergence::DraftReconciler;
use crate::error::Result;
use crate::labels::LabelMediator;
use crate::lock::{LockKey, LockService};
use crate::metrics::MetricsCollector;
use crate::models::{ConversationStatus, EmailAccount, MailMessage, NewThreadTracker};
use crate::provider::{Classifier, MailProvider, MailProviderFactory};
use crate::repository::ConversationStore;

/// Why an outbound message was not classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Outbound tracking is off for the account
    TrackingDisabled,
    /// Another delivery holds or already completed the lock
    AlreadyProcessing,
    /// The provider returned no history for the thread
    EmptyThread,
}

impl SkipReason {
    /// Stable identifier used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TrackingDisabled => "tracking_disabled",
            Self::AlreadyProcessing => "already_processing",
            Self::EmptyThread => "empty_thread",
        }
    }
}

/// What handling one outbound message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// The thread was classified and its labels and trackers updated
    Processed {
        /// Status the classifier chose
        status: ConversationStatus,
        /// Tracker kept open for the status, none for FYI/ACTIONED
        tracker_id: Option<i64>,
    },
    /// Nothing was classified
    Skipped(SkipReason),
}

/// Classifies outbound replies and records the resulting conversation status
pub struct OutboundReplyProcessor {
    store: Arc<dyn ConversationStore>,
    providers: Arc<dyn MailProviderFactory>,
    classifier: Arc<dyn Classifier>,
    locks: Arc<dyn LockService>,
    labels: LabelMediator,
    drafts: DraftReconciler,
    metrics: MetricsCollector,
}

impl OutboundReplyProcessor {
    /// Wire the processor to its collaborators; draft reconciliation shares `store`
    pub fn new(
        store: Arc<dyn ConversationStore>,
        providers: Arc<dyn MailProviderFactory>,
        classifier: Arc<dyn Classifier>,
        locks: Arc<dyn LockService>,
        labels: LabelMediator,
        metrics: MetricsCollector,
    ) -> Self {
        let drafts = DraftReconciler::new(Arc::clone(&store), metrics);
        Self {
            store,
            providers,
            classifier,
            locks,
            labels,
            drafts,
            metrics,
        }
    }

    /// Handle one message sent by the account owner
    pub async fn handle_outbound_message(
        &self,
        account: &EmailAccount,
        sent_message: &MailMessage,
    ) -> Result<OutboundOutcome> {
        let provider = self.providers.provider_for(account).await?;

        self.reconcile_drafts(provider.as_ref(), account, sent_message).await;

        if !account.outbound_tracking_enabled {
            debug!(email_account_id = %account.id, "Outbound tracking disabled");
            return Ok(self.skipped(SkipReason::TrackingDisabled));
        }

        let key = LockKey::new(&account.id, &sent_message.thread_id, &sent_message.id);
        if !self.locks.acquire(&key).await? {
            info!(
                email_account_id = %account.id,
                thread_id = %sent_message.thread_id,
                message_id = %sent_message.id,
                "Outbound message already processed or in flight"
            );
            return Ok(self.skipped(SkipReason::AlreadyProcessing));
        }

        match self.classify_and_record(provider.as_ref(), account, sent_message, &key).await {
            Ok(outcome) => {
                if let OutboundOutcome::Skipped(reason) = outcome {
                    self.release(&key).await;
                    return Ok(self.skipped(reason));
                }
                self.metrics.record_outbound("processed");
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    email_account_id = %account.id,
                    thread_id = %sent_message.thread_id,
                    message_id = %sent_message.id,
                    error = %e,
                    "Outbound processing failed, releasing lock"
                );
                self.release(&key).await;
                self.metrics.record_outbound("error");
                Err(e)
            }
        }
    }

    /// Steps run while holding the lock; ends by marking it processed
    async fn classify_and_record(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        sent_message: &MailMessage,
        key: &LockKey,
    ) -> Result<OutboundOutcome> {
        let thread_id = sent_message.thread_id.as_str();
        let history = provider.get_thread_messages(thread_id).await?;
        if history.is_empty() {
            info!(email_account_id = %account.id, thread_id, "Thread history empty, will retry later");
            return Ok(OutboundOutcome::Skipped(SkipReason::EmptyThread));
        }

        let verdict = self.classifier.determine_thread_status(account, &history).await?;
        info!(
            email_account_id = %account.id,
            thread_id,
            status = verdict.status.as_str(),
            rationale = %verdict.rationale,
            "Classified thread"
        );

        self.labels
            .apply_conversation_status(provider, account, thread_id, &sent_message.id, verdict.status)
            .await;

        let tracker_id = match verdict.status.tracker_type() {
            Some(tracker_type) => {
                let tracker = self
                    .store
                    .upsert_tracker(
                        NewThreadTracker {
                            email_account_id: account.id.clone(),
                            thread_id: thread_id.to_string(),
                            message_id: sent_message.id.clone(),
                            tracker_type,
                            sent_at: sent_message.date,
                            follow_up_applied_at: None,
                        },
                        Utc::now(),
                    )
                    .await?;
                let resolved = self
                    .store
                    .resolve_trackers(&account.id, thread_id, Some(tracker_type))
                    .await?;
                debug!(
                    thread_id,
                    tracker_id = tracker.id,
                    tracker_type = tracker_type.as_str(),
                    resolved,
                    "Tracker recorded"
                );
                Some(tracker.id)
            }
            None => {
                let resolved = self.store.resolve_trackers(&account.id, thread_id, None).await?;
                debug!(thread_id, resolved, "Thread trackers resolved");
                None
            }
        };

        self.locks.mark_processed(key).await?;

        Ok(OutboundOutcome::Processed {
            status: verdict.status,
            tracker_id,
        })
    }

    /// Settle outstanding AI drafts on the thread. Never fails the caller.
    async fn reconcile_drafts(&self, provider: &dyn MailProvider, account: &EmailAccount, sent_message: &MailMessage) {
        let thread_id = sent_message.thread_id.as_str();

        if let Err(e) = self
            .drafts
            .track_sent_draft_status(provider, account, thread_id, sent_message)
            .await
        {
            warn!(email_account_id = %account.id, thread_id, error = %e, "Failed to track sent draft");
        }

        if let Err(e) = self
            .drafts
            .cleanup_thread_drafts(provider, account, thread_id, sent_message.date)
            .await
        {
            warn!(email_account_id = %account.id, thread_id, error = %e, "Failed to clean up thread drafts");
        }
    }

    async fn release(&self, key: &LockKey) {
        if let Err(e) = self.locks.clear(key).await {
            warn!(lock_key = %key, error = %e, "Failed to clear processing lock");
        }
    }

    fn skipped(&self, reason: SkipReason) -> OutboundOutcome {
        self.metrics.record_outbound(reason.as_str());
        OutboundOutcome::Skipped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelNames;
    use crate::error::TrackerError;
    use crate::lock::MockLockService;
    use crate::models::{BodyKind, ProviderKind, ThreadTracker, TrackerType};
    use crate::provider::{MockClassifier, MockMailProvider, MockMailProviderFactory, StatusVerdict};
    use crate::repository::MockConversationStore;
    use mockall::predicate::eq;

    fn account(enabled: bool) -> EmailAccount {
        EmailAccount {
            id: "acc".into(),
            email: "me@example.com".into(),
            provider: ProviderKind::Google,
            outbound_tracking_enabled: enabled,
            follow_up_awaiting_reply_days: Some(3),
            follow_up_needs_reply_days: None,
            follow_up_auto_draft_enabled: false,
        }
    }

    fn sent() -> MailMessage {
        MailMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            from: "me@example.com".into(),
            subject: "Re: plan".into(),
            date: Utc::now(),
            body_kind: BodyKind::Plain,
            body: Some("Sounds good".into()),
        }
    }

    fn quiet_store() -> MockConversationStore {
        let mut store = MockConversationStore::new();
        store.expect_outstanding_draft_actions().returning(|_, _| Ok(Vec::new()));
        store
            .expect_get_cached_label()
            .returning(|_, kind| Ok(Some(format!("id-{}", kind.as_str()))));
        store
    }

    fn factory(provider: MockMailProvider) -> MockMailProviderFactory {
        let provider: Arc<dyn MailProvider> = Arc::new(provider);
        let mut factory = MockMailProviderFactory::new();
        factory
            .expect_provider_for()
            .returning(move |_| Ok(Arc::clone(&provider)));
        factory
    }

    fn processor(
        store: MockConversationStore,
        provider: MockMailProvider,
        classifier: MockClassifier,
        locks: MockLockService,
    ) -> OutboundReplyProcessor {
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let metrics = MetricsCollector::default();
        OutboundReplyProcessor::new(
            Arc::clone(&store),
            Arc::new(factory(provider)),
            Arc::new(classifier),
            Arc::new(locks),
            LabelMediator::new(store, LabelNames::default(), metrics),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_disabled_tracking_takes_no_lock() {
        let mut locks = MockLockService::new();
        locks.expect_acquire().never();
        let processor = processor(quiet_store(), MockMailProvider::new(), MockClassifier::new(), locks);

        let outcome = processor.handle_outbound_message(&account(false), &sent()).await.unwrap();
        assert_eq!(outcome, OutboundOutcome::Skipped(SkipReason::TrackingDisabled));
    }

    #[tokio::test]
    async fn test_lock_held_skips() {
        let mut locks = MockLockService::new();
        locks.expect_acquire().returning(|_| Ok(false));
        locks.expect_clear().never();
        let mut classifier = MockClassifier::new();
        classifier.expect_determine_thread_status().never();
        let processor = processor(quiet_store(), MockMailProvider::new(), classifier, locks);

        let outcome = processor.handle_outbound_message(&account(true), &sent()).await.unwrap();
        assert_eq!(outcome, OutboundOutcome::Skipped(SkipReason::AlreadyProcessing));
    }

    #[tokio::test]
    async fn test_empty_thread_clears_lock() {
        let mut locks = MockLockService::new();
        locks.expect_acquire().returning(|_| Ok(true));
        locks.expect_clear().times(1).returning(|_| Ok(()));
        locks.expect_mark_processed().never();
        let mut provider = MockMailProvider::new();
        provider.expect_get_thread_messages().returning(|_| Ok(Vec::new()));
        let processor = processor(quiet_store(), provider, MockClassifier::new(), locks);

        let outcome = processor.handle_outbound_message(&account(true), &sent()).await.unwrap();
        assert_eq!(outcome, OutboundOutcome::Skipped(SkipReason::EmptyThread));
    }

    #[tokio::test]
    async fn test_classifier_error_clears_lock() {
        let mut locks = MockLockService::new();
        locks.expect_acquire().returning(|_| Ok(true));
        locks.expect_clear().times(1).returning(|_| Ok(()));
        locks.expect_mark_processed().never();
        let mut provider = MockMailProvider::new();
        provider.expect_get_thread_messages().returning(|_| Ok(vec![sent()]));
        let mut classifier = MockClassifier::new();
        classifier
            .expect_determine_thread_status()
            .returning(|_, _| Err(TrackerError::Classifier("model timeout".into())));
        let processor = processor(quiet_store(), provider, classifier, locks);

        let result = processor.handle_outbound_message(&account(true), &sent()).await;
        assert!(matches!(result, Err(TrackerError::Classifier(_))));
    }

    #[tokio::test]
    async fn test_awaiting_reply_upserts_and_marks_processed() {
        let mut store = quiet_store();
        store
            .expect_upsert_tracker()
            .withf(|new, _| new.tracker_type == TrackerType::AwaitingReply && new.message_id == "m1")
            .times(1)
            .returning(|new, now| {
                Ok(ThreadTracker {
                    id: 42,
                    email_account_id: new.email_account_id,
                    thread_id: new.thread_id,
                    message_id: new.message_id,
                    tracker_type: new.tracker_type,
                    resolved: false,
                    sent_at: new.sent_at,
                    created_at: now,
                    follow_up_applied_at: None,
                    follow_up_draft_id: None,
                })
            });
        store
            .expect_resolve_trackers()
            .with(eq("acc"), eq("t1"), eq(Some(TrackerType::AwaitingReply)))
            .times(1)
            .returning(|_, _, _| Ok(1));

        let mut locks = MockLockService::new();
        locks.expect_acquire().returning(|_| Ok(true));
        locks.expect_mark_processed().times(1).returning(|_| Ok(()));
        locks.expect_clear().never();

        let mut provider = MockMailProvider::new();
        provider.expect_get_thread_messages().returning(|_| Ok(vec![sent()]));
        provider.expect_remove_thread_labels().returning(|_, _| Ok(()));
        provider.expect_label_message().returning(|_, _| Ok(()));

        let mut classifier = MockClassifier::new();
        classifier.expect_determine_thread_status().returning(|_, _| {
            Ok(StatusVerdict {
                status: ConversationStatus::AwaitingReply,
                rationale: "asked a question".into(),
            })
        });

        let processor = processor(store, provider, classifier, locks);
        let outcome = processor.handle_outbound_message(&account(true), &sent()).await.unwrap();
        assert_eq!(
            outcome,
            OutboundOutcome::Processed {
                status: ConversationStatus::AwaitingReply,
                tracker_id: Some(42)
            }
        );
    }

    #[tokio::test]
    async fn test_actioned_resolves_all_trackers() {
        let mut store = quiet_store();
        store.expect_upsert_tracker().never();
        store
            .expect_resolve_trackers()
            .with(eq("acc"), eq("t1"), eq(None::<TrackerType>))
            .times(1)
            .returning(|_, _, _| Ok(2));

        let mut locks = MockLockService::new();
        locks.expect_acquire().returning(|_| Ok(true));
        locks.expect_mark_processed().times(1).returning(|_| Ok(()));

        let mut provider = MockMailProvider::new();
        provider.expect_get_thread_messages().returning(|_| Ok(vec![sent()]));
        provider.expect_remove_thread_labels().returning(|_, _| Ok(()));
        provider.expect_label_message().returning(|_, _| Ok(()));

        let mut classifier = MockClassifier::new();
        classifier.expect_determine_thread_status().returning(|_, _| {
            Ok(StatusVerdict {
                status: ConversationStatus::Actioned,
                rationale: "done".into(),
            })
        });

        let processor = processor(store, provider, classifier, locks);
        let outcome = processor.handle_outbound_message(&account(true), &sent()).await.unwrap();
        assert_eq!(
            outcome,
            OutboundOutcome::Processed {
                status: ConversationStatus::Actioned,
                tracker_id: None
            }
        );
    }
}
