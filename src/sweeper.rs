//! Scheduled follow-up sweep.
//!
//! For every account with a follow-up threshold, threads carrying the awaiting-reply or
//! to-reply label whose latest message is old enough get the follow-up label, a tracker
//! stamped with `follow_up_applied_at` and optionally a follow-up draft. The processed
//! ledger and the tracker uniqueness constraint keep repeated or concurrent sweeps from
//! doing the same work twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::FollowUpConfig;
use crate::divergence::DraftReconciler;
use crate::error::{Result, TrackerError};
use crate::labels::LabelMediator;
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{
    EmailAccount, LabelKind, MailMessage, NewThreadTracker, SweepStats, Thread, ThreadTracker, TrackerType,
    WriteOutcome,
};
use crate::provider::{DraftGenerator, FollowUpDraftRequest, MailProvider, MailProviderFactory};
use crate::rate_limit::{run_with_rate_limit_recording, Guarded, RateLimitRecorder};
use crate::repository::ConversationStore;

/// How one account's sweep ended
#[derive(Debug, Clone, PartialEq)]
pub enum AccountOutcome {
    /// Counters for every enabled follow-up type
    Swept(Vec<(TrackerType, SweepStats)>),
    /// Provider back-off in force or hit during the sweep
    RateLimited {
        /// Earliest time the provider accepts work again
        retry_at: DateTime<Utc>,
    },
    /// The account could not be swept at all
    Failed(String),
}

/// Outcome of sweeping one account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSweep {
    /// Account that was swept
    pub email_account_id: String,
    /// How the sweep ended
    pub outcome: AccountOutcome,
}

/// Result of one sweep over all eligible accounts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// One entry per account the sweep started
    pub accounts: Vec<AccountSweep>,
    /// The deadline passed before every thread was visited
    pub deadline_reached: bool,
}

impl SweepReport {
    /// Counters summed over all accounts for one type
    #[must_use]
    pub fn totals(&self, tracker_type: TrackerType) -> SweepStats {
        let mut total = SweepStats::default();
        for account in &self.accounts {
            if let AccountOutcome::Swept(per_type) = &account.outcome {
                for (_, stats) in per_type.iter().filter(|(ty, _)| *ty == tracker_type) {
                    total.processed += stats.processed;
                    total.skipped_already_processed += stats.skipped_already_processed;
                    total.skipped_no_latest_message += stats.skipped_no_latest_message;
                    total.skipped_too_recent += stats.skipped_too_recent;
                    total.errors += stats.errors;
                }
            }
        }
        total
    }
}

/// Why a thread was not followed up
enum ThreadSkip {
    NoLatestMessage,
    TooRecent,
    AlreadyProcessed,
}

/// Runs follow-up sweeps over all accounts
pub struct FollowUpSweeper {
    store: Arc<dyn ConversationStore>,
    providers: Arc<dyn MailProviderFactory>,
    rate_limits: Arc<dyn RateLimitRecorder>,
    draft_generator: Arc<dyn DraftGenerator>,
    labels: LabelMediator,
    drafts: DraftReconciler,
    settings: FollowUpConfig,
    metrics: MetricsCollector,
}

impl FollowUpSweeper {
    /// Wire the sweeper to its collaborators; stale-draft cleanup shares `store`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        providers: Arc<dyn MailProviderFactory>,
        rate_limits: Arc<dyn RateLimitRecorder>,
        draft_generator: Arc<dyn DraftGenerator>,
        labels: LabelMediator,
        settings: FollowUpConfig,
        metrics: MetricsCollector,
    ) -> Self {
        let drafts = DraftReconciler::new(Arc::clone(&store), metrics);
        Self {
            store,
            providers,
            rate_limits,
            draft_generator,
            labels,
            drafts,
            settings,
            metrics,
        }
    }

    /// Sweep every eligible account, bounded by the configured timeout
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let deadline = (self.settings.sweep_timeout_secs > 0)
            .then(|| Instant::now() + std::time::Duration::from_secs(self.settings.sweep_timeout_secs));
        self.run_until(now, deadline).await
    }

    /// Sweep every eligible account; no thread is started after `deadline`
    pub async fn run_until(&self, now: DateTime<Utc>, deadline: Option<Instant>) -> Result<SweepReport> {
        let timer = OperationTimer::new("follow_up_sweep");
        let accounts = self.store.list_follow_up_accounts().await?;
        info!(accounts = accounts.len(), "Starting follow-up sweep");

        let mut report = SweepReport::default();
        for account in &accounts {
            if deadline_passed(deadline) {
                report.deadline_reached = true;
                warn!(email_account_id = %account.id, "Sweep deadline reached, stopping");
                break;
            }

            let outcome = self.sweep_account(account, now, deadline).await;
            report.accounts.push(AccountSweep {
                email_account_id: account.id.clone(),
                outcome,
            });
        }
        report.deadline_reached |= deadline_passed(deadline);

        timer.finish();
        Ok(report)
    }

    /// Sweep one account inside the rate-limit guard
    pub async fn sweep_account(
        &self,
        account: &EmailAccount,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> AccountOutcome {
        match self
            .rate_limits
            .active_retry_at(&account.id, account.provider, now)
            .await
        {
            Ok(Some(retry_at)) => {
                info!(email_account_id = %account.id, %retry_at, "Account backing off, skipping");
                self.metrics.record_rate_limited_account(account.provider.as_str());
                return AccountOutcome::RateLimited { retry_at };
            }
            Ok(None) => {}
            Err(e) => warn!(email_account_id = %account.id, error = %e, "Failed to read rate limit state"),
        }

        let work = async {
            let provider = self.providers.provider_for(account).await?;
            self.sweep_types(provider.as_ref(), account, now, deadline).await
        };

        match run_with_rate_limit_recording(self.rate_limits.as_ref(), &account.id, account.provider, work).await {
            Ok(Guarded::Completed(per_type)) => AccountOutcome::Swept(per_type),
            Ok(Guarded::RateLimited { retry_at }) => {
                self.metrics.record_rate_limited_account(account.provider.as_str());
                AccountOutcome::RateLimited { retry_at }
            }
            Err(e) => {
                error!(email_account_id = %account.id, error = %e, "Follow-up sweep failed for account");
                AccountOutcome::Failed(e.to_string())
            }
        }
    }

    async fn sweep_types(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Vec<(TrackerType, SweepStats)>> {
        let mut per_type = Vec::with_capacity(TrackerType::FOLLOW_UP_TYPES.len());

        for tracker_type in TrackerType::FOLLOW_UP_TYPES {
            let Some(days) = account.follow_up_days(tracker_type) else {
                continue;
            };

            let started = Instant::now();
            let stats = match self
                .sweep_type(provider, account, tracker_type, days, now, deadline)
                .await
            {
                Ok(stats) => stats,
                Err(e @ TrackerError::RateLimited { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        email_account_id = %account.id,
                        tracker_type = tracker_type.as_str(),
                        error = %e,
                        "Follow-up sweep failed for type"
                    );
                    SweepStats {
                        errors: 1,
                        ..SweepStats::default()
                    }
                }
            };

            self.metrics.record_sweep(tracker_type, &stats, started.elapsed());
            info!(
                email_account_id = %account.id,
                tracker_type = tracker_type.as_str(),
                processed = stats.processed,
                skipped = stats.skipped(),
                skipped_already_processed = stats.skipped_already_processed,
                skipped_no_latest_message = stats.skipped_no_latest_message,
                skipped_too_recent = stats.skipped_too_recent,
                errors = stats.errors,
                "Follow-up sweep finished"
            );
            per_type.push((tracker_type, stats));
        }

        Ok(per_type)
    }

    async fn sweep_type(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        tracker_type: TrackerType,
        threshold_days: u32,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let Some(label_id) = self
            .labels
            .find_label(provider, account, tracker_type.status().into())
            .await?
        else {
            debug!(
                email_account_id = %account.id,
                tracker_type = tracker_type.as_str(),
                "No status label in mailbox, nothing to sweep"
            );
            return Ok(stats);
        };

        let threads = provider
            .get_threads_with_label(&label_id, self.settings.max_threads_per_label)
            .await?;
        if threads.is_empty() {
            return Ok(stats);
        }

        let thread_ids: Vec<String> = threads.iter().map(|t| t.id.clone()).collect();
        let ledger = self.store.processed_ledger(&account.id, &thread_ids).await?;
        let cutoff = eligibility_cutoff(now, threshold_days, self.settings.eligibility_window_minutes);

        for thread in &threads {
            if deadline_passed(deadline) {
                warn!(email_account_id = %account.id, "Sweep deadline reached, leaving remaining threads");
                break;
            }

            let latest = match screen_thread(provider, thread, cutoff, &ledger) {
                Ok(latest) => latest,
                Err(skip) => {
                    match skip {
                        ThreadSkip::NoLatestMessage => stats.skipped_no_latest_message += 1,
                        ThreadSkip::TooRecent => stats.skipped_too_recent += 1,
                        ThreadSkip::AlreadyProcessed => stats.skipped_already_processed += 1,
                    }
                    continue;
                }
            };

            match self
                .follow_up_thread(provider, account, tracker_type, &thread.id, &latest, now)
                .await
            {
                Ok(()) => stats.processed += 1,
                Err(e @ TrackerError::RateLimited { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        email_account_id = %account.id,
                        thread_id = %thread.id,
                        message_id = %latest.id,
                        error = %e,
                        "Failed to follow up thread"
                    );
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Label, tracker and draft for one eligible thread
    async fn follow_up_thread(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        tracker_type: TrackerType,
        thread_id: &str,
        latest: &MailMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.apply_follow_up_label(provider, account, thread_id, latest).await?;

        let tracker = self
            .persist_follow_up_tracker(&account.id, thread_id, latest, tracker_type, now)
            .await?;
        info!(
            email_account_id = %account.id,
            thread_id,
            message_id = %latest.id,
            tracker_id = tracker.id,
            tracker_type = tracker_type.as_str(),
            "Follow-up applied"
        );

        if account.follow_up_auto_draft_enabled {
            self.generate_draft(provider, account, thread_id, tracker.id, now).await?;
        }

        Ok(())
    }

    /// Best effort: only a rate limit escapes
    async fn apply_follow_up_label(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        thread_id: &str,
        latest: &MailMessage,
    ) -> Result<()> {
        let labeled = match self.labels.resolve_label(provider, account, LabelKind::FollowUp).await {
            Ok(label_id) => provider.label_message(&latest.id, &label_id).await,
            Err(e) => Err(e),
        };

        match labeled {
            Ok(()) => Ok(()),
            Err(e @ TrackerError::RateLimited { .. }) => Err(e),
            Err(e) => {
                warn!(
                    email_account_id = %account.id,
                    thread_id,
                    message_id = %latest.id,
                    error = %e,
                    "Failed to apply follow-up label"
                );
                self.metrics.record_label_failure("follow_up");
                Ok(())
            }
        }
    }

    /// Stamp the follow-up on the thread's tracker of `tracker_type`.
    ///
    /// Updates the open tracker in place or creates one. A collision with a row written
    /// concurrently for the same message falls back to the upsert on the natural key.
    pub async fn persist_follow_up_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        latest: &MailMessage,
        tracker_type: TrackerType,
        now: DateTime<Utc>,
    ) -> Result<ThreadTracker> {
        let new = NewThreadTracker {
            email_account_id: account_id.to_string(),
            thread_id: thread_id.to_string(),
            message_id: latest.id.clone(),
            tracker_type,
            sent_at: latest.date,
            follow_up_applied_at: Some(now),
        };

        let outcome = match self
            .store
            .find_unresolved_tracker(account_id, thread_id, tracker_type)
            .await?
        {
            Some(existing) => {
                self.store
                    .update_tracker_follow_up(existing.id, &latest.id, latest.date, now)
                    .await?
            }
            None => self.store.create_tracker(new.clone(), now).await?,
        };

        match outcome {
            WriteOutcome::Created(tracker) | WriteOutcome::Updated(tracker) => Ok(tracker),
            WriteOutcome::Conflict => {
                debug!(thread_id, message_id = %latest.id, "Tracker write collided, upserting");
                self.store.upsert_tracker(new, now).await
            }
        }
    }

    /// Clear stale drafts, then ask for a follow-up draft. Failures never undo the follow-up.
    async fn generate_draft(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        thread_id: &str,
        tracker_id: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.drafts.cleanup_thread_drafts(provider, account, thread_id, now).await {
            Ok(_) => {}
            Err(e @ TrackerError::RateLimited { .. }) => return Err(e),
            Err(e) => warn!(email_account_id = %account.id, thread_id, error = %e, "Stale draft cleanup failed"),
        }

        let request = FollowUpDraftRequest {
            account: account.clone(),
            thread_id: thread_id.to_string(),
            tracker_id,
        };
        if let Err(e) = self.draft_generator.generate_follow_up_draft(request).await {
            error!(
                email_account_id = %account.id,
                thread_id,
                tracker_id,
                error = %e,
                "Follow-up draft generation failed"
            );
            self.metrics.record_draft_generation_failure();
        }

        Ok(())
    }
}

/// Latest message time at or before which a thread is due for a follow-up
#[must_use]
pub fn eligibility_cutoff(now: DateTime<Utc>, threshold_days: u32, window_minutes: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(threshold_days)) - Duration::minutes(i64::from(window_minutes))
}

fn screen_thread(
    provider: &dyn MailProvider,
    thread: &Thread,
    cutoff: DateTime<Utc>,
    ledger: &HashMap<String, HashSet<String>>,
) -> std::result::Result<MailMessage, ThreadSkip> {
    let latest = provider
        .latest_message_from_snapshot(thread)
        .ok_or(ThreadSkip::NoLatestMessage)?;
    if latest.date > cutoff {
        return Err(ThreadSkip::TooRecent);
    }
    if ledger
        .get(&thread.id)
        .is_some_and(|messages| messages.contains(&latest.id))
    {
        return Err(ThreadSkip::AlreadyProcessed);
    }
    Ok(latest)
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
