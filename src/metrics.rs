use anyhow::Result;
use metrics::{counter, histogram};

use crate::models::{SweepStats, TrackerType};

/// Metric names emitted by the tracker
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    // Outbound reply processing
    pub outbound_total: &'static str,

    // Follow-up sweeps
    pub follow_up_threads_total: &'static str,
    pub follow_up_accounts_rate_limited_total: &'static str,
    pub follow_up_sweep_duration: &'static str,

    // Labels and drafts
    pub label_failures_total: &'static str,
    pub draft_resolutions_total: &'static str,
    pub draft_similarity: &'static str,
    pub draft_generation_failures_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            outbound_total: "reply_tracker_outbound_total",

            follow_up_threads_total: "reply_tracker_follow_up_threads_total",
            follow_up_accounts_rate_limited_total: "reply_tracker_follow_up_accounts_rate_limited_total",
            follow_up_sweep_duration: "reply_tracker_follow_up_sweep_duration_seconds",

            label_failures_total: "reply_tracker_label_failures_total",
            draft_resolutions_total: "reply_tracker_draft_resolutions_total",
            draft_similarity: "reply_tracker_draft_similarity",
            draft_generation_failures_total: "reply_tracker_draft_generation_failures_total",
        }
    }
}

impl MetricsCollector {
    /// Install a no-op recorder unless the host already installed one
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;

        Ok(())
    }

    /// Record the outcome of one outbound message
    pub fn record_outbound(&self, outcome: &'static str) {
        counter!(self.outbound_total, "outcome" => outcome).increment(1);
    }

    /// Record the counters of one sweep of one follow-up type
    pub fn record_sweep(&self, tracker_type: TrackerType, stats: &SweepStats, duration: std::time::Duration) {
        let ty = tracker_type.as_str();
        let buckets = [
            ("processed", stats.processed),
            ("already_processed", stats.skipped_already_processed),
            ("no_latest_message", stats.skipped_no_latest_message),
            ("too_recent", stats.skipped_too_recent),
            ("error", stats.errors),
        ];
        for (result, count) in buckets {
            counter!(self.follow_up_threads_total, "type" => ty, "result" => result)
                .increment(count as u64);
        }
        histogram!(self.follow_up_sweep_duration, "type" => ty).record(duration.as_secs_f64());
    }

    /// Record an account skipped because of provider back-off
    pub fn record_rate_limited_account(&self, provider: &'static str) {
        counter!(self.follow_up_accounts_rate_limited_total, "provider" => provider).increment(1);
    }

    /// Record a failed label add/remove
    pub fn record_label_failure(&self, operation: &'static str) {
        counter!(self.label_failures_total, "operation" => operation).increment(1);
    }

    /// Record how a draft's fate was resolved
    pub fn record_draft_resolution(&self, resolution: &'static str) {
        counter!(self.draft_resolutions_total, "resolution" => resolution).increment(1);
    }

    /// Record the similarity between an AI draft and what was sent
    pub fn record_draft_similarity(&self, score: f64) {
        histogram!(self.draft_similarity).record(score);
    }

    /// Record a follow-up draft that could not be generated
    pub fn record_draft_generation_failure(&self) {
        counter!(self.draft_generation_failures_total).increment(1);
    }
}
