//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The tables themselves are created by the SQL files under `migrations/`.

/// Email account tracking settings
pub mod email_accounts {
    /// Table name
    pub const TABLE: &str = "email_accounts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Mailbox address column
    pub const EMAIL: &str = "email";
    /// Provider kind column
    pub const PROVIDER: &str = "provider";
    /// Outbound classification toggle
    pub const OUTBOUND_TRACKING_ENABLED: &str = "outbound_tracking_enabled";
    /// Awaiting-reply follow-up threshold in days
    pub const FOLLOW_UP_AWAITING_REPLY_DAYS: &str = "follow_up_awaiting_reply_days";
    /// Needs-reply follow-up threshold in days
    pub const FOLLOW_UP_NEEDS_REPLY_DAYS: &str = "follow_up_needs_reply_days";
    /// Follow-up auto-draft toggle
    pub const FOLLOW_UP_AUTO_DRAFT_ENABLED: &str = "follow_up_auto_draft_enabled";
}

/// Thread tracker table schema
pub mod thread_trackers {
    /// Table name
    pub const TABLE: &str = "thread_trackers";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning account column
    pub const EMAIL_ACCOUNT_ID: &str = "email_account_id";
    /// Provider thread id column
    pub const THREAD_ID: &str = "thread_id";
    /// Tracked message id column
    pub const MESSAGE_ID: &str = "message_id";
    /// Tracker type column
    pub const TRACKER_TYPE: &str = "tracker_type";
    /// Resolution flag column
    pub const RESOLVED: &str = "resolved";
    /// Tracked message send time column
    pub const SENT_AT: &str = "sent_at";
    /// Row creation time column
    pub const CREATED_AT: &str = "created_at";
    /// Follow-up application time column
    pub const FOLLOW_UP_APPLIED_AT: &str = "follow_up_applied_at";
    /// Follow-up draft id column
    pub const FOLLOW_UP_DRAFT_ID: &str = "follow_up_draft_id";
}

/// Executed draft actions table schema
pub mod executed_actions {
    /// Table name
    pub const TABLE: &str = "executed_actions";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning account column
    pub const EMAIL_ACCOUNT_ID: &str = "email_account_id";
    /// Thread column
    pub const THREAD_ID: &str = "thread_id";
    /// Answered message column
    pub const MESSAGE_ID: &str = "message_id";
    /// Action type column
    pub const ACTION_TYPE: &str = "action_type";
    /// Provider draft id column
    pub const DRAFT_ID: &str = "draft_id";
    /// Generated content column
    pub const CONTENT: &str = "content";
    /// Draft fate column
    pub const WAS_DRAFT_SENT: &str = "was_draft_sent";
    /// Creation time column
    pub const CREATED_AT: &str = "created_at";

    /// Action type stored for AI drafts
    pub const DRAFT_EMAIL: &str = "DRAFT_EMAIL";
}

/// Draft send log table schema
pub mod draft_send_logs {
    /// Table name
    pub const TABLE: &str = "draft_send_logs";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to executed_actions
    pub const EXECUTED_ACTION_ID: &str = "executed_action_id";
    /// Sent message id column
    pub const SENT_MESSAGE_ID: &str = "sent_message_id";
    /// Similarity score column
    pub const SIMILARITY_SCORE: &str = "similarity_score";
    /// Creation time column
    pub const CREATED_AT: &str = "created_at";
}

/// Cached provider label ids
pub mod status_labels {
    /// Table name
    pub const TABLE: &str = "status_labels";
    /// Owning account column
    pub const EMAIL_ACCOUNT_ID: &str = "email_account_id";
    /// Label kind column
    pub const LABEL_KIND: &str = "label_kind";
    /// Provider label id column
    pub const LABEL_ID: &str = "label_id";
    /// Display name column
    pub const LABEL_NAME: &str = "label_name";
}

/// Outbound processing locks
pub mod reply_processing_locks {
    /// Table name
    pub const TABLE: &str = "reply_processing_locks";
    /// Lock key column
    pub const LOCK_KEY: &str = "lock_key";
    /// Lock state column
    pub const STATE: &str = "state";
    /// Expiry (unix seconds) column, NULL once processed
    pub const EXPIRES_AT: &str = "expires_at";

    /// Processing is in flight
    pub const STATE_PROCESSING: &str = "processing";
    /// Processing finished for good
    pub const STATE_PROCESSED: &str = "processed";
}

/// Provider back-off state
pub mod provider_rate_limits {
    /// Table name
    pub const TABLE: &str = "provider_rate_limits";
    /// Owning account column
    pub const EMAIL_ACCOUNT_ID: &str = "email_account_id";
    /// Provider kind column
    pub const PROVIDER: &str = "provider";
    /// Retry time column
    pub const RETRY_AT: &str = "retry_at";
}
