//! Data models for conversation tracking
//!
//! This module contains the data structures shared by the store, the label mediator,
//! the outbound processor and the follow-up sweeper: tracker rows, draft actions,
//! provider-agnostic messages and the conversation status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;

/// Mail provider backing an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Gmail API
    Google,
    /// Microsoft Graph / Outlook
    Microsoft,
}

impl ProviderKind {
    /// Stable identifier used in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(TrackerError::InvalidInput(format!("unknown provider: {other}"))),
        }
    }
}

/// One of the four mutually exclusive labels a thread can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    /// The account owner owes a reply
    ToReply,
    /// The account owner is waiting on the other side
    AwaitingReply,
    /// Informational, nothing to do
    Fyi,
    /// Done
    Actioned,
}

impl ConversationStatus {
    /// All statuses, in label display order
    pub const ALL: [Self; 4] = [Self::ToReply, Self::AwaitingReply, Self::Fyi, Self::Actioned];

    /// Stable identifier used in the database and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ToReply => "TO_REPLY",
            Self::AwaitingReply => "AWAITING_REPLY",
            Self::Fyi => "FYI",
            Self::Actioned => "ACTIONED",
        }
    }

    /// The other three statuses
    pub fn others(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |s| *s != self)
    }

    /// Tracker type that keeps this status alive, if any
    #[must_use]
    pub const fn tracker_type(&self) -> Option<TrackerType> {
        match self {
            Self::ToReply => Some(TrackerType::NeedsReply),
            Self::AwaitingReply => Some(TrackerType::AwaitingReply),
            Self::Fyi | Self::Actioned => None,
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TrackerError::InvalidInput(format!("unknown conversation status: {s}")))
    }
}

/// Kind of row in the thread tracker table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerType {
    /// We sent the last message and expect a reply
    AwaitingReply,
    /// They sent the last message and expect a reply from us
    NeedsReply,
    /// Something other than a reply is expected from us
    NeedsAction,
}

impl TrackerType {
    /// Types the follow-up sweeper handles
    pub const FOLLOW_UP_TYPES: [Self; 2] = [Self::AwaitingReply, Self::NeedsReply];

    /// Stable identifier used in the database and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingReply => "AWAITING_REPLY",
            Self::NeedsReply => "NEEDS_REPLY",
            Self::NeedsAction => "NEEDS_ACTION",
        }
    }

    /// Status label that marks threads of this type in the mailbox
    #[must_use]
    pub const fn status(&self) -> ConversationStatus {
        match self {
            Self::AwaitingReply => ConversationStatus::AwaitingReply,
            Self::NeedsReply | Self::NeedsAction => ConversationStatus::ToReply,
        }
    }
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_REPLY" => Ok(Self::AwaitingReply),
            "NEEDS_REPLY" => Ok(Self::NeedsReply),
            "NEEDS_ACTION" => Ok(Self::NeedsAction),
            other => Err(TrackerError::InvalidInput(format!("unknown tracker type: {other}"))),
        }
    }
}

/// Labels whose provider ids are cached per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    /// One of the four conversation statuses
    Status(ConversationStatus),
    /// Label applied by the follow-up sweeper
    FollowUp,
}

impl LabelKind {
    /// Key under which the label id is cached
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Status(status) => status.as_str(),
            Self::FollowUp => "FOLLOW_UP",
        }
    }
}

impl From<ConversationStatus> for LabelKind {
    fn from(status: ConversationStatus) -> Self {
        Self::Status(status)
    }
}

/// Tracking settings of an email account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAccount {
    /// Account identifier
    pub id: String,
    /// Mailbox address
    pub email: String,
    /// Provider backing the mailbox
    pub provider: ProviderKind,
    /// Whether outbound replies are classified
    pub outbound_tracking_enabled: bool,
    /// Days before an awaiting-reply thread gets a follow-up, `None` disables
    pub follow_up_awaiting_reply_days: Option<u32>,
    /// Days before a needs-reply thread gets a follow-up, `None` disables
    pub follow_up_needs_reply_days: Option<u32>,
    /// Whether the sweeper asks for a follow-up draft
    pub follow_up_auto_draft_enabled: bool,
}

impl EmailAccount {
    /// Follow-up threshold for the given tracker type
    #[must_use]
    pub const fn follow_up_days(&self, tracker_type: TrackerType) -> Option<u32> {
        match tracker_type {
            TrackerType::AwaitingReply => self.follow_up_awaiting_reply_days,
            TrackerType::NeedsReply => self.follow_up_needs_reply_days,
            TrackerType::NeedsAction => None,
        }
    }
}

/// Stored thread tracker row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadTracker {
    /// Database primary key
    pub id: i64,
    /// Owning account
    pub email_account_id: String,
    /// Provider thread id
    pub thread_id: String,
    /// Message whose age/status triggered tracking
    pub message_id: String,
    /// What the thread is waiting on
    pub tracker_type: TrackerType,
    /// Resolution flag
    pub resolved: bool,
    /// When the tracked message was sent
    pub sent_at: DateTime<Utc>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Set once a follow-up label/draft was applied
    pub follow_up_applied_at: Option<DateTime<Utc>>,
    /// Follow-up draft created for this message
    pub follow_up_draft_id: Option<String>,
}

/// Values for inserting or upserting a tracker
#[derive(Debug, Clone)]
pub struct NewThreadTracker {
    /// Owning account
    pub email_account_id: String,
    /// Provider thread id
    pub thread_id: String,
    /// Message whose age/status triggered tracking
    pub message_id: String,
    /// What the thread is waiting on
    pub tracker_type: TrackerType,
    /// When the tracked message was sent
    pub sent_at: DateTime<Utc>,
    /// Follow-up fingerprint, if the row is written by the sweeper
    pub follow_up_applied_at: Option<DateTime<Utc>>,
}

/// Result of an optimistic write guarded by the tracker uniqueness constraint
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// A new row was inserted
    Created(T),
    /// An existing row was changed
    Updated(T),
    /// The write collided with another row on (account, thread, message)
    Conflict,
}

/// AI draft action recorded by the rule engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedAction {
    /// Database primary key
    pub id: i64,
    /// Owning account
    pub email_account_id: String,
    /// Thread the draft answers
    pub thread_id: String,
    /// Message the draft answers
    pub message_id: String,
    /// Provider draft id, cleared once consumed
    pub draft_id: Option<String>,
    /// Exact text the system generated
    pub content: String,
    /// Fate of the draft once known
    pub was_draft_sent: Option<bool>,
    /// When the draft was generated
    pub created_at: DateTime<Utc>,
}

/// Values for recording a generated draft
#[derive(Debug, Clone)]
pub struct NewDraftAction {
    /// Owning account
    pub email_account_id: String,
    /// Thread the draft answers
    pub thread_id: String,
    /// Message the draft answers
    pub message_id: String,
    /// Provider draft id
    pub draft_id: String,
    /// Exact text the system generated
    pub content: String,
}

/// Similarity telemetry written when a draft's fate is resolved as sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftSendLog {
    /// Database primary key
    pub id: i64,
    /// Draft action this log closes
    pub executed_action_id: i64,
    /// Provider id of the message that was sent
    pub sent_message_id: String,
    /// 1.0 when the sent text equals the draft after normalization
    pub similarity_score: f64,
    /// When the log was written
    pub created_at: DateTime<Utc>,
}

/// Declared kind of a message body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// text/plain
    Plain,
    /// text/html
    Html,
}

/// Provider-agnostic message produced by provider adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider message id
    pub id: String,
    /// Provider thread id
    pub thread_id: String,
    /// Sender address
    pub from: String,
    /// Subject line
    pub subject: String,
    /// Send/receive time
    pub date: DateTime<Utc>,
    /// How `body` is encoded
    pub body_kind: BodyKind,
    /// Body content, if the provider returned one
    pub body: Option<String>,
}

/// Thread snapshot as returned by a label listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Provider thread id
    pub id: String,
    /// Messages known at listing time, oldest first
    pub messages: Vec<MailMessage>,
}

/// Provider label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Provider label id
    pub id: String,
    /// Display name
    pub name: String,
}

/// Provider draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Provider draft id
    pub id: String,
    /// Current draft content
    pub message: MailMessage,
}

/// Counters collected for one follow-up type of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Threads that got a follow-up
    pub processed: usize,
    /// Threads whose latest message is already in the ledger
    pub skipped_already_processed: usize,
    /// Threads without a latest message in the snapshot
    pub skipped_no_latest_message: usize,
    /// Threads whose latest message is not old enough yet
    pub skipped_too_recent: usize,
    /// Threads that failed
    pub errors: usize,
}

impl SweepStats {
    /// Total skipped threads
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_already_processed + self.skipped_no_latest_message + self.skipped_too_recent
    }
}
