//! Reply Tracker - Conversation Status and Follow-ups for Email Threads
//!
//! A Rust library that keeps track of where each email thread stands and acts on it
//! over time.
//!
//! # Features
//!
//! - Mutually exclusive status labels (To Reply, Awaiting Reply, FYI, Actioned)
//! - Lock-guarded classification of outbound replies
//! - Scheduled follow-up sweeps with a processed ledger
//! - AI draft reconciliation: stale-draft cleanup and edit similarity scoring
//! - Conflict-safe tracker persistence on SQLite

/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Draft divergence detection and reconciliation
pub mod divergence;
/// Error types
pub mod error;
/// Provider label resolution and status swaps
pub mod labels;
/// Idempotency locks
pub mod lock;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Message body normalization
pub mod normalizer;
/// Outbound reply processing
pub mod outbound;
/// External collaborator traits
pub mod provider;
/// Provider rate-limit bookkeeping
pub mod rate_limit;
/// Async store facade
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Follow-up sweeps
pub mod sweeper;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use error::{Result, TrackerError};
pub use labels::LabelMediator;
pub use models::{ConversationStatus, EmailAccount, MailMessage, ThreadTracker, TrackerType, WriteOutcome};
pub use outbound::OutboundReplyProcessor;
pub use repository::ConversationStore;
pub use sweeper::FollowUpSweeper;
