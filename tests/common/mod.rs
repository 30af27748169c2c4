//! Shared fixtures for integration tests: a temp SQLite store and in-memory fakes of the
//! mail provider, classifier and draft generator that record every call.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use reply_tracker::config::LabelNames;
use reply_tracker::db::Database;
use reply_tracker::error::{Result, TrackerError};
use reply_tracker::labels::LabelMediator;
use reply_tracker::metrics::MetricsCollector;
use reply_tracker::models::{
    BodyKind, ConversationStatus, Draft, EmailAccount, Label, MailMessage, ProviderKind, Thread,
};
use reply_tracker::provider::{
    Classifier, DraftGenerator, FollowUpDraftRequest, MailProvider, MailProviderFactory, StatusVerdict,
};
use reply_tracker::repository::ConversationStore;

pub const ACCOUNT_ID: &str = "acc-1";

/// Fresh database in its own temp directory; keep the `TempDir` alive for the test
pub fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("tracker.db").display());
    let db = Database::new(&url).expect("database");
    (dir, db)
}

pub fn account() -> EmailAccount {
    EmailAccount {
        id: ACCOUNT_ID.to_string(),
        email: "me@example.com".to_string(),
        provider: ProviderKind::Google,
        outbound_tracking_enabled: true,
        follow_up_awaiting_reply_days: Some(3),
        follow_up_needs_reply_days: None,
        follow_up_auto_draft_enabled: true,
    }
}

/// Database with [`account`] stored
pub fn seeded_db() -> (TempDir, Database) {
    let (dir, db) = test_db();
    db.upsert_account(&account()).expect("seed account");
    (dir, db)
}

pub fn message(id: &str, thread_id: &str, date: DateTime<Utc>, body: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        from: "me@example.com".to_string(),
        subject: "Project update".to_string(),
        date,
        body_kind: BodyKind::Plain,
        body: Some(body.to_string()),
    }
}

pub fn html_message(id: &str, thread_id: &str, date: DateTime<Utc>, html: &str) -> MailMessage {
    MailMessage {
        body_kind: BodyKind::Html,
        ..message(id, thread_id, date, html)
    }
}

pub fn mediator(db: &Database) -> LabelMediator {
    let store: Arc<dyn ConversationStore> = Arc::new(db.clone());
    LabelMediator::new(store, LabelNames::default(), MetricsCollector::default())
}

#[derive(Default)]
struct MailboxState {
    labels: Vec<Label>,
    threads: HashMap<String, Vec<MailMessage>>,
    threads_by_label: HashMap<String, Vec<String>>,
    message_labels: HashMap<String, HashSet<String>>,
    drafts: HashMap<String, Draft>,
    label_calls: Vec<(String, String)>,
    removal_calls: Vec<(String, Vec<String>)>,
    created_labels: Vec<String>,
    deleted_drafts: Vec<String>,
    rate_limited_until: Option<DateTime<Utc>>,
    next_label: usize,
}

/// In-memory mailbox
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().expect("mailbox lock")
    }

    /// Create a label directly, as if the user made it
    pub fn add_label(&self, name: &str) -> String {
        let mut state = self.state();
        state.next_label += 1;
        let id = format!("label-{}", state.next_label);
        state.labels.push(Label {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        self.state()
            .labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id.clone())
    }

    pub fn add_thread(&self, thread_id: &str, messages: Vec<MailMessage>) {
        self.state().threads.insert(thread_id.to_string(), messages);
    }

    /// Put a thread under a label so label listings return it
    pub fn tag_thread(&self, label_id: &str, thread_id: &str) {
        let mut state = self.state();
        let threads = state.threads_by_label.entry(label_id.to_string()).or_default();
        if !threads.iter().any(|t| t == thread_id) {
            threads.push(thread_id.to_string());
        }
    }

    pub fn add_draft(&self, draft: Draft) {
        self.state().drafts.insert(draft.id.clone(), draft);
    }

    pub fn has_draft(&self, draft_id: &str) -> bool {
        self.state().drafts.contains_key(draft_id)
    }

    pub fn rate_limit_until(&self, retry_at: DateTime<Utc>) {
        self.state().rate_limited_until = Some(retry_at);
    }

    pub fn label_calls(&self) -> Vec<(String, String)> {
        self.state().label_calls.clone()
    }

    pub fn removal_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state().removal_calls.clone()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.state().created_labels.clone()
    }

    pub fn deleted_drafts(&self) -> Vec<String> {
        self.state().deleted_drafts.clone()
    }

    /// Union of the labels on every message of a thread
    pub fn thread_labels(&self, thread_id: &str) -> HashSet<String> {
        let state = self.state();
        state
            .threads
            .get(thread_id)
            .into_iter()
            .flatten()
            .filter_map(|m| state.message_labels.get(&m.id))
            .flatten()
            .cloned()
            .collect()
    }

    fn check_rate_limit(&self) -> Result<()> {
        match self.state().rate_limited_until {
            Some(retry_at) => Err(TrackerError::RateLimited { retry_at }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn get_labels(&self) -> Result<Vec<Label>> {
        self.check_rate_limit()?;
        Ok(self.state().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label> {
        self.check_rate_limit()?;
        let id = self.add_label(name);
        self.state().created_labels.push(name.to_string());
        Ok(Label {
            id,
            name: name.to_string(),
        })
    }

    async fn label_message(&self, message_id: &str, label_id: &str) -> Result<()> {
        self.check_rate_limit()?;
        let mut state = self.state();
        state
            .label_calls
            .push((message_id.to_string(), label_id.to_string()));
        state
            .message_labels
            .entry(message_id.to_string())
            .or_default()
            .insert(label_id.to_string());
        Ok(())
    }

    async fn remove_thread_labels(&self, thread_id: &str, label_ids: &[String]) -> Result<()> {
        self.check_rate_limit()?;
        let mut state = self.state();
        state
            .removal_calls
            .push((thread_id.to_string(), label_ids.to_vec()));
        let message_ids: Vec<String> = state
            .threads
            .get(thread_id)
            .into_iter()
            .flatten()
            .map(|m| m.id.clone())
            .collect();
        for id in message_ids {
            if let Some(labels) = state.message_labels.get_mut(&id) {
                labels.retain(|l| !label_ids.contains(l));
            }
        }
        Ok(())
    }

    async fn get_threads_with_label(&self, label_id: &str, max_results: u32) -> Result<Vec<Thread>> {
        self.check_rate_limit()?;
        let state = self.state();
        let ids = state.threads_by_label.get(label_id).cloned().unwrap_or_default();
        Ok(ids
            .into_iter()
            .take(max_results as usize)
            .map(|id| Thread {
                messages: state.threads.get(&id).cloned().unwrap_or_default(),
                id,
            })
            .collect())
    }

    fn latest_message_from_snapshot(&self, thread: &Thread) -> Option<MailMessage> {
        thread.messages.iter().max_by_key(|m| m.date).cloned()
    }

    async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MailMessage>> {
        self.check_rate_limit()?;
        Ok(self.state().threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn get_draft(&self, draft_id: &str) -> Result<Option<Draft>> {
        self.check_rate_limit()?;
        Ok(self.state().drafts.get(draft_id).cloned())
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        self.check_rate_limit()?;
        let mut state = self.state();
        state.drafts.remove(draft_id);
        state.deleted_drafts.push(draft_id.to_string());
        Ok(())
    }
}

/// Hands out the same mailbox for every account
pub struct FakeFactory(pub Arc<FakeMailbox>);

#[async_trait]
impl MailProviderFactory for FakeFactory {
    async fn provider_for(&self, _account: &EmailAccount) -> Result<Arc<dyn MailProvider>> {
        let provider: Arc<dyn MailProvider> = self.0.clone();
        Ok(provider)
    }
}

/// Classifier returning a fixed status
pub struct FixedClassifier {
    pub status: ConversationStatus,
    calls: Mutex<usize>,
}

impl FixedClassifier {
    pub fn new(status: ConversationStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("classifier lock")
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn determine_thread_status(
        &self,
        _account: &EmailAccount,
        _thread_history: &[MailMessage],
    ) -> Result<StatusVerdict> {
        *self.calls.lock().expect("classifier lock") += 1;
        Ok(StatusVerdict {
            status: self.status,
            rationale: "fixed".to_string(),
        })
    }
}

/// Draft generator that records requests and can be told to fail
#[derive(Default)]
pub struct RecordingDraftGenerator {
    requests: Mutex<Vec<FollowUpDraftRequest>>,
    pub fail: bool,
}

impl RecordingDraftGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<FollowUpDraftRequest> {
        self.requests.lock().expect("generator lock").clone()
    }
}

#[async_trait]
impl DraftGenerator for RecordingDraftGenerator {
    async fn generate_follow_up_draft(&self, request: FollowUpDraftRequest) -> Result<()> {
        self.requests.lock().expect("generator lock").push(request);
        if self.fail {
            return Err(TrackerError::DraftGeneration("model unavailable".to_string()));
        }
        Ok(())
    }
}
