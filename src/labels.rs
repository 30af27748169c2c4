//! Provider label resolution and mutually exclusive status swaps.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::LabelNames;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::{ConversationStatus, EmailAccount, Label, LabelKind};
use crate::provider::MailProvider;
use crate::repository::ConversationStore;

/// What a status swap actually did on the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSwapReport {
    /// Label ids removed from the thread (or attempted)
    pub removed_label_ids: Vec<String>,
    /// Label id added to the triggering message, if it could be resolved
    pub added_label_id: Option<String>,
    /// Removal call succeeded, or there was nothing to remove
    pub removal_succeeded: bool,
    /// Add call succeeded
    pub add_succeeded: bool,
}

/// Maps label kinds to provider label ids and keeps status labels exclusive
#[derive(Clone)]
pub struct LabelMediator {
    store: Arc<dyn ConversationStore>,
    names: LabelNames,
    metrics: MetricsCollector,
}

impl LabelMediator {
    /// Mediator over the label cache in `store` using the configured display names
    pub fn new(store: Arc<dyn ConversationStore>, names: LabelNames, metrics: MetricsCollector) -> Self {
        Self { store, names, metrics }
    }

    /// Label id for `kind`: cache, then provider lookup by name, then provider create
    pub async fn resolve_label(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        kind: LabelKind,
    ) -> Result<String> {
        if let Some(id) = self.find_label(provider, account, kind).await? {
            return Ok(id);
        }

        let name = self.names.name_for(kind);
        let label = provider.create_label(name).await?;
        info!(email_account_id = %account.id, label = name, label_id = %label.id, "Created label");
        self.remember(account, kind, &label).await;
        Ok(label.id)
    }

    /// Label id for `kind` without creating it
    pub async fn find_label(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        kind: LabelKind,
    ) -> Result<Option<String>> {
        if let Some(id) = self.cached(account, kind).await {
            return Ok(Some(id));
        }

        let labels = provider.get_labels().await?;
        match self.by_name(&labels, kind) {
            Some(label) => {
                self.remember(account, kind, label).await;
                Ok(Some(label.id.clone()))
            }
            None => Ok(None),
        }
    }

    /// Remove the three other status labels from the thread and add `status` to the message.
    ///
    /// Both halves run concurrently and fail independently; failures are logged, never returned.
    pub async fn apply_conversation_status(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        thread_id: &str,
        message_id: &str,
        status: ConversationStatus,
    ) -> LabelSwapReport {
        let removed_label_ids = self.removal_ids(provider, account, status).await;

        let added_label_id = match self.resolve_label(provider, account, status.into()).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    email_account_id = %account.id,
                    thread_id,
                    status = status.as_str(),
                    error = %e,
                    "Failed to resolve status label"
                );
                self.metrics.record_label_failure("resolve");
                None
            }
        };

        let remove = async {
            if removed_label_ids.is_empty() {
                return true;
            }
            match provider.remove_thread_labels(thread_id, &removed_label_ids).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(email_account_id = %account.id, thread_id, error = %e, "Failed to remove status labels");
                    self.metrics.record_label_failure("remove");
                    false
                }
            }
        };
        let add = async {
            let Some(label_id) = added_label_id.as_deref() else {
                return false;
            };
            match provider.label_message(message_id, label_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        email_account_id = %account.id,
                        thread_id,
                        message_id,
                        error = %e,
                        "Failed to add status label"
                    );
                    self.metrics.record_label_failure("add");
                    false
                }
            }
        };
        let (removal_succeeded, add_succeeded) = tokio::join!(remove, add);

        debug!(
            email_account_id = %account.id,
            thread_id,
            status = status.as_str(),
            removed = removed_label_ids.len(),
            removal_succeeded,
            add_succeeded,
            "Applied conversation status"
        );

        LabelSwapReport {
            removed_label_ids,
            added_label_id,
            removal_succeeded,
            add_succeeded,
        }
    }

    /// Ids of the other statuses. Cache first; the live label list is fetched at most once.
    async fn removal_ids(
        &self,
        provider: &dyn MailProvider,
        account: &EmailAccount,
        status: ConversationStatus,
    ) -> Vec<String> {
        let mut ids = Vec::with_capacity(3);
        let mut live: Option<Vec<Label>> = None;

        for other in status.others() {
            let kind = LabelKind::from(other);
            if let Some(id) = self.cached(account, kind).await {
                ids.push(id);
                continue;
            }

            if live.is_none() {
                live = Some(provider.get_labels().await.unwrap_or_else(|e| {
                    warn!(email_account_id = %account.id, error = %e, "Failed to list provider labels");
                    Vec::new()
                }));
            }
            if let Some(label) = live.as_deref().and_then(|labels| self.by_name(labels, kind)) {
                ids.push(label.id.clone());
            }
        }

        ids
    }

    async fn cached(&self, account: &EmailAccount, kind: LabelKind) -> Option<String> {
        match self.store.get_cached_label(&account.id, kind).await {
            Ok(id) => id,
            Err(e) => {
                warn!(email_account_id = %account.id, kind = kind.as_str(), error = %e, "Label cache read failed");
                None
            }
        }
    }

    async fn remember(&self, account: &EmailAccount, kind: LabelKind, label: &Label) {
        if let Err(e) = self
            .store
            .cache_label(&account.id, kind, &label.id, &label.name)
            .await
        {
            warn!(email_account_id = %account.id, kind = kind.as_str(), error = %e, "Label cache write failed");
        }
    }

    fn by_name<'a>(&self, labels: &'a [Label], kind: LabelKind) -> Option<&'a Label> {
        let name = self.names.name_for(kind);
        labels.iter().find(|label| label.name == name)
    }
}
