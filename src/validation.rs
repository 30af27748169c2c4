use anyhow::{anyhow, Result};

use crate::models::EmailAccount;

/// Longest provider label name we accept (Gmail caps names at 225 characters)
const MAX_LABEL_NAME_LEN: usize = 225;

/// Validation utilities for identifiers and tracking settings
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate an account, thread or message identifier
    pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(anyhow!("{kind} cannot be empty"));
        }

        if value.len() > 512 {
            return Err(anyhow!("{kind} too long (max 512 characters)"));
        }

        if value.chars().any(char::is_control) {
            return Err(anyhow!("{kind} contains invalid characters"));
        }

        Ok(())
    }

    /// Validate a provider label display name
    pub fn validate_label_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("Label name cannot be empty"));
        }

        if name.chars().count() > MAX_LABEL_NAME_LEN {
            return Err(anyhow!("Label name too long (max {MAX_LABEL_NAME_LEN} characters)"));
        }

        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(anyhow!("Label name contains invalid characters"));
        }

        if name != name.trim() {
            return Err(anyhow!("Label name cannot start or end with whitespace"));
        }

        Ok(())
    }

    /// Validate a follow-up threshold in days
    pub fn validate_follow_up_days(days: u32) -> Result<()> {
        if days == 0 {
            return Err(anyhow!("Follow-up threshold must be at least 1 day"));
        }

        if days > 365 {
            return Err(anyhow!("Follow-up threshold too large (max 365 days)"));
        }

        Ok(())
    }

    /// Validate the sweep eligibility window in minutes
    pub fn validate_eligibility_window(minutes: u32) -> Result<()> {
        if minutes > 24 * 60 {
            return Err(anyhow!("Eligibility window too large (max 1440 minutes)"));
        }

        Ok(())
    }

    /// Validate the tracking settings of an account before storing them
    pub fn validate_account(account: &EmailAccount) -> Result<()> {
        Self::validate_identifier("Account id", &account.id)?;

        if !account.email.contains('@') {
            return Err(anyhow!("Account email must contain @ symbol"));
        }

        for days in [account.follow_up_awaiting_reply_days, account.follow_up_needs_reply_days]
            .into_iter()
            .flatten()
        {
            Self::validate_follow_up_days(days)?;
        }

        Ok(())
    }

    /// Validate database URL
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }

        if !url.starts_with("sqlite:") {
            return Err(anyhow!("Only SQLite databases are supported"));
        }

        if url.len() > 1000 {
            return Err(anyhow!("Database URL too long"));
        }

        Ok(())
    }
}
