use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationStatus, LabelKind};
use crate::validation::InputValidator;

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub follow_up: FollowUpConfig,
    pub labels: LabelNames,
    pub locks: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Follow-up sweep tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpConfig {
    /// Grace period added to the threshold so an early sweep does not flap
    pub eligibility_window_minutes: u32,
    /// Page size for listing labelled threads
    pub max_threads_per_label: u32,
    /// Stop starting new threads after this long, 0 disables the deadline
    pub sweep_timeout_secs: u64,
}

/// Display names of the provider labels this crate manages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelNames {
    pub to_reply: String,
    pub awaiting_reply: String,
    pub fyi: String,
    pub actioned: String,
    pub follow_up: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long an in-flight outbound lock blocks retries if its worker dies
    pub processing_ttl_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/reply_tracker.db".to_string(),
            max_connections: 10,
            connection_timeout_secs: 30,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            eligibility_window_minutes: 15,
            max_threads_per_label: 100,
            sweep_timeout_secs: 0,
        }
    }
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            to_reply: "To Reply".to_string(),
            awaiting_reply: "Awaiting Reply".to_string(),
            fyi: "FYI".to_string(),
            actioned: "Actioned".to_string(),
            follow_up: "Follow-up".to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            processing_ttl_secs: 300,
        }
    }
}

impl LabelNames {
    /// Configured display name for a label kind
    #[must_use]
    pub fn name_for(&self, kind: LabelKind) -> &str {
        match kind {
            LabelKind::Status(ConversationStatus::ToReply) => &self.to_reply,
            LabelKind::Status(ConversationStatus::AwaitingReply) => &self.awaiting_reply,
            LabelKind::Status(ConversationStatus::Fyi) => &self.fyi,
            LabelKind::Status(ConversationStatus::Actioned) => &self.actioned,
            LabelKind::FollowUp => &self.follow_up,
        }
    }

    fn all(&self) -> [&str; 5] {
        [
            self.to_reply.as_str(),
            self.awaiting_reply.as_str(),
            self.fyi.as_str(),
            self.actioned.as_str(),
            self.follow_up.as_str(),
        ]
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("REPLY_TRACKER").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Missing keys fall back to the serde defaults above
        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        InputValidator::validate_database_url(&self.database.url)?;
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate follow-up config
        InputValidator::validate_eligibility_window(self.follow_up.eligibility_window_minutes)?;
        if self.follow_up.max_threads_per_label == 0 {
            return Err(anyhow::anyhow!("max_threads_per_label must be greater than 0"));
        }

        // Validate label names
        let names = self.labels.all();
        for name in names {
            InputValidator::validate_label_name(name)?;
        }
        for (i, name) in names.iter().enumerate() {
            if names[i + 1..].contains(name) {
                return Err(anyhow::anyhow!("Label name used twice: {}", name));
            }
        }

        if self.locks.processing_ttl_secs == 0 {
            return Err(anyhow::anyhow!("processing_ttl_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
