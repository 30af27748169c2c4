use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use reply_tracker::config::AppConfig;
use reply_tracker::db::{establish_connection, Database};
use reply_tracker::logging::{init_logging, OperationTimer};
use reply_tracker::metrics::MetricsCollector;
use reply_tracker::models::{EmailAccount, ProviderKind};
use reply_tracker::validation::InputValidator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply migrations
    InitDb,
    /// Manage account tracking settings
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Inspect or resolve thread trackers
    Trackers {
        #[command(subcommand)]
        command: TrackerCommand,
    },
    /// Print the processed follow-up ledger for threads of an account
    Ledger {
        /// Account id
        #[arg(short, long)]
        account: String,

        /// Thread ids to look up
        #[arg(required = true)]
        thread_ids: Vec<String>,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Create or update an account's tracking settings
    Set {
        /// Account id
        #[arg(short, long)]
        id: String,

        /// Mailbox address
        #[arg(short, long)]
        email: String,

        /// Mail provider (google or microsoft)
        #[arg(short, long, default_value = "google")]
        provider: String,

        /// Classify outbound replies
        #[arg(long)]
        outbound_tracking: bool,

        /// Days before an awaiting-reply thread gets a follow-up
        #[arg(long)]
        awaiting_reply_days: Option<u32>,

        /// Days before a to-reply thread gets a follow-up
        #[arg(long)]
        needs_reply_days: Option<u32>,

        /// Generate follow-up drafts during sweeps
        #[arg(long)]
        auto_draft: bool,
    },
}

#[derive(Subcommand)]
enum TrackerCommand {
    /// List trackers of an account as JSON
    List {
        /// Account id
        #[arg(short, long)]
        account: String,

        /// Include resolved trackers
        #[arg(long)]
        all: bool,
    },
    /// Mark a tracker resolved
    Resolve {
        /// Tracker id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
    )?;

    if let Err(e) = MetricsCollector::init() {
        warn!("Metrics recorder not installed: {}", e);
    }

    info!("Starting reply-tracker");

    // Parse command line arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => init_db(&config),
        Commands::Account {
            command:
                AccountCommand::Set {
                    id,
                    email,
                    provider,
                    outbound_tracking,
                    awaiting_reply_days,
                    needs_reply_days,
                    auto_draft,
                },
        } => {
            let account = EmailAccount {
                id,
                email,
                provider: provider.parse::<ProviderKind>()?,
                outbound_tracking_enabled: outbound_tracking,
                follow_up_awaiting_reply_days: awaiting_reply_days,
                follow_up_needs_reply_days: needs_reply_days,
                follow_up_auto_draft_enabled: auto_draft,
            };
            set_account(&open_db(&config)?, &account)
        }
        Commands::Trackers {
            command: TrackerCommand::List { account, all },
        } => list_trackers(&open_db(&config)?, &account, all),
        Commands::Trackers {
            command: TrackerCommand::Resolve { id },
        } => resolve_tracker(&open_db(&config)?, id),
        Commands::Ledger { account, thread_ids } => print_ledger(&open_db(&config)?, &account, &thread_ids),
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let mut db_config = config.database.clone();
    db_config.url = config.get_database_url();
    InputValidator::validate_database_url(&db_config.url)?;
    establish_connection(&db_config).with_context(|| format!("Failed to open database {}", db_config.url))
}

/// Create the database file and run migrations
fn init_db(config: &AppConfig) -> Result<()> {
    let timer = OperationTimer::new("init_db");
    open_db(config)?;
    timer.finish();
    info!("Database ready at {}", config.get_database_url());
    Ok(())
}

/// Store tracking settings for an account
fn set_account(db: &Database, account: &EmailAccount) -> Result<()> {
    InputValidator::validate_account(account)?;
    db.upsert_account(account)?;
    info!(
        "Saved account {} ({}, outbound tracking: {}, follow-ups: {:?}/{:?} days)",
        account.id,
        account.provider.as_str(),
        account.outbound_tracking_enabled,
        account.follow_up_awaiting_reply_days,
        account.follow_up_needs_reply_days,
    );
    Ok(())
}

/// Print trackers of an account
fn list_trackers(db: &Database, account_id: &str, include_resolved: bool) -> Result<()> {
    InputValidator::validate_identifier("Account id", account_id)?;
    if db.get_account(account_id)?.is_none() {
        return Err(anyhow!("Account not found: {}", account_id));
    }

    let trackers = db.list_trackers(account_id, include_resolved)?;
    info!("Found {} trackers", trackers.len());
    println!("{}", serde_json::to_string_pretty(&trackers)?);
    Ok(())
}

/// Resolve a single tracker by id
fn resolve_tracker(db: &Database, tracker_id: i64) -> Result<()> {
    if db.resolve_tracker(tracker_id)? {
        info!("Resolved tracker {}", tracker_id);
        Ok(())
    } else {
        Err(anyhow!("Tracker not found: {}", tracker_id))
    }
}

/// Print which (thread, message) pairs already received a follow-up
fn print_ledger(db: &Database, account_id: &str, thread_ids: &[String]) -> Result<()> {
    InputValidator::validate_identifier("Account id", account_id)?;
    for thread_id in thread_ids {
        InputValidator::validate_identifier("Thread id", thread_id)?;
    }

    let ledger = db.processed_ledger(account_id, thread_ids)?;
    println!("{}", serde_json::to_string_pretty(&ledger)?);
    Ok(())
}
