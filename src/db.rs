use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::{Result, TrackerError};
use crate::models::{
    DraftSendLog, EmailAccount, ExecutedAction, LabelKind, NewDraftAction, NewThreadTracker,
    ProviderKind, ThreadTracker, TrackerType, WriteOutcome,
};
use crate::schema::{
    draft_send_logs, email_accounts, executed_actions, provider_rate_limits, reply_processing_locks,
    status_labels, thread_trackers,
};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// SQLite bind parameters are capped, so large `IN (...)` lists are split.
const MAX_IN_PARAMS: usize = 500;

const TRACKER_COLUMNS: &str = "id, email_account_id, thread_id, message_id, tracker_type, resolved, \
     sent_at, created_at, follow_up_applied_at, follow_up_draft_id";
const ACTION_COLUMNS: &str =
    "id, email_account_id, thread_id, message_id, draft_id, content, was_draft_sent, created_at";

/// r2d2 connection manager for file-backed SQLite databases
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnectionManager {
    pub fn file(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }
}

impl r2d2::ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // journal_mode answers with the resulting mode, so it has to be read as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

/// Returns true when a rusqlite error is a unique or primary key violation.
///
/// Foreign key, NOT NULL and CHECK failures share the constraint error code but are
/// not write races and must surface as errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
    )
}

fn parse_column<T>(value: &str, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = TrackerError>,
{
    value.parse().map_err(|e: TrackerError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Conversation status store: tracker, draft action, label cache, lock and
/// rate-limit persistence on top of a pooled SQLite database
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool and run migrations
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_config(&DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        })
    }

    /// Create a pool sized and tuned from configuration
    pub fn with_config(config: &DatabaseConfig) -> Result<Self> {
        let path = Self::path_from_url(&config.url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(&path, Duration::from_millis(config.busy_timeout_ms));
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        debug!(path = %path.display(), "Database ready");

        Ok(Self { pool })
    }

    /// Accepts `sqlite:path`, `sqlite://path` or a bare path
    fn path_from_url(url: &str) -> PathBuf {
        let stripped = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Path::new(stripped).to_path_buf()
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-10-01-000000_create_trackers/up.sql"))?;
        conn.execute_batch(include_str!(
            "../migrations/2026-10-05-000000_add_locks_and_rate_limits/up.sql"
        ))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Insert or replace the tracking settings of an account
    pub fn upsert_account(&self, account: &EmailAccount) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({id}, {email}, {provider}, {outbound}, {awaiting}, {needs}, {draft})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT({id}) DO UPDATE SET
                    {email} = excluded.{email},
                    {provider} = excluded.{provider},
                    {outbound} = excluded.{outbound},
                    {awaiting} = excluded.{awaiting},
                    {needs} = excluded.{needs},
                    {draft} = excluded.{draft}",
                t = email_accounts::TABLE,
                id = email_accounts::ID,
                email = email_accounts::EMAIL,
                provider = email_accounts::PROVIDER,
                outbound = email_accounts::OUTBOUND_TRACKING_ENABLED,
                awaiting = email_accounts::FOLLOW_UP_AWAITING_REPLY_DAYS,
                needs = email_accounts::FOLLOW_UP_NEEDS_REPLY_DAYS,
                draft = email_accounts::FOLLOW_UP_AUTO_DRAFT_ENABLED,
            ),
            params![
                account.id,
                account.email,
                account.provider.as_str(),
                account.outbound_tracking_enabled,
                account.follow_up_awaiting_reply_days,
                account.follow_up_needs_reply_days,
                account.follow_up_auto_draft_enabled,
            ],
        )?;
        Ok(())
    }

    /// Get an account by id
    pub fn get_account(&self, account_id: &str) -> Result<Option<EmailAccount>> {
        let conn = self.get_connection()?;
        let account = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", email_accounts::TABLE, email_accounts::ID),
                params![account_id],
                Self::map_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Accounts with at least one follow-up threshold configured
    pub fn list_follow_up_accounts(&self) -> Result<Vec<EmailAccount>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} IS NOT NULL OR {} IS NOT NULL ORDER BY {}",
            email_accounts::TABLE,
            email_accounts::FOLLOW_UP_AWAITING_REPLY_DAYS,
            email_accounts::FOLLOW_UP_NEEDS_REPLY_DAYS,
            email_accounts::ID,
        ))?;
        let rows = stmt.query_map([], Self::map_account)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn map_account(row: &Row) -> rusqlite::Result<EmailAccount> {
        let provider: String = row.get(email_accounts::PROVIDER)?;
        Ok(EmailAccount {
            id: row.get(email_accounts::ID)?,
            email: row.get(email_accounts::EMAIL)?,
            provider: parse_column::<ProviderKind>(&provider, 2)?,
            outbound_tracking_enabled: row.get(email_accounts::OUTBOUND_TRACKING_ENABLED)?,
            follow_up_awaiting_reply_days: row.get(email_accounts::FOLLOW_UP_AWAITING_REPLY_DAYS)?,
            follow_up_needs_reply_days: row.get(email_accounts::FOLLOW_UP_NEEDS_REPLY_DAYS)?,
            follow_up_auto_draft_enabled: row.get(email_accounts::FOLLOW_UP_AUTO_DRAFT_ENABLED)?,
        })
    }

    // ---------------------------------------------------------------------
    // Thread trackers
    // ---------------------------------------------------------------------

    /// Insert a tracker, reporting a collision on (account, thread, message) as `Conflict`
    pub fn create_tracker(
        &self,
        new: &NewThreadTracker,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<ThreadTracker>> {
        let conn = self.get_connection()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
                thread_trackers::TABLE,
                thread_trackers::EMAIL_ACCOUNT_ID,
                thread_trackers::THREAD_ID,
                thread_trackers::MESSAGE_ID,
                thread_trackers::TRACKER_TYPE,
                thread_trackers::RESOLVED,
                thread_trackers::SENT_AT,
                thread_trackers::CREATED_AT,
                thread_trackers::FOLLOW_UP_APPLIED_AT,
            ),
            params![
                new.email_account_id,
                new.thread_id,
                new.message_id,
                new.tracker_type.as_str(),
                new.sent_at,
                now,
                new.follow_up_applied_at,
            ],
        );

        match inserted {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                let tracker = Self::tracker_by_id(&conn, id)?
                    .ok_or_else(|| TrackerError::Other(format!("tracker {id} vanished after insert")))?;
                Ok(WriteOutcome::Created(tracker))
            }
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a tracker to a newer message and stamp the follow-up fingerprint
    pub fn update_tracker_follow_up(
        &self,
        tracker_id: i64,
        message_id: &str,
        sent_at: DateTime<Utc>,
        follow_up_applied_at: DateTime<Utc>,
    ) -> Result<WriteOutcome<ThreadTracker>> {
        let conn = self.get_connection()?;
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3 WHERE {} = ?4",
                thread_trackers::TABLE,
                thread_trackers::MESSAGE_ID,
                thread_trackers::SENT_AT,
                thread_trackers::FOLLOW_UP_APPLIED_AT,
                thread_trackers::ID,
            ),
            params![message_id, sent_at, follow_up_applied_at, tracker_id],
        );

        match updated {
            Ok(0) => Err(TrackerError::NotFound(format!("tracker {tracker_id}"))),
            Ok(_) => {
                let tracker = Self::tracker_by_id(&conn, tracker_id)?
                    .ok_or_else(|| TrackerError::NotFound(format!("tracker {tracker_id}")))?;
                Ok(WriteOutcome::Updated(tracker))
            }
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a tracker keyed by (account, thread, message), reopening it if it exists.
    ///
    /// Follow-up fields are only overwritten when the new values are set, so an outbound
    /// classification never erases a follow-up fingerprint.
    pub fn upsert_tracker(&self, new: &NewThreadTracker, now: DateTime<Utc>) -> Result<ThreadTracker> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({acc}, {thread}, {msg}, {ty}, {resolved}, {sent}, {created}, {applied})
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)
                 ON CONFLICT({acc}, {thread}, {msg}) DO UPDATE SET
                    {ty} = excluded.{ty},
                    {resolved} = 0,
                    {sent} = excluded.{sent},
                    {applied} = COALESCE(excluded.{applied}, {t}.{applied})",
                t = thread_trackers::TABLE,
                acc = thread_trackers::EMAIL_ACCOUNT_ID,
                thread = thread_trackers::THREAD_ID,
                msg = thread_trackers::MESSAGE_ID,
                ty = thread_trackers::TRACKER_TYPE,
                resolved = thread_trackers::RESOLVED,
                sent = thread_trackers::SENT_AT,
                created = thread_trackers::CREATED_AT,
                applied = thread_trackers::FOLLOW_UP_APPLIED_AT,
            ),
            params![
                new.email_account_id,
                new.thread_id,
                new.message_id,
                new.tracker_type.as_str(),
                new.sent_at,
                now,
                new.follow_up_applied_at,
            ],
        )?;

        Self::tracker_by_natural_key(&conn, &new.email_account_id, &new.thread_id, &new.message_id)?
            .ok_or_else(|| TrackerError::Other("tracker missing after upsert".to_string()))
    }

    /// Most recently created unresolved tracker of a type on a thread
    pub fn find_unresolved_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        tracker_type: TrackerType,
    ) -> Result<Option<ThreadTracker>> {
        let conn = self.get_connection()?;
        let tracker = conn
            .query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM {} WHERE {} = ?1 AND {} = ?2 AND {} = ?3 AND {} = 0
                     ORDER BY {} DESC, {} DESC LIMIT 1",
                    thread_trackers::TABLE,
                    thread_trackers::EMAIL_ACCOUNT_ID,
                    thread_trackers::THREAD_ID,
                    thread_trackers::TRACKER_TYPE,
                    thread_trackers::RESOLVED,
                    thread_trackers::CREATED_AT,
                    thread_trackers::ID,
                ),
                params![account_id, thread_id, tracker_type.as_str()],
                Self::map_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    /// Resolve the unresolved trackers of a thread, optionally sparing one type.
    /// Returns the number of rows resolved.
    pub fn resolve_trackers(
        &self,
        account_id: &str,
        thread_id: &str,
        keep_type: Option<TrackerType>,
    ) -> Result<usize> {
        let conn = self.get_connection()?;
        let mut sql = format!(
            "UPDATE {} SET {} = 1 WHERE {} = ?1 AND {} = ?2 AND {} = 0",
            thread_trackers::TABLE,
            thread_trackers::RESOLVED,
            thread_trackers::EMAIL_ACCOUNT_ID,
            thread_trackers::THREAD_ID,
            thread_trackers::RESOLVED,
        );
        let changed = if let Some(keep) = keep_type {
            sql.push_str(&format!(" AND {} != ?3", thread_trackers::TRACKER_TYPE));
            conn.execute(&sql, params![account_id, thread_id, keep.as_str()])?
        } else {
            conn.execute(&sql, params![account_id, thread_id])?
        };
        Ok(changed)
    }

    /// Mark a single tracker resolved
    pub fn resolve_tracker(&self, tracker_id: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = 1 WHERE {} = ?1",
                thread_trackers::TABLE,
                thread_trackers::RESOLVED,
                thread_trackers::ID
            ),
            params![tracker_id],
        )?;
        Ok(changed > 0)
    }

    /// Record the draft created for a follow-up
    pub fn set_follow_up_draft_id(&self, tracker_id: i64, draft_id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                thread_trackers::TABLE,
                thread_trackers::FOLLOW_UP_DRAFT_ID,
                thread_trackers::ID
            ),
            params![draft_id, tracker_id],
        )?;
        if changed == 0 {
            return Err(TrackerError::NotFound(format!("tracker {tracker_id}")));
        }
        Ok(())
    }

    /// Trackers of an account, newest first
    pub fn list_trackers(&self, account_id: &str, include_resolved: bool) -> Result<Vec<ThreadTracker>> {
        let conn = self.get_connection()?;
        let mut sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM {} WHERE {} = ?1",
            thread_trackers::TABLE,
            thread_trackers::EMAIL_ACCOUNT_ID
        );
        if !include_resolved {
            sql.push_str(&format!(" AND {} = 0", thread_trackers::RESOLVED));
        }
        sql.push_str(&format!(
            " ORDER BY {} DESC, {} DESC",
            thread_trackers::CREATED_AT,
            thread_trackers::ID
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], Self::map_tracker)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Message ids per thread that already received a follow-up.
    ///
    /// Only trackers with `follow_up_applied_at` or `follow_up_draft_id` set count.
    pub fn processed_ledger(
        &self,
        account_id: &str,
        thread_ids: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        let conn = self.get_connection()?;
        let mut ledger: HashMap<String, HashSet<String>> = HashMap::new();

        for chunk in thread_ids.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {}, {} FROM {} WHERE {} = ? AND {} IN ({placeholders})
                 AND ({} IS NOT NULL OR {} IS NOT NULL)",
                thread_trackers::THREAD_ID,
                thread_trackers::MESSAGE_ID,
                thread_trackers::TABLE,
                thread_trackers::EMAIL_ACCOUNT_ID,
                thread_trackers::THREAD_ID,
                thread_trackers::FOLLOW_UP_APPLIED_AT,
                thread_trackers::FOLLOW_UP_DRAFT_ID,
            );

            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
            params.push(&account_id);
            params.extend(chunk.iter().map(|id| id as &dyn rusqlite::ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (thread_id, message_id) = row?;
                ledger.entry(thread_id).or_default().insert(message_id);
            }
        }

        Ok(ledger)
    }

    fn tracker_by_id(conn: &Connection, id: i64) -> Result<Option<ThreadTracker>> {
        let tracker = conn
            .query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM {} WHERE {} = ?1",
                    thread_trackers::TABLE,
                    thread_trackers::ID
                ),
                params![id],
                Self::map_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    fn tracker_by_natural_key(
        conn: &Connection,
        account_id: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<Option<ThreadTracker>> {
        let tracker = conn
            .query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM {} WHERE {} = ?1 AND {} = ?2 AND {} = ?3",
                    thread_trackers::TABLE,
                    thread_trackers::EMAIL_ACCOUNT_ID,
                    thread_trackers::THREAD_ID,
                    thread_trackers::MESSAGE_ID,
                ),
                params![account_id, thread_id, message_id],
                Self::map_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    /// Map a database row to a ThreadTracker
    fn map_tracker(row: &Row) -> rusqlite::Result<ThreadTracker> {
        let tracker_type: String = row.get(thread_trackers::TRACKER_TYPE)?;
        Ok(ThreadTracker {
            id: row.get(thread_trackers::ID)?,
            email_account_id: row.get(thread_trackers::EMAIL_ACCOUNT_ID)?,
            thread_id: row.get(thread_trackers::THREAD_ID)?,
            message_id: row.get(thread_trackers::MESSAGE_ID)?,
            tracker_type: parse_column(&tracker_type, 4)?,
            resolved: row.get(thread_trackers::RESOLVED)?,
            sent_at: row.get(thread_trackers::SENT_AT)?,
            created_at: row.get(thread_trackers::CREATED_AT)?,
            follow_up_applied_at: row.get(thread_trackers::FOLLOW_UP_APPLIED_AT)?,
            follow_up_draft_id: row.get(thread_trackers::FOLLOW_UP_DRAFT_ID)?,
        })
    }

    // ---------------------------------------------------------------------
    // Draft actions
    // ---------------------------------------------------------------------

    /// Record a generated AI draft
    pub fn record_draft_action(&self, new: &NewDraftAction, now: DateTime<Utc>) -> Result<ExecutedAction> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                executed_actions::TABLE,
                executed_actions::EMAIL_ACCOUNT_ID,
                executed_actions::THREAD_ID,
                executed_actions::MESSAGE_ID,
                executed_actions::ACTION_TYPE,
                executed_actions::DRAFT_ID,
                executed_actions::CONTENT,
                executed_actions::CREATED_AT,
            ),
            params![
                new.email_account_id,
                new.thread_id,
                new.message_id,
                executed_actions::DRAFT_EMAIL,
                new.draft_id,
                new.content,
                now,
            ],
        )?;

        Ok(ExecutedAction {
            id: conn.last_insert_rowid(),
            email_account_id: new.email_account_id.clone(),
            thread_id: new.thread_id.clone(),
            message_id: new.message_id.clone(),
            draft_id: Some(new.draft_id.clone()),
            content: new.content.clone(),
            was_draft_sent: None,
            created_at: now,
        })
    }

    /// Draft actions on a thread whose fate is still unknown, newest first
    pub fn outstanding_draft_actions(&self, account_id: &str, thread_id: &str) -> Result<Vec<ExecutedAction>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM {a} WHERE {acc} = ?1 AND {thread} = ?2 AND {ty} = ?3
               AND {draft} IS NOT NULL AND {sent} IS NULL
               AND NOT EXISTS (SELECT 1 FROM {l} WHERE {l}.{l_action} = {a}.{id})
             ORDER BY {created} DESC, {id} DESC",
            a = executed_actions::TABLE,
            acc = executed_actions::EMAIL_ACCOUNT_ID,
            thread = executed_actions::THREAD_ID,
            ty = executed_actions::ACTION_TYPE,
            draft = executed_actions::DRAFT_ID,
            sent = executed_actions::WAS_DRAFT_SENT,
            l = draft_send_logs::TABLE,
            l_action = draft_send_logs::EXECUTED_ACTION_ID,
            id = executed_actions::ID,
            created = executed_actions::CREATED_AT,
        ))?;
        let rows = stmt.query_map(
            params![account_id, thread_id, executed_actions::DRAFT_EMAIL],
            Self::map_action,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Get a draft action by id
    pub fn get_draft_action(&self, action_id: i64) -> Result<Option<ExecutedAction>> {
        let conn = self.get_connection()?;
        let action = conn
            .query_row(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM {} WHERE {} = ?1",
                    executed_actions::TABLE,
                    executed_actions::ID
                ),
                params![action_id],
                Self::map_action,
            )
            .optional()?;
        Ok(action)
    }

    /// Set the fate of a draft without a similarity log
    pub fn mark_draft_sent_status(&self, action_id: i64, was_sent: bool) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                executed_actions::TABLE,
                executed_actions::WAS_DRAFT_SENT,
                executed_actions::ID
            ),
            params![was_sent, action_id],
        )?;
        Ok(())
    }

    /// Close a draft action as sent, with its similarity telemetry, in one transaction
    pub fn record_draft_send(
        &self,
        action_id: i64,
        sent_message_id: &str,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> Result<DraftSendLog> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4)",
                draft_send_logs::TABLE,
                draft_send_logs::EXECUTED_ACTION_ID,
                draft_send_logs::SENT_MESSAGE_ID,
                draft_send_logs::SIMILARITY_SCORE,
                draft_send_logs::CREATED_AT,
            ),
            params![action_id, sent_message_id, similarity_score, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            &format!(
                "UPDATE {} SET {} = 1 WHERE {} = ?1",
                executed_actions::TABLE,
                executed_actions::WAS_DRAFT_SENT,
                executed_actions::ID
            ),
            params![action_id],
        )?;
        tx.commit()?;

        Ok(DraftSendLog {
            id,
            executed_action_id: action_id,
            sent_message_id: sent_message_id.to_string(),
            similarity_score,
            created_at: now,
        })
    }

    /// Send log for a draft action, if its fate was resolved as sent
    pub fn get_draft_send_log(&self, action_id: i64) -> Result<Option<DraftSendLog>> {
        let conn = self.get_connection()?;
        let log = conn
            .query_row(
                &format!(
                    "SELECT {}, {}, {}, {}, {} FROM {} WHERE {} = ?1",
                    draft_send_logs::ID,
                    draft_send_logs::EXECUTED_ACTION_ID,
                    draft_send_logs::SENT_MESSAGE_ID,
                    draft_send_logs::SIMILARITY_SCORE,
                    draft_send_logs::CREATED_AT,
                    draft_send_logs::TABLE,
                    draft_send_logs::EXECUTED_ACTION_ID,
                ),
                params![action_id],
                |row| {
                    Ok(DraftSendLog {
                        id: row.get(0)?,
                        executed_action_id: row.get(1)?,
                        sent_message_id: row.get(2)?,
                        similarity_score: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(log)
    }

    fn map_action(row: &Row) -> rusqlite::Result<ExecutedAction> {
        Ok(ExecutedAction {
            id: row.get(executed_actions::ID)?,
            email_account_id: row.get(executed_actions::EMAIL_ACCOUNT_ID)?,
            thread_id: row.get(executed_actions::THREAD_ID)?,
            message_id: row.get(executed_actions::MESSAGE_ID)?,
            draft_id: row.get(executed_actions::DRAFT_ID)?,
            content: row.get(executed_actions::CONTENT)?,
            was_draft_sent: row.get(executed_actions::WAS_DRAFT_SENT)?,
            created_at: row.get(executed_actions::CREATED_AT)?,
        })
    }

    // ---------------------------------------------------------------------
    // Label cache
    // ---------------------------------------------------------------------

    /// Cached provider label id for an account
    pub fn get_cached_label(&self, account_id: &str, kind: LabelKind) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let label_id = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1 AND {} = ?2",
                    status_labels::LABEL_ID,
                    status_labels::TABLE,
                    status_labels::EMAIL_ACCOUNT_ID,
                    status_labels::LABEL_KIND,
                ),
                params![account_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(label_id)
    }

    /// Remember the provider label id for an account
    pub fn cache_label(&self, account_id: &str, kind: LabelKind, label_id: &str, label_name: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({acc}, {kind}, {id}, {name}) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT({acc}, {kind}) DO UPDATE SET {id} = excluded.{id}, {name} = excluded.{name}",
                t = status_labels::TABLE,
                acc = status_labels::EMAIL_ACCOUNT_ID,
                kind = status_labels::LABEL_KIND,
                id = status_labels::LABEL_ID,
                name = status_labels::LABEL_NAME,
            ),
            params![account_id, kind.as_str(), label_id, label_name],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Processing locks
    // ---------------------------------------------------------------------

    /// Take the processing lock unless it is processed or held and not yet expired
    pub fn try_acquire_lock(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let conn = self.get_connection()?;
        let now_secs = now.timestamp();
        let expires_at = now_secs.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        let changed = conn.execute(
            &format!(
                "INSERT INTO {t} ({key}, {state}, {exp}) VALUES (?1, ?2, ?3)
                 ON CONFLICT({key}) DO UPDATE SET {state} = excluded.{state}, {exp} = excluded.{exp}
                 WHERE {t}.{state} = ?2 AND {t}.{exp} <= ?4",
                t = reply_processing_locks::TABLE,
                key = reply_processing_locks::LOCK_KEY,
                state = reply_processing_locks::STATE,
                exp = reply_processing_locks::EXPIRES_AT,
            ),
            params![key, reply_processing_locks::STATE_PROCESSING, expires_at, now_secs],
        )?;
        Ok(changed == 1)
    }

    /// Make the lock permanent
    pub fn mark_lock_processed(&self, key: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({key}, {state}, {exp}) VALUES (?1, ?2, NULL)
                 ON CONFLICT({key}) DO UPDATE SET {state} = excluded.{state}, {exp} = NULL",
                t = reply_processing_locks::TABLE,
                key = reply_processing_locks::LOCK_KEY,
                state = reply_processing_locks::STATE,
                exp = reply_processing_locks::EXPIRES_AT,
            ),
            params![key, reply_processing_locks::STATE_PROCESSED],
        )?;
        Ok(())
    }

    /// Release an in-flight lock; processed locks stay
    pub fn clear_lock(&self, key: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                reply_processing_locks::TABLE,
                reply_processing_locks::LOCK_KEY,
                reply_processing_locks::STATE,
            ),
            params![key, reply_processing_locks::STATE_PROCESSING],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Rate limits
    // ---------------------------------------------------------------------

    /// Store the time before which the provider must not be called for an account
    pub fn record_rate_limit(&self, account_id: &str, provider: ProviderKind, retry_at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({acc}, {prov}, {retry}) VALUES (?1, ?2, ?3)
                 ON CONFLICT({acc}, {prov}) DO UPDATE SET {retry} = excluded.{retry}",
                t = provider_rate_limits::TABLE,
                acc = provider_rate_limits::EMAIL_ACCOUNT_ID,
                prov = provider_rate_limits::PROVIDER,
                retry = provider_rate_limits::RETRY_AT,
            ),
            params![account_id, provider.as_str(), retry_at],
        )?;
        Ok(())
    }

    /// Recorded retry time for an account, if any
    pub fn get_rate_limit(&self, account_id: &str, provider: ProviderKind) -> Result<Option<DateTime<Utc>>> {
        let conn = self.get_connection()?;
        let retry_at = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1 AND {} = ?2",
                    provider_rate_limits::RETRY_AT,
                    provider_rate_limits::TABLE,
                    provider_rate_limits::EMAIL_ACCOUNT_ID,
                    provider_rate_limits::PROVIDER,
                ),
                params![account_id, provider.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(retry_at)
    }
}

/// Initialize the database from configuration
pub fn establish_connection(config: &DatabaseConfig) -> Result<Database> {
    Database::with_config(config)
}
