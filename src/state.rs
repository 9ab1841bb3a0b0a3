//! State Management - SQLite-based persistence for tracked repositories
//!
//! This module provides persistent storage for:
//! - Tracked repositories (owner, name, metadata)
//! - Per-repository sync state (last observed commit/release/tag, notification flag)
//! - Version history (one row per detected release or tag)
//!
//! The database is stored in XDG_DATA_HOME/reposcout/reposcout.db unless configured otherwise.
//! Sync state and history rows are deleted together with their repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::detect::{normalize_version, UpdateKind, VersionUpdate};
use crate::github::{CommitInfo, ReleaseInfo, TagInfo};

/// A tracked GitHub repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub description: Option<String>,
    /// Version the user runs locally, if they told us
    pub installed_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Last observed remote state of one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub repo_id: i64,
    pub last_commit_sha: Option<String>,
    pub last_commit_date: Option<String>,
    pub last_commit_message: Option<String>,
    pub last_commit_author: Option<String>,
    pub last_release_tag: Option<String>,
    pub last_release_date: Option<String>,
    pub last_release_notes: Option<String>,
    pub last_tag: Option<String>,
    pub last_tag_date: Option<String>,
    /// Version string the user last dismissed
    pub acknowledged_release: Option<String>,
    /// Set by a new release/tag, cleared only by acknowledgement
    pub release_notification_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub has_updates: bool,
}

impl SyncState {
    /// State with nothing observed yet
    pub fn empty(repo_id: i64) -> Self {
        Self {
            repo_id,
            last_commit_sha: None,
            last_commit_date: None,
            last_commit_message: None,
            last_commit_author: None,
            last_release_tag: None,
            last_release_date: None,
            last_release_notes: None,
            last_tag: None,
            last_tag_date: None,
            acknowledged_release: None,
            release_notification_active: false,
            last_sync_at: None,
            has_updates: false,
        }
    }

    /// Version the pending notification is about: the release, else the tag
    pub fn pending_version(&self) -> Option<&str> {
        self.last_release_tag
            .as_deref()
            .or(self.last_tag.as_deref())
    }
}

/// A detected release or tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub id: i64,
    pub repo_id: i64,
    pub version_type: UpdateKind,
    pub version_value: String,
    pub release_notes: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// State database manager
pub struct StateDb {
    conn: Connection,
}

const REPO_COLUMNS: &str =
    "id, owner, name, full_name, url, description, installed_version, created_at";

const SYNC_STATE_COLUMNS: &str = r#"
    repo_id, last_commit_sha, last_commit_date, last_commit_message, last_commit_author,
    last_release_tag, last_release_date, last_release_notes, last_tag, last_tag_date,
    acknowledged_release, release_notification_active, last_sync_at, has_updates
"#;

const HISTORY_COLUMNS: &str =
    "id, repo_id, version_type, version_value, release_notes, detected_at, acknowledged_at";

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_repo(row: &Row<'_>) -> rusqlite::Result<RepositoryRef> {
    Ok(RepositoryRef {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        full_name: row.get(3)?,
        url: row.get(4)?,
        description: row.get(5)?,
        installed_version: row.get(6)?,
        created_at: parse_timestamp(row.get(7)?).unwrap_or_else(Utc::now),
    })
}

fn row_to_sync_state(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        repo_id: row.get(0)?,
        last_commit_sha: row.get(1)?,
        last_commit_date: row.get(2)?,
        last_commit_message: row.get(3)?,
        last_commit_author: row.get(4)?,
        last_release_tag: row.get(5)?,
        last_release_date: row.get(6)?,
        last_release_notes: row.get(7)?,
        last_tag: row.get(8)?,
        last_tag_date: row.get(9)?,
        acknowledged_release: row.get(10)?,
        release_notification_active: row.get::<_, i32>(11)? != 0,
        last_sync_at: parse_timestamp(row.get(12)?),
        has_updates: row.get::<_, i32>(13)? != 0,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<VersionHistoryEntry> {
    Ok(VersionHistoryEntry {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        version_type: UpdateKind::parse(&row.get::<_, String>(2)?).unwrap_or(UpdateKind::Release),
        version_value: row.get(3)?,
        release_notes: row.get(4)?,
        detected_at: parse_timestamp(row.get(5)?).unwrap_or_else(Utc::now),
        acknowledged_at: parse_timestamp(row.get(6)?),
    })
}

impl StateDb {
    /// Open or create the state database at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA foreign_keys = ON;

                -- Tracked repositories
                CREATE TABLE IF NOT EXISTS repos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    name TEXT NOT NULL,
                    full_name TEXT UNIQUE NOT NULL,
                    url TEXT NOT NULL,
                    description TEXT,
                    installed_version TEXT,
                    created_at TEXT NOT NULL
                );

                -- Last observed remote state, one row per repository
                CREATE TABLE IF NOT EXISTS sync_state (
                    repo_id INTEGER PRIMARY KEY REFERENCES repos(id) ON DELETE CASCADE,
                    last_commit_sha TEXT,
                    last_commit_date TEXT,
                    last_commit_message TEXT,
                    last_commit_author TEXT,
                    last_release_tag TEXT,
                    last_release_date TEXT,
                    last_release_notes TEXT,
                    last_tag TEXT,
                    last_tag_date TEXT,
                    acknowledged_release TEXT,
                    release_notification_active INTEGER NOT NULL DEFAULT 0,
                    last_sync_at TEXT,
                    has_updates INTEGER NOT NULL DEFAULT 0
                );

                -- Detected releases and tags
                CREATE TABLE IF NOT EXISTS version_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repo_id INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
                    version_type TEXT NOT NULL CHECK (version_type IN ('release', 'tag')),
                    version_value TEXT NOT NULL,
                    release_notes TEXT,
                    detected_at TEXT NOT NULL,
                    acknowledged_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_history_repo ON version_history(repo_id, detected_at);
                CREATE INDEX IF NOT EXISTS idx_history_unack ON version_history(repo_id, version_value, acknowledged_at);
                CREATE INDEX IF NOT EXISTS idx_sync_state_notify ON sync_state(release_notification_active);
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    // =========================================================================
    // Repository Operations
    // =========================================================================

    /// Start tracking a repository
    pub fn add_repo(
        &self,
        owner: &str,
        name: &str,
        description: Option<&str>,
        installed_version: Option<&str>,
    ) -> Result<RepositoryRef> {
        let full_name = format!("{}/{}", owner, name);
        let url = format!("https://github.com/{}", full_name);
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                r#"
                INSERT INTO repos (owner, name, full_name, url, description, installed_version, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![owner, name, full_name, url, description, installed_version, now],
            )
            .with_context(|| format!("Failed to add repository {} (already tracked?)", full_name))?;

        let id = self.conn.last_insert_rowid();
        debug!("Added repository {} with id {}", full_name, id);

        self.get_repo_by_id(id)?
            .with_context(|| format!("Repository {} vanished after insert", full_name))
    }

    /// Stop tracking a repository. Its sync state and history go with it.
    pub fn remove_repo(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM repos WHERE id = ?1", params![id])
            .context("Failed to remove repository")?;
        Ok(count > 0)
    }

    pub fn get_repo_by_id(&self, id: i64) -> Result<Option<RepositoryRef>> {
        let sql = format!("SELECT {} FROM repos WHERE id = ?1", REPO_COLUMNS);
        self.conn
            .query_row(&sql, params![id], row_to_repo)
            .optional()
            .context("Failed to query repository")
    }

    pub fn get_repo_by_full_name(&self, full_name: &str) -> Result<Option<RepositoryRef>> {
        let sql = format!("SELECT {} FROM repos WHERE full_name = ?1", REPO_COLUMNS);
        self.conn
            .query_row(&sql, params![full_name], row_to_repo)
            .optional()
            .context("Failed to query repository")
    }

    /// All tracked repositories in insertion order
    pub fn list_repos(&self) -> Result<Vec<RepositoryRef>> {
        let sql = format!("SELECT {} FROM repos ORDER BY id", REPO_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;

        let repos = stmt
            .query_map([], row_to_repo)
            .context("Failed to query repositories")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect repositories")?;

        Ok(repos)
    }

    // =========================================================================
    // Sync State Operations
    // =========================================================================

    pub fn get_sync_state(&self, repo_id: i64) -> Result<Option<SyncState>> {
        let sql = format!("SELECT {} FROM sync_state WHERE repo_id = ?1", SYNC_STATE_COLUMNS);
        self.conn
            .query_row(&sql, params![repo_id], row_to_sync_state)
            .optional()
            .context("Failed to query sync state")
    }

    /// Record the outcome of a sync.
    ///
    /// Mirror fields and `last_sync_at` are always overwritten. The notification
    /// flag is only ever raised here: a notifiable `update` sets it, anything else
    /// leaves the stored value alone.
    pub fn upsert_sync_state(
        &self,
        repo_id: i64,
        commit: Option<&CommitInfo>,
        release: Option<&ReleaseInfo>,
        tag: Option<&TagInfo>,
        update: Option<&VersionUpdate>,
        has_updates: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let notify = update.is_some_and(VersionUpdate::is_notifiable);

        self.conn
            .execute(
                r#"
                INSERT INTO sync_state (
                    repo_id, last_commit_sha, last_commit_date, last_commit_message, last_commit_author,
                    last_release_tag, last_release_date, last_release_notes, last_tag, last_tag_date,
                    release_notification_active, last_sync_at, has_updates
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(repo_id) DO UPDATE SET
                    last_commit_sha = ?2,
                    last_commit_date = ?3,
                    last_commit_message = ?4,
                    last_commit_author = ?5,
                    last_release_tag = ?6,
                    last_release_date = ?7,
                    last_release_notes = ?8,
                    last_tag = ?9,
                    last_tag_date = ?10,
                    release_notification_active = CASE
                        WHEN ?11 = 1 THEN 1
                        ELSE release_notification_active
                    END,
                    last_sync_at = ?12,
                    has_updates = ?13
                "#,
                params![
                    repo_id,
                    commit.map(|c| c.sha.as_str()),
                    commit.map(|c| c.date.as_str()),
                    commit.map(|c| c.message.as_str()),
                    commit.map(|c| c.author.as_str()),
                    release.map(|r| r.tag.as_str()),
                    release.map(|r| r.date.as_str()),
                    release.and_then(|r| r.notes.as_deref()),
                    tag.map(|t| t.tag.as_str()),
                    tag.map(|t| t.date.as_str()),
                    notify as i32,
                    now,
                    has_updates as i32,
                ],
            )
            .context("Failed to upsert sync state")?;

        debug!(repo_id, notify, has_updates, "Updated sync state");
        Ok(())
    }

    // =========================================================================
    // Version History Operations
    // =========================================================================

    /// Log a detected release or tag. Returns false if an unacknowledged row
    /// for the same version already exists.
    pub fn append_version_history(&self, repo_id: i64, update: &VersionUpdate) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .execute(
                r#"
                INSERT INTO version_history (repo_id, version_type, version_value, release_notes, detected_at)
                SELECT ?1, ?2, ?3, ?4, ?5
                WHERE NOT EXISTS (
                    SELECT 1 FROM version_history
                    WHERE repo_id = ?1
                      AND version_type = ?2
                      AND version_value = ?3
                      AND acknowledged_at IS NULL
                )
                "#,
                params![repo_id, update.kind.as_str(), update.value, update.notes, now],
            )
            .context("Failed to record version history")?;

        if inserted > 0 {
            debug!(repo_id, version = %update.value, kind = update.kind.as_str(), "Recorded new version");
        }
        Ok(inserted > 0)
    }

    /// Dismiss `version` for a repository.
    ///
    /// Clears the notification flag and stamps matching history rows. `v1.0`
    /// and `1.0` are treated as the same version. Returns false when the
    /// repository has never been synced.
    pub fn acknowledge(&self, repo_id: i64, version: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let bare = normalize_version(version);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to start acknowledge transaction")?;

        let updated = tx
            .execute(
                r#"
                UPDATE sync_state
                SET acknowledged_release = ?2,
                    release_notification_active = 0,
                    has_updates = 0
                WHERE repo_id = ?1
                "#,
                params![repo_id, version],
            )
            .context("Failed to acknowledge sync state")?;

        tx.execute(
            r#"
            UPDATE version_history
            SET acknowledged_at = ?2
            WHERE repo_id = ?1
              AND version_value IN (?3, ?4, ?5)
              AND acknowledged_at IS NULL
            "#,
            params![repo_id, now, bare, format!("v{}", bare), format!("V{}", bare)],
        )
        .context("Failed to acknowledge version history")?;

        tx.commit().context("Failed to commit acknowledgement")?;

        debug!(repo_id, version, updated, "Acknowledged version");
        Ok(updated > 0)
    }

    /// History for one repository, newest first
    pub fn list_version_history(&self, repo_id: i64, limit: Option<u32>) -> Result<Vec<VersionHistoryEntry>> {
        let limit_clause = limit.map(|l| format!(" LIMIT {}", l)).unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM version_history WHERE repo_id = ?1 ORDER BY detected_at DESC, id DESC{}",
            HISTORY_COLUMNS, limit_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let entries = stmt
            .query_map(params![repo_id], row_to_history)
            .context("Failed to query version history")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect version history")?;

        Ok(entries)
    }

    /// Repositories whose release notification has not been dismissed
    pub fn list_pending_notifications(&self) -> Result<Vec<(RepositoryRef, SyncState)>> {
        let mut pending = Vec::new();

        for state in self.list_sync_states()? {
            if !state.release_notification_active {
                continue;
            }
            if let Some(repo) = self.get_repo_by_id(state.repo_id)? {
                pending.push((repo, state));
            }
        }

        Ok(pending)
    }

    pub fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let sql = format!("SELECT {} FROM sync_state ORDER BY repo_id", SYNC_STATE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;

        let states = stmt
            .query_map([], row_to_sync_state)
            .context("Failed to query sync states")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect sync states")?;

        Ok(states)
    }

    pub fn list_all_version_history(&self) -> Result<Vec<VersionHistoryEntry>> {
        let sql = format!("SELECT {} FROM version_history ORDER BY id", HISTORY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;

        let entries = stmt
            .query_map([], row_to_history)
            .context("Failed to query version history")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect version history")?;

        Ok(entries)
    }

    // =========================================================================
    // Restore Operations
    // =========================================================================

    /// Delete every repository and, through the cascade, all state
    pub fn clear_all(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                DELETE FROM version_history;
                DELETE FROM sync_state;
                DELETE FROM repos;
                "#,
            )
            .context("Failed to clear database")?;
        Ok(())
    }

    /// Insert a repository record as exported. A fresh id is assigned.
    pub fn restore_repo(&self, repo: &RepositoryRef) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO repos (owner, name, full_name, url, description, installed_version, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    repo.owner,
                    repo.name,
                    repo.full_name,
                    repo.url,
                    repo.description,
                    repo.installed_version,
                    repo.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to restore repository {}", repo.full_name))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Write a sync state verbatim under `repo_id`
    pub fn restore_sync_state(&self, repo_id: i64, state: &SyncState) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO sync_state (
                    repo_id, last_commit_sha, last_commit_date, last_commit_message, last_commit_author,
                    last_release_tag, last_release_date, last_release_notes, last_tag, last_tag_date,
                    acknowledged_release, release_notification_active, last_sync_at, has_updates
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                params![
                    repo_id,
                    state.last_commit_sha,
                    state.last_commit_date,
                    state.last_commit_message,
                    state.last_commit_author,
                    state.last_release_tag,
                    state.last_release_date,
                    state.last_release_notes,
                    state.last_tag,
                    state.last_tag_date,
                    state.acknowledged_release,
                    state.release_notification_active as i32,
                    state.last_sync_at.map(|t| t.to_rfc3339()),
                    state.has_updates as i32,
                ],
            )
            .context("Failed to restore sync state")?;
        Ok(())
    }

    /// Write a history row verbatim under `repo_id`
    pub fn restore_version_history(&self, repo_id: i64, entry: &VersionHistoryEntry) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO version_history (repo_id, version_type, version_value, release_notes, detected_at, acknowledged_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    repo_id,
                    entry.version_type.as_str(),
                    entry.version_value,
                    entry.release_notes,
                    entry.detected_at.to_rfc3339(),
                    entry.acknowledged_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to restore version history")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release_update(value: &str) -> VersionUpdate {
        VersionUpdate {
            kind: UpdateKind::Release,
            value: value.to_string(),
            date: Some("2024-05-02T10:00:00Z".to_string()),
            notes: Some("Changelog".to_string()),
            is_new: true,
        }
    }

    fn commit(sha: &str) -> CommitInfo {
        CommitInfo {
            sha: sha.to_string(),
            date: "2024-05-01T10:00:00Z".to_string(),
            message: "Fix parser".to_string(),
            author: "octocat".to_string(),
        }
    }

    fn release(tag: &str) -> ReleaseInfo {
        ReleaseInfo {
            tag: tag.to_string(),
            date: "2024-05-02T10:00:00Z".to_string(),
            notes: Some("Changelog".to_string()),
        }
    }

    #[test]
    fn test_db_initialization() {
        let db = StateDb::open_in_memory().unwrap();
        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM repos", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_add_and_find_repo() {
        let db = StateDb::open_in_memory().unwrap();

        let repo = db.add_repo("tokio-rs", "tokio", Some("Async runtime"), None).unwrap();
        assert_eq!(repo.full_name, "tokio-rs/tokio");
        assert_eq!(repo.url, "https://github.com/tokio-rs/tokio");

        let by_id = db.get_repo_by_id(repo.id).unwrap().unwrap();
        assert_eq!(by_id, repo);

        let by_name = db.get_repo_by_full_name("tokio-rs/tokio").unwrap().unwrap();
        assert_eq!(by_name.id, repo.id);

        assert!(db.get_repo_by_id(repo.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_repo_is_rejected() {
        let db = StateDb::open_in_memory().unwrap();
        db.add_repo("serde-rs", "serde", None, None).unwrap();
        assert!(db.add_repo("serde-rs", "serde", None, None).is_err());
        assert_eq!(db.list_repos().unwrap().len(), 1);
    }

    #[test]
    fn test_first_sync_creates_state() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();

        assert!(db.get_sync_state(repo.id).unwrap().is_none());

        db.upsert_sync_state(repo.id, Some(&commit("abc1234567")), None, None, None, true)
            .unwrap();

        let state = db.get_sync_state(repo.id).unwrap().unwrap();
        assert_eq!(state.last_commit_sha.as_deref(), Some("abc1234567"));
        assert_eq!(state.last_commit_author.as_deref(), Some("octocat"));
        assert!(state.last_sync_at.is_some());
        assert!(state.has_updates);
        assert!(!state.release_notification_active);
    }

    #[test]
    fn test_notification_flag_is_sticky() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        let rel = release("v1.0.0");
        let update = release_update("v1.0.0");

        db.upsert_sync_state(repo.id, None, Some(&rel), None, Some(&update), true)
            .unwrap();
        assert!(db.get_sync_state(repo.id).unwrap().unwrap().release_notification_active);

        // Nothing new on the next poll
        db.upsert_sync_state(repo.id, None, Some(&rel), None, None, false)
            .unwrap();
        let state = db.get_sync_state(repo.id).unwrap().unwrap();
        assert!(state.release_notification_active);
        assert!(!state.has_updates);

        db.acknowledge(repo.id, "v1.0.0").unwrap();
        let state = db.get_sync_state(repo.id).unwrap().unwrap();
        assert!(!state.release_notification_active);
        assert_eq!(state.acknowledged_release.as_deref(), Some("v1.0.0"));
    }

    #[test]
    fn test_commit_update_does_not_raise_flag() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        let update = VersionUpdate {
            kind: UpdateKind::Commit,
            value: "abc1234".to_string(),
            date: None,
            notes: None,
            is_new: true,
        };

        db.upsert_sync_state(repo.id, Some(&commit("abc1234567")), None, None, Some(&update), true)
            .unwrap();
        assert!(!db.get_sync_state(repo.id).unwrap().unwrap().release_notification_active);
    }

    #[test]
    fn test_history_dedup_on_unacknowledged_value() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        let update = release_update("v1.0.0");

        assert!(db.append_version_history(repo.id, &update).unwrap());
        assert!(!db.append_version_history(repo.id, &update).unwrap());
        assert_eq!(db.list_version_history(repo.id, None).unwrap().len(), 1);

        assert!(db.append_version_history(repo.id, &release_update("v1.1.0")).unwrap());
        let history = db.list_version_history(repo.id, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version_value, "v1.1.0");
        assert_eq!(history[0].release_notes.as_deref(), Some("Changelog"));
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        let update = release_update("v2.0.0");

        db.upsert_sync_state(repo.id, None, Some(&release("v2.0.0")), None, Some(&update), true)
            .unwrap();
        db.append_version_history(repo.id, &update).unwrap();

        assert!(db.acknowledge(repo.id, "2.0.0").unwrap());
        let first = db.list_version_history(repo.id, None).unwrap();
        let stamped = first[0].acknowledged_at;
        assert!(stamped.is_some());

        assert!(db.acknowledge(repo.id, "2.0.0").unwrap());
        let state = db.get_sync_state(repo.id).unwrap().unwrap();
        assert!(!state.release_notification_active);
        assert!(!state.has_updates);
        assert_eq!(state.acknowledged_release.as_deref(), Some("2.0.0"));

        let second = db.list_version_history(repo.id, None).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].acknowledged_at, stamped);
    }

    #[test]
    fn test_acknowledge_unsynced_repo() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        assert!(!db.acknowledge(repo.id, "v1.0.0").unwrap());
    }

    #[test]
    fn test_acknowledged_row_allows_new_history() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();
        let update = release_update("v1.0.0");

        db.upsert_sync_state(repo.id, None, None, None, None, true).unwrap();
        db.append_version_history(repo.id, &update).unwrap();
        db.acknowledge(repo.id, "v1.0.0").unwrap();

        assert!(db.append_version_history(repo.id, &update).unwrap());
    }

    #[test]
    fn test_remove_repo_cascades() {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", None, None).unwrap();

        db.upsert_sync_state(repo.id, Some(&commit("abc")), None, None, None, true)
            .unwrap();
        db.append_version_history(repo.id, &release_update("v1.0.0")).unwrap();

        assert!(db.remove_repo(repo.id).unwrap());
        assert!(!db.remove_repo(repo.id).unwrap());
        assert!(db.get_sync_state(repo.id).unwrap().is_none());
        assert!(db.list_version_history(repo.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_pending_notifications() {
        let db = StateDb::open_in_memory().unwrap();
        let quiet = db.add_repo("octo", "quiet", None, None).unwrap();
        let loud = db.add_repo("octo", "loud", None, None).unwrap();
        let update = release_update("v3.0.0");

        db.upsert_sync_state(quiet.id, Some(&commit("aaa")), None, None, None, true)
            .unwrap();
        db.upsert_sync_state(loud.id, None, Some(&release("v3.0.0")), None, Some(&update), true)
            .unwrap();

        let pending = db.list_pending_notifications().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.full_name, "octo/loud");
        assert_eq!(pending[0].1.pending_version(), Some("v3.0.0"));
    }

    #[test]
    fn test_open_at_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("scout.db");

        {
            let db = StateDb::open_at(&path).unwrap();
            db.add_repo("octo", "widget", None, None).unwrap();
        }

        let reopened = StateDb::open_at(&path).unwrap();
        assert_eq!(reopened.list_repos().unwrap().len(), 1);
    }
}
