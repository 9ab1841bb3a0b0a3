//! JSON export and restore of the state database

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::state::{RepositoryRef, StateDb, SyncState, VersionHistoryEntry};

/// Format version written by [`export`]
pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupData {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub repos: Vec<BackupRepo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRepo {
    #[serde(flatten)]
    pub repo: RepositoryRef,
    #[serde(default)]
    pub sync_state: Option<SyncState>,
    #[serde(default)]
    pub version_history: Vec<VersionHistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Keep existing data, skip repositories already tracked
    Merge,
    /// Wipe the database first
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    pub repos_imported: usize,
    pub repos_skipped: usize,
    pub sync_states_imported: usize,
    pub history_imported: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreResult {
    pub stats: RestoreStats,
    /// One message per entry that could not be imported
    pub errors: Vec<String>,
}

/// Snapshot every repository with its state and history
pub fn export(db: &StateDb) -> Result<BackupData> {
    let mut repos = Vec::new();

    for repo in db.list_repos()? {
        let sync_state = db.get_sync_state(repo.id)?;
        let mut version_history = db.list_version_history(repo.id, None)?;
        version_history.reverse();

        repos.push(BackupRepo {
            repo,
            sync_state,
            version_history,
        });
    }

    info!("Exported {} repositories", repos.len());
    Ok(BackupData {
        version: BACKUP_VERSION,
        exported_at: Utc::now(),
        repos,
    })
}

pub fn export_to_file(db: &StateDb, path: &Path) -> Result<BackupData> {
    let data = export(db)?;
    let json = serde_json::to_string_pretty(&data).context("Failed to serialize backup")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write backup to {}", path.display()))?;
    Ok(data)
}

pub fn read_backup_file(path: &Path) -> Result<BackupData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup file {}", path.display()))?;
    let data: BackupData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse backup file {}", path.display()))?;

    if data.version > BACKUP_VERSION {
        return Err(anyhow!(
            "Backup version {} is newer than supported version {}",
            data.version,
            BACKUP_VERSION
        ));
    }

    Ok(data)
}

/// Import a backup. Per-entry failures are collected, not raised.
pub fn restore(db: &StateDb, data: &BackupData, mode: RestoreMode) -> Result<RestoreResult> {
    let mut result = RestoreResult::default();

    if mode == RestoreMode::Replace {
        db.clear_all()?;
        info!("Cleared existing data before restore");
    }

    for entry in &data.repos {
        let full_name = &entry.repo.full_name;

        if mode == RestoreMode::Merge && db.get_repo_by_full_name(full_name)?.is_some() {
            result.stats.repos_skipped += 1;
            continue;
        }

        let repo_id = match db.restore_repo(&entry.repo) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to restore {}: {:#}", full_name, e);
                result.errors.push(format!("{}: {:#}", full_name, e));
                continue;
            }
        };
        result.stats.repos_imported += 1;

        if let Some(state) = &entry.sync_state {
            match db.restore_sync_state(repo_id, state) {
                Ok(()) => result.stats.sync_states_imported += 1,
                Err(e) => result.errors.push(format!("{} sync state: {:#}", full_name, e)),
            }
        }

        for history in &entry.version_history {
            match db.restore_version_history(repo_id, history) {
                Ok(()) => result.stats.history_imported += 1,
                Err(e) => result.errors.push(format!(
                    "{} history {}: {:#}",
                    full_name, history.version_value, e
                )),
            }
        }
    }

    info!(
        imported = result.stats.repos_imported,
        skipped = result.stats.repos_skipped,
        errors = result.errors.len(),
        "Restore finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{UpdateKind, VersionUpdate};
    use crate::github::ReleaseInfo;
    use tempfile::TempDir;

    fn seeded_db() -> StateDb {
        let db = StateDb::open_in_memory().unwrap();
        let repo = db.add_repo("octo", "widget", Some("Widgets"), Some("1.0.0")).unwrap();
        db.add_repo("octo", "gadget", None, None).unwrap();

        let release = ReleaseInfo {
            tag: "v1.1.0".to_string(),
            date: "2024-05-02T10:00:00Z".to_string(),
            notes: Some("Faster".to_string()),
        };
        let update = VersionUpdate {
            kind: UpdateKind::Release,
            value: "v1.1.0".to_string(),
            date: Some(release.date.clone()),
            notes: release.notes.clone(),
            is_new: true,
        };
        db.upsert_sync_state(repo.id, None, Some(&release), None, Some(&update), true)
            .unwrap();
        db.append_version_history(repo.id, &update).unwrap();
        db
    }

    #[test]
    fn test_export_contains_state_and_history() {
        let data = export(&seeded_db()).unwrap();

        assert_eq!(data.version, BACKUP_VERSION);
        assert_eq!(data.repos.len(), 2);

        let widget = &data.repos[0];
        assert_eq!(widget.repo.full_name, "octo/widget");
        assert_eq!(widget.repo.installed_version.as_deref(), Some("1.0.0"));
        assert!(widget.sync_state.as_ref().unwrap().release_notification_active);
        assert_eq!(widget.version_history.len(), 1);

        let gadget = &data.repos[1];
        assert!(gadget.sync_state.is_none());
        assert!(gadget.version_history.is_empty());
    }

    #[test]
    fn test_restore_into_empty_db() {
        let data = export(&seeded_db()).unwrap();
        let target = StateDb::open_in_memory().unwrap();

        let result = restore(&target, &data, RestoreMode::Merge).unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.stats.repos_imported, 2);
        assert_eq!(result.stats.sync_states_imported, 1);
        assert_eq!(result.stats.history_imported, 1);

        let widget = target.get_repo_by_full_name("octo/widget").unwrap().unwrap();
        let state = target.get_sync_state(widget.id).unwrap().unwrap();
        assert_eq!(state.last_release_tag.as_deref(), Some("v1.1.0"));
        assert!(state.release_notification_active);
    }

    #[test]
    fn test_merge_skips_existing_repos() {
        let source = seeded_db();
        let data = export(&source).unwrap();

        let result = restore(&source, &data, RestoreMode::Merge).unwrap();
        assert_eq!(result.stats.repos_imported, 0);
        assert_eq!(result.stats.repos_skipped, 2);
        assert_eq!(source.list_repos().unwrap().len(), 2);
    }

    #[test]
    fn test_replace_wipes_first() {
        let data = export(&seeded_db()).unwrap();

        let target = StateDb::open_in_memory().unwrap();
        target.add_repo("other", "thing", None, None).unwrap();

        let result = restore(&target, &data, RestoreMode::Replace).unwrap();
        assert_eq!(result.stats.repos_imported, 2);

        let names: Vec<String> = target.list_repos().unwrap().into_iter().map(|r| r.full_name).collect();
        assert_eq!(names, vec!["octo/widget".to_string(), "octo/gadget".to_string()]);
    }

    #[test]
    fn test_file_round_trip_and_version_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");

        export_to_file(&seeded_db(), &path).unwrap();
        let data = read_backup_file(&path).unwrap();
        assert_eq!(data.repos.len(), 2);

        let mut future = data.clone();
        future.version = BACKUP_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&future).unwrap()).unwrap();
        assert!(read_backup_file(&path).is_err());
    }
}
