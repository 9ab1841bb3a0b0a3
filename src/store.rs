//! Storage seams used by the sync engine
//!
//! The engine only sees [`RepoDirectory`] and [`SyncStore`]. [`SqliteStore`]
//! implements both on top of a shared [`StateDb`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::detect::VersionUpdate;
use crate::error::{Result, SyncError};
use crate::github::{CommitInfo, ReleaseInfo, TagInfo};
use crate::state::{RepositoryRef, StateDb, SyncState};

/// Read access to tracked repositories
#[async_trait]
pub trait RepoDirectory: Send + Sync {
    async fn find_by_id(&self, repo_id: i64) -> Result<Option<RepositoryRef>>;

    async fn find_all(&self) -> Result<Vec<RepositoryRef>>;
}

/// Sync state persistence
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get_sync_state(&self, repo_id: i64) -> Result<Option<SyncState>>;

    async fn upsert_sync_state(
        &self,
        repo_id: i64,
        commit: Option<&CommitInfo>,
        release: Option<&ReleaseInfo>,
        tag: Option<&TagInfo>,
        update: Option<&VersionUpdate>,
        has_updates: bool,
    ) -> Result<()>;

    /// Returns false when the entry was a duplicate
    async fn append_version_history(&self, repo_id: i64, update: &VersionUpdate) -> Result<bool>;

    async fn acknowledge(&self, repo_id: i64, version: &str) -> Result<bool>;
}

/// SQLite-backed store shared between the engine and the CLI
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<StateDb>>,
}

impl SqliteStore {
    pub fn new(db: StateDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Direct access for operations outside the sync path
    pub fn lock(&self) -> MutexGuard<'_, StateDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RepoDirectory for SqliteStore {
    async fn find_by_id(&self, repo_id: i64) -> Result<Option<RepositoryRef>> {
        Ok(self.lock().get_repo_by_id(repo_id)?)
    }

    async fn find_all(&self) -> Result<Vec<RepositoryRef>> {
        Ok(self.lock().list_repos()?)
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn get_sync_state(&self, repo_id: i64) -> Result<Option<SyncState>> {
        Ok(self.lock().get_sync_state(repo_id)?)
    }

    async fn upsert_sync_state(
        &self,
        repo_id: i64,
        commit: Option<&CommitInfo>,
        release: Option<&ReleaseInfo>,
        tag: Option<&TagInfo>,
        update: Option<&VersionUpdate>,
        has_updates: bool,
    ) -> Result<()> {
        self.lock()
            .upsert_sync_state(repo_id, commit, release, tag, update, has_updates)
            .map_err(SyncError::from)
    }

    async fn append_version_history(&self, repo_id: i64, update: &VersionUpdate) -> Result<bool> {
        Ok(self.lock().append_version_history(repo_id, update)?)
    }

    async fn acknowledge(&self, repo_id: i64, version: &str) -> Result<bool> {
        Ok(self.lock().acknowledge(repo_id, version)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio_test::assert_ok;

    fn store() -> SqliteStore {
        SqliteStore::new(StateDb::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let store = store();
        let repo = store.lock().add_repo("octo", "widget", None, None).unwrap();

        let found = assert_ok!(store.find_by_id(repo.id).await);
        assert_eq!(found.map(|r| r.full_name), Some("octo/widget".to_string()));
        assert!(store.find_by_id(999).await.unwrap().is_none());
        assert_eq!(assert_ok!(store.find_all().await).len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_errors_are_mapped() {
        let store = store();
        // No such repository: the foreign key rejects the row
        let err = store
            .upsert_sync_state(42, None, None, None, None, true)
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Persistence(_));
    }
}
