//! Sync Engine - Orchestrates bounded-parallel repository polling
//!
//! One repository sync runs fetch, detect and persist strictly in order. A full
//! sync fans out over every tracked repository with at most `max_parallel` in
//! flight, recording each result into a shared [`SyncProgress`] as it completes.

use crate::config::{Config, SyncConfig};
use crate::detect;
use crate::error::{self, SyncError};
use crate::github::{self, CommitInfo, GitHubClient, RateLimitStatus, ReleaseInfo, RemoteSource, TagInfo};
use crate::state::{RepositoryRef, StateDb};
use crate::store::{RepoDirectory, SqliteStore, SyncStore};
use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of syncing one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub repo_id: i64,
    pub full_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub has_updates: bool,
    pub commit: Option<CommitInfo>,
    pub release: Option<ReleaseInfo>,
    pub tag: Option<TagInfo>,
}

impl SyncResult {
    fn failed(repo_id: i64, full_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            repo_id,
            full_name: full_name.into(),
            success: false,
            error: Some(error.into()),
            has_updates: false,
            commit: None,
            release: None,
            tag: None,
        }
    }
}

/// Progress of a full sync. Results are in completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub job_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<SyncResult>,
    pub in_progress: bool,
}

/// Shared holder for the progress of the current or last full sync
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<Option<SyncProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current progress; `None` if no full sync has ever run
    pub fn snapshot(&self) -> Option<SyncProgress> {
        self.lock().clone()
    }

    /// Start a new job, or fail if one is still running
    pub fn begin(&self, total: usize) -> error::Result<ActiveRun> {
        let mut guard = self.lock();

        if let Some(current) = guard.as_ref() {
            if current.in_progress {
                return Err(SyncError::SyncInProgress {
                    job_id: current.job_id.clone(),
                });
            }
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        *guard = Some(SyncProgress {
            job_id: job_id.clone(),
            total,
            completed: 0,
            failed: 0,
            results: Vec::with_capacity(total),
            in_progress: true,
        });

        Ok(ActiveRun {
            tracker: self.clone(),
            job_id,
        })
    }

    fn record(&self, job_id: &str, result: SyncResult) {
        let mut guard = self.lock();
        let Some(progress) = guard.as_mut().filter(|p| p.job_id == job_id) else {
            return;
        };

        if result.success {
            progress.completed += 1;
        } else {
            progress.failed += 1;
        }
        progress.results.push(result);
    }

    fn finish(&self, job_id: &str) -> Option<SyncProgress> {
        let mut guard = self.lock();
        let progress = guard.as_mut().filter(|p| p.job_id == job_id)?;
        progress.in_progress = false;
        Some(progress.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SyncProgress>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running full sync. Dropping it marks the job finished, so progress is
/// never left `in_progress` if the run is cancelled or panics.
#[derive(Debug)]
pub struct ActiveRun {
    tracker: ProgressTracker,
    job_id: String,
}

impl ActiveRun {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn record(&self, result: SyncResult) {
        self.tracker.record(&self.job_id, result);
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.tracker.finish(&self.job_id);
    }
}

/// The main sync engine that orchestrates repository polling
#[derive(Clone)]
pub struct SyncEngine {
    repos: Arc<dyn RepoDirectory>,
    store: Arc<dyn SyncStore>,
    remote: Arc<dyn RemoteSource>,
    progress: ProgressTracker,
    max_parallel: usize,
    repo_timeout: Duration,
}

impl SyncEngine {
    pub fn new(
        repos: Arc<dyn RepoDirectory>,
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteSource>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            repos,
            store,
            remote,
            progress: ProgressTracker::new(),
            max_parallel: config.max_parallel.max(1),
            repo_timeout: config.repo_timeout(),
        }
    }

    /// Sync a single repository. Failures are reported in the result, never raised.
    pub async fn sync_repo(&self, repo_id: i64) -> SyncResult {
        match self.repos.find_by_id(repo_id).await {
            Ok(Some(repo)) => self.sync_resolved(&repo).await,
            Ok(None) => {
                warn!(repo_id, "Sync requested for unknown repository");
                SyncResult::failed(repo_id, "unknown", SyncError::NotFound { repo_id }.to_string())
            }
            Err(e) => SyncResult::failed(repo_id, "unknown", e.to_string()),
        }
    }

    /// Sync every tracked repository with bounded concurrency
    pub async fn sync_all(&self) -> error::Result<SyncProgress> {
        let start_time = Instant::now();
        let repositories = self.repos.find_all().await?;
        let total = repositories.len();
        let run = self.progress.begin(total)?;

        info!(
            job_id = run.job_id(),
            "Syncing {} repositories with max_parallel={}",
            total,
            self.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut futures = FuturesUnordered::new();

        for repo in repositories {
            let semaphore = semaphore.clone();
            let engine = self.clone();

            futures.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return SyncResult::failed(repo.id, repo.full_name, "Sync cancelled");
                };
                engine.sync_resolved(&repo).await
            });
        }

        while let Some(result) = futures.next().await {
            debug!(repo = %result.full_name, success = result.success, "Repository sync finished");
            run.record(result);
        }

        let job_id = run.job_id().to_string();
        drop(run);

        let progress = self
            .progress
            .snapshot()
            .filter(|p| p.job_id == job_id)
            .ok_or_else(|| SyncError::Persistence("sync progress was replaced mid-run".to_string()))?;

        info!(
            job_id = %progress.job_id,
            completed = progress.completed,
            failed = progress.failed,
            "Sync finished in {:.1}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(progress)
    }

    /// Current or last full-sync progress
    pub fn progress(&self) -> Option<SyncProgress> {
        self.progress.snapshot()
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.remote.rate_limit_status()
    }

    /// Dismiss `version` for a repository
    pub async fn acknowledge(&self, repo_id: i64, version: &str) -> error::Result<bool> {
        self.store.acknowledge(repo_id, version).await
    }

    async fn sync_resolved(&self, repo: &RepositoryRef) -> SyncResult {
        match timeout(self.repo_timeout, self.fetch_and_persist(repo)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(repo = %repo.full_name, "Sync failed: {}", e);
                SyncResult::failed(repo.id, repo.full_name.as_str(), e.to_string())
            }
            Err(_) => {
                warn!("Sync operation timed out for repository: {}", repo.full_name);
                SyncResult::failed(
                    repo.id,
                    repo.full_name.as_str(),
                    format!("Operation timed out after {}s", self.repo_timeout.as_secs()),
                )
            }
        }
    }

    async fn fetch_and_persist(&self, repo: &RepositoryRef) -> error::Result<SyncResult> {
        let data = github::fetch_repo_data(self.remote.as_ref(), &repo.owner, &repo.name).await?;
        let current = self.store.get_sync_state(repo.id).await?;

        let update = detect::detect(
            current.as_ref(),
            data.release.as_ref(),
            data.tag.as_ref(),
            data.commit.as_ref(),
        );
        let has_updates = detect::has_updates(
            current.as_ref(),
            data.commit.as_ref(),
            data.release.as_ref(),
            data.tag.as_ref(),
        );

        self.store
            .upsert_sync_state(
                repo.id,
                data.commit.as_ref(),
                data.release.as_ref(),
                data.tag.as_ref(),
                update.as_ref(),
                has_updates,
            )
            .await?;

        if let Some(update) = update.as_ref().filter(|u| u.is_notifiable()) {
            if self.store.append_version_history(repo.id, update).await? {
                info!(
                    repo = %repo.full_name,
                    kind = update.kind.as_str(),
                    "New version detected: {}",
                    update.value
                );
            }
        }

        Ok(SyncResult {
            repo_id: repo.id,
            full_name: repo.full_name.clone(),
            success: true,
            error: None,
            has_updates,
            commit: data.commit,
            release: data.release,
            tag: data.tag,
        })
    }
}

/// Build a GitHub-backed engine over the configured database
pub fn create_sync_engine_from_config(config: &Config) -> anyhow::Result<(SyncEngine, SqliteStore)> {
    let db = StateDb::open_at(&config.database_path()).context("Failed to open state database")?;
    let store = SqliteStore::new(db);

    let (strategy, token) = github::resolve_token(&config.github).context("Failed to resolve GitHub token")?;
    debug!("Using GitHub auth strategy: {:?}", strategy);

    let client = GitHubClient::new(&config.github, token.as_deref(), config.sync.retry_policy())
        .context("Failed to create GitHub client")?;

    let shared = Arc::new(store.clone());
    let engine = SyncEngine::new(shared.clone(), shared, Arc::new(client), &config.sync);

    Ok((engine, store))
}
