//! RepoScout - GitHub repository release tracker
//!
//! RepoScout polls tracked GitHub repositories for new commits, tags and releases,
//! and keeps a sticky notification for every release or tag until the user
//! acknowledges it.
//!
//! ## Core Features
//!
//! - **Remote polling**: Latest commit, release and tag with retry/backoff and rate-limit tracking
//! - **Change detection**: Release > tag > commit tiering with `v`-prefix-insensitive acknowledgement
//! - **Bounded sync**: Full syncs with a cap on repositories in flight
//! - **Scheduling**: Periodic syncs, never more often than every 5 minutes
//! - **Persistence**: SQLite state, version history, JSON backup and restore
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: GitHub API client and authentication
//! - [`detect`]: Version change detection
//! - [`state`]: SQLite state database
//! - [`sync`]: Sync orchestration
//! - [`scheduler`]: Periodic sync trigger

pub mod backup;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod error;
pub mod github;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sync;

pub use config::Config;
pub use daemon::Daemon;
pub use detect::{UpdateKind, VersionUpdate};
pub use error::SyncError;
pub use github::{GitHubClient, RemoteSource};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use state::{RepositoryRef, StateDb, SyncState, VersionHistoryEntry};
pub use store::{RepoDirectory, SqliteStore, SyncStore};
pub use sync::{SyncEngine, SyncProgress, SyncResult};
