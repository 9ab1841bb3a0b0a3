use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reposcout::backup::{self, RestoreMode};
use reposcout::daemon::{self, is_daemon_running, stop_daemon};
use reposcout::github::{self, parse_repo_reference, AuthStrategy};
use reposcout::scheduler::clamp_interval;
use reposcout::sync::create_sync_engine_from_config;
use reposcout::{Config, Daemon, StateDb, SyncResult};

#[derive(Parser)]
#[command(name = "reposcout")]
#[command(about = "Track new commits, tags and releases of GitHub repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the database
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Manage authentication
    Auth {
        #[command(subcommand)]
        auth_command: AuthCommands,
    },

    /// Manage tracked repositories
    Repo {
        #[command(subcommand)]
        repo_command: RepoCommands,
    },

    /// Poll GitHub for new commits, tags and releases
    Sync {
        /// Sync a single repository by id
        #[arg(long)]
        repo: Option<i64>,
    },

    /// Show sync state of every tracked repository
    Status,

    /// Dismiss the notification for a version
    Ack {
        /// Repository id
        repo_id: i64,

        /// Version to acknowledge (with or without a leading "v")
        version: String,
    },

    /// Show detected releases and tags for a repository
    History {
        /// Repository id
        repo_id: i64,

        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Export or restore the database as JSON
    Backup {
        #[command(subcommand)]
        backup_command: BackupCommands,
    },

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Show authentication status
    Status,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Track a repository (owner/name or GitHub URL)
    Add {
        reference: String,

        /// Short description shown in listings
        #[arg(long)]
        description: Option<String>,

        /// Version you currently run
        #[arg(long)]
        installed_version: Option<String>,
    },

    /// Stop tracking a repository
    Remove { id: i64 },

    /// List tracked repositories
    List,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Write all repositories, sync state and history to a file
    Export { file: PathBuf },

    /// Import a backup file
    Restore {
        file: PathBuf,

        /// Delete existing data before importing
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, "info")?;
        return cmd_init(cli.config.as_deref(), force);
    }

    let config = load_config(cli.config.as_deref())?;

    // Forking is only safe before the runtime starts its threads
    if let Commands::Daemon {
        daemon_command: DaemonCommands::Start { foreground: false },
    } = &cli.command
    {
        if is_daemon_running(&config)? {
            println!("⚠️  Daemon is already running!");
            println!("   Use 'reposcout daemon stop' to stop it first");
            return Ok(());
        }

        #[cfg(unix)]
        {
            println!("🚀 Starting RepoScout daemon in background");
            println!("   PID file: {}", config.daemon.pid_file);
            println!("   Log file: {}", config.daemon.log_file);
            daemon::daemonize(&config)?;
        }

        #[cfg(not(unix))]
        {
            println!("❌ Background daemon mode not supported on this platform");
            println!("   Use --foreground to run in foreground mode");
            return Ok(());
        }
    }

    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting RepoScout v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Auth { auth_command } => cmd_auth(auth_command, &config).await,
        Commands::Repo { repo_command } => cmd_repo(repo_command, &config),
        Commands::Sync { repo } => cmd_sync(repo, &config).await,
        Commands::Status => cmd_status(&config),
        Commands::Ack { repo_id, version } => cmd_ack(repo_id, &version, &config),
        Commands::History { repo_id, limit } => cmd_history(repo_id, limit, &config),
        Commands::Backup { backup_command } => cmd_backup(backup_command, &config),
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, &config).await,
    }
}

/// Initialize logging. RUST_LOG wins, then --verbose, then the configured level.
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn open_db(config: &Config) -> Result<StateDb> {
    StateDb::open_at(&config.database_path()).context("Failed to open state database")
}

/// Write the default configuration and create the database
fn cmd_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let mut config = Config::default();
    config.save(&config_path)?;
    config.expand_paths()?;

    open_db(&config)?;

    println!("✅ RepoScout initialized successfully!");
    println!("   Config: {}", config_path.display());
    println!("   Database: {}", config.database.path);
    println!("   Next: add a repository with 'reposcout repo add owner/name'");

    Ok(())
}

/// Handle authentication commands
async fn cmd_auth(auth_command: AuthCommands, config: &Config) -> Result<()> {
    match auth_command {
        AuthCommands::Status => {
            let (strategy, token) = github::resolve_token(&config.github)?;

            let Some(token) = token else {
                println!("⚠️  No GitHub token found");
                println!("   Requests are unauthenticated and limited to 60 per hour");
                println!("   Run 'gh auth login' or set GITHUB_TOKEN");
                return Ok(());
            };

            let source = match strategy {
                AuthStrategy::GitHubCLI => "GitHub CLI",
                AuthStrategy::EnvironmentToken => "GITHUB_TOKEN",
                AuthStrategy::ConfigToken => "config file",
                AuthStrategy::Anonymous => "none",
            };

            match github::verify_authentication(&token).await {
                Ok(login) => {
                    println!("✅ Authentication successful");
                    println!("   Username: {}", login);
                    println!("   Token source: {}", source);
                }
                Err(e) => {
                    println!("❌ Authentication failed: {:#}", e);
                }
            }
            Ok(())
        }
    }
}

/// Manage tracked repositories
fn cmd_repo(repo_command: RepoCommands, config: &Config) -> Result<()> {
    let db = open_db(config)?;

    match repo_command {
        RepoCommands::Add {
            reference,
            description,
            installed_version,
        } => {
            let (owner, name) = parse_repo_reference(&reference)?;
            let full_name = format!("{}/{}", owner, name);

            if db.get_repo_by_full_name(&full_name)?.is_some() {
                bail!("Repository {} is already tracked", full_name);
            }

            let repo = db.add_repo(&owner, &name, description.as_deref(), installed_version.as_deref())?;
            println!("✅ Tracking {} (id {})", repo.full_name, repo.id);
        }

        RepoCommands::Remove { id } => {
            let Some(repo) = db.get_repo_by_id(id)? else {
                bail!("Repository {} not found", id);
            };
            db.remove_repo(id)?;
            println!("🗑️  Stopped tracking {}", repo.full_name);
        }

        RepoCommands::List => {
            let repos = db.list_repos()?;
            println!("Repositories ({}):", repos.len());

            for repo in repos {
                println!("  [{}] {}", repo.id, repo.full_name);
                if let Some(description) = &repo.description {
                    println!("      📝 {}", description);
                }
                if let Some(version) = &repo.installed_version {
                    println!("      📦 Installed: {}", version);
                }
            }
        }
    }

    Ok(())
}

/// Poll GitHub now
async fn cmd_sync(repo_id: Option<i64>, config: &Config) -> Result<()> {
    let (engine, _store) = create_sync_engine_from_config(config)?;

    match repo_id {
        Some(repo_id) => {
            let result = engine.sync_repo(repo_id).await;
            print_sync_result(&result);
            if !result.success {
                bail!("Sync failed");
            }
        }
        None => {
            println!("🔄 Syncing all repositories...");
            let progress = engine.sync_all().await?;

            for result in &progress.results {
                print_sync_result(result);
            }

            println!("\n🎉 Sync complete!");
            println!("   📊 Total repositories: {}", progress.total);
            println!("   ✅ Succeeded: {}", progress.completed);
            println!("   ❌ Failed: {}", progress.failed);
        }
    }

    let rate_limit = engine.rate_limit_status();
    println!(
        "   ⏳ API requests remaining: {} (resets {})",
        rate_limit.remaining,
        rate_limit.reset_at.format("%H:%M:%S UTC")
    );

    Ok(())
}

fn print_sync_result(result: &SyncResult) {
    if !result.success {
        println!(
            "   ❌ {}: {}",
            result.full_name,
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    let marker = if result.has_updates { "🆕" } else { "✅" };
    let mut parts = Vec::new();
    if let Some(release) = &result.release {
        parts.push(format!("release {}", release.tag));
    }
    if let Some(tag) = &result.tag {
        parts.push(format!("tag {}", tag.tag));
    }
    if let Some(commit) = &result.commit {
        parts.push(format!("commit {}", commit.short_sha()));
    }

    println!("   {} {}: {}", marker, result.full_name, parts.join(", "));
}

/// Show the state of every tracked repository
fn cmd_status(config: &Config) -> Result<()> {
    let db = open_db(config)?;
    let repos = db.list_repos()?;

    println!("📊 RepoScout Status");
    println!("   Repositories: {}", repos.len());

    for repo in &repos {
        match db.get_sync_state(repo.id)? {
            Some(state) => {
                let last_sync = state
                    .last_sync_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let flag = if state.release_notification_active { "🔔" } else { "  " };
                let version = state.pending_version().unwrap_or("-");
                println!("   {} [{}] {} {} (synced {})", flag, repo.id, repo.full_name, version, last_sync);
            }
            None => println!("      [{}] {} (never synced)", repo.id, repo.full_name),
        }
    }

    let pending = db.list_pending_notifications()?;
    if !pending.is_empty() {
        println!("\n🔔 {} unacknowledged update(s)", pending.len());
        println!("   Use 'reposcout ack <repo-id> <version>' to dismiss");
    }

    Ok(())
}

/// Dismiss a version notification
fn cmd_ack(repo_id: i64, version: &str, config: &Config) -> Result<()> {
    let db = open_db(config)?;

    let Some(repo) = db.get_repo_by_id(repo_id)? else {
        bail!("Repository {} not found", repo_id);
    };

    if db.acknowledge(repo_id, version)? {
        println!("✅ Acknowledged {} for {}", version, repo.full_name);
    } else {
        println!("⚠️  {} has not been synced yet, nothing to acknowledge", repo.full_name);
    }

    Ok(())
}

/// Print version history of a repository
fn cmd_history(repo_id: i64, limit: Option<u32>, config: &Config) -> Result<()> {
    let db = open_db(config)?;

    let Some(repo) = db.get_repo_by_id(repo_id)? else {
        bail!("Repository {} not found", repo_id);
    };

    let entries = db.list_version_history(repo_id, limit)?;
    println!("Version history for {} ({}):", repo.full_name, entries.len());

    for entry in entries {
        let status = if entry.acknowledged_at.is_some() { "✓" } else { "🔔" };
        println!(
            "  {} {:<8} {:<20} {}",
            status,
            entry.version_type.as_str(),
            entry.version_value,
            entry.detected_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Handle backup commands
fn cmd_backup(backup_command: BackupCommands, config: &Config) -> Result<()> {
    let db = open_db(config)?;

    match backup_command {
        BackupCommands::Export { file } => {
            let data = backup::export_to_file(&db, &file)?;
            println!("✅ Exported {} repositories to {}", data.repos.len(), file.display());
        }

        BackupCommands::Restore { file, replace } => {
            let data = backup::read_backup_file(&file)?;
            let mode = if replace { RestoreMode::Replace } else { RestoreMode::Merge };
            let result = backup::restore(&db, &data, mode)?;

            println!("✅ Restore complete");
            println!("   Repositories imported: {}", result.stats.repos_imported);
            println!("   Repositories skipped: {}", result.stats.repos_skipped);
            println!("   Sync states imported: {}", result.stats.sync_states_imported);
            println!("   History entries imported: {}", result.stats.history_imported);

            if !result.errors.is_empty() {
                println!("\n⚠️  {} entries failed:", result.errors.len());
                for error in &result.errors {
                    println!("   {}", error);
                }
            }
        }
    }

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                if is_daemon_running(config)? {
                    println!("⚠️  Daemon is already running!");
                    println!("   Use 'reposcout daemon stop' to stop it first");
                    return Ok(());
                }
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            let (engine, _store) = create_sync_engine_from_config(config)?;
            let daemon = Daemon::new(engine, config);
            daemon.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping RepoScout daemon...");

            if stop_daemon(config)? {
                println!("✅ Daemon stop signal sent");
            } else {
                println!("⚠️  No daemon appears to be running");
            }
        }

        DaemonCommands::Status => {
            println!("📊 RepoScout Daemon Status");

            if is_daemon_running(config)? {
                println!("   🟢 Status: Running");
                let interval = clamp_interval(config.sync.interval());
                println!("   🔄 Sync interval: {} minutes", interval.as_secs() / 60);
                println!("   📄 PID file: {}", config.daemon.pid_file);
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'reposcout daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}
