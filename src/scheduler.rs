//! Periodic full-sync trigger

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::sync::SyncEngine;

/// Scheduled syncs never run more often than this
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub fn clamp_interval(requested: Duration) -> Duration {
    requested.max(MIN_SYNC_INTERVAL)
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs [`SyncEngine::sync_all`] on a fixed interval
pub struct Scheduler {
    engine: SyncEngine,
    interval: Duration,
    sync_on_start: bool,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(engine: SyncEngine, interval: Duration, sync_on_start: bool) -> Self {
        let clamped = clamp_interval(interval);
        if clamped != interval {
            warn!(
                "Sync interval {}s is below the minimum, using {}s",
                interval.as_secs(),
                clamped.as_secs()
            );
        }

        Self {
            engine,
            interval: clamped,
            sync_on_start,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the timer. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if running.is_some() {
            warn!("Scheduler already running, ignoring start");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let engine = self.engine.clone();
        let period = self.interval;
        let sync_on_start = self.sync_on_start;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately
            if !sync_on_start {
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_scheduled_sync(&engine).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }
            }
        });

        info!("Scheduler started, syncing every {} minutes", period.as_secs() / 60);
        *running = Some(Running { shutdown_tx, handle });
        true
    }

    /// Stop the timer and wait for the loop to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.handle.await {
            if !e.is_cancelled() {
                error!("Scheduler task failed: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

async fn run_scheduled_sync(engine: &SyncEngine) {
    match engine.sync_all().await {
        Ok(progress) => info!(
            "Scheduled sync complete: {} succeeded, {} failed",
            progress.completed, progress.failed
        ),
        Err(SyncError::SyncInProgress { job_id }) => {
            warn!(job_id = %job_id, "Skipping scheduled sync, previous run still active")
        }
        Err(e) => error!("Scheduled sync failed: {}", e),
    }
}
