//! Background task that triggers drains.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::network::NetworkMonitor;

use super::dispatcher::{DrainOutcome, SyncDispatcher};

/// Handle to a running sync loop.
pub struct SyncLoopHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    companions: Vec<JoinHandle<()>>,
}

impl SyncLoopHandle {
    /// Tie another background task (e.g. a connectivity poller) to this
    /// loop's lifetime.
    #[must_use]
    pub fn with_companion(mut self, task: JoinHandle<()>) -> Self {
        self.companions.push(task);
        self
    }

    /// Stop the loop and wait for it. A drain in progress finishes first.
    pub async fn shutdown(mut self) {
        for companion in self.companions.drain(..) {
            companion.abort();
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = (&mut self.task).await {
            if !error.is_cancelled() {
                tracing::error!("Sync loop ended abnormally: {}", error);
            }
        }
    }
}

impl Drop for SyncLoopHandle {
    fn drop(&mut self) {
        for companion in &self.companions {
            companion.abort();
        }
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

/// Drain on every tick of `interval` and on every transition to online.
pub fn spawn_sync_loop(
    dispatcher: SyncDispatcher,
    monitor: NetworkMonitor,
    interval: Duration,
) -> SyncLoopHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let mut online = monitor.watch();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("Sync loop started (interval {:?})", interval);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    if monitor.is_online() {
                        run_drain(&dispatcher, "timer").await;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    if is_online {
                        run_drain(&dispatcher, "reconnect").await;
                    }
                }
            }
        }

        tracing::info!("Sync loop stopped");
    });

    SyncLoopHandle {
        shutdown: Some(shutdown_tx),
        task,
        companions: Vec::new(),
    }
}

async fn run_drain(dispatcher: &SyncDispatcher, trigger: &str) {
    match dispatcher.drain().await {
        Ok(DrainOutcome::Completed(report)) if report.dispatched > 0 => {
            tracing::debug!("Drain after {} trigger: {:?}", trigger, report);
        }
        Ok(_) => {}
        Err(error) => tracing::error!("Sync drain after {} trigger failed: {}", trigger, error),
    }
}
