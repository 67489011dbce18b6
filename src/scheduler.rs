//! Periodic backup scheduling
//!
//! The scheduler alternates between running a pass and sleeping for the
//! configured interval. The interval is re-read after every pass, so a change
//! made from a configuration session applies from the next sleep onward. Passes
//! run on tokio's blocking pool because they do file and network I/O and may
//! wait for a configuration session to close.

use crate::coordinator::Coordinator;
use crate::engine::PassKind;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs backup passes forever, until shut down
#[derive(Debug, Clone)]
pub struct Scheduler {
    coordinator: Coordinator,
}

impl Scheduler {
    /// Create a scheduler driving `coordinator`
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Run passes until `shutdown` turns `true` or its sender is dropped
    ///
    /// A pass in progress always finishes; only the sleep is interrupted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let coordinator = self.coordinator.clone();
            match tokio::task::spawn_blocking(move || coordinator.run_pass()).await {
                Ok(Ok(report)) => match report.kind {
                    PassKind::Cleaning => info!("Remote backup cleaned"),
                    PassKind::Upload => info!(
                        "Pass uploaded {} of {} files ({} failed)",
                        report.files_uploaded, report.files_scanned, report.files_failed
                    ),
                },
                Ok(Err(e)) => warn!("Pass did not complete: {}", e),
                Err(e) => error!("Pass task failed: {}", e),
            }

            let interval = self.coordinator.interval();
            debug!("Next pass in {}", humantime::format_duration(interval));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    // Sender gone: nobody can stop us any more, so stop now
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Spawn [`Scheduler::run`] on the current tokio runtime
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        SchedulerHandle { shutdown, task }
    }
}

/// Handle to a spawned scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the current pass (if any) and wait for the loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task failed: {}", e);
        }
    }
}
