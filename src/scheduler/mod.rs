//! Scheduler that runs an evaluation cycle on a fixed interval.

use crate::engine::{shutdown_requested, Coordinator};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background task driving `Coordinator::run_cycle`.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            interval,
            shutdown,
        }
    }

    /// Start the loop. The first cycle runs immediately.
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!("Starting scheduler, checking every {:?}", self.interval);

        tokio::spawn(async move {
            let Scheduler {
                coordinator,
                interval,
                mut shutdown,
            } = self;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        run_once(&coordinator).await;
                    }
                }
            }

            tracing::info!("Scheduler: stopped");
        })
    }
}

async fn run_once(coordinator: &Coordinator) {
    match coordinator.run_cycle_now().await {
        Ok(report) => {
            for error in &report.errors {
                tracing::warn!("Scheduler: {}", error);
            }
            tracing::debug!("Scheduler: cycle report\n{}", report.summary());
        }
        Err(e) => tracing::error!("Scheduler: cycle failed: {}", e),
    }
}
