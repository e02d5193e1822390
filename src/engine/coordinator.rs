//! Run coordinator: one load, evaluate, notify, persist cycle at a time.

use super::evaluator::{evaluate, CheckRecord, CheckResult, EvaluationSettings};
use super::notifier::{notify, SentNotification};
use crate::config::ServerConfig;
use crate::db::{
    now_millis, DbError, EpochMillis, KeyValueStore, Registry, RegistrySnapshot, RejectedRecord,
    StatusCollection, StatusStore,
};
use crate::email::{Emailer, NotificationError, NotificationKind};
use crate::probe::Prober;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Errors that abort a whole cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] DbError),
}

/// Timeouts and limits for a cycle.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub evaluation: EvaluationSettings,
    pub email_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluation: EvaluationSettings::default(),
            email_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerConfig> for EngineSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            evaluation: EvaluationSettings {
                probe_timeout: cfg.probe_timeout,
                max_concurrent_probes: cfg.max_concurrent_probes,
            },
            email_timeout: cfg.email_timeout,
        }
    }
}

/// A per-monitor problem that did not stop the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    InvalidRecord(RejectedRecord),
    Notification {
        url: String,
        kind: NotificationKind,
        error: NotificationError,
    },
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::InvalidRecord(r) => {
                write!(f, "{} unreadable monitor record: {}", r.key, r.reason)
            }
            MonitorError::Notification { url, kind, error } => {
                write!(f, "{} {} notification not sent: {}", url, kind, error)
            }
        }
    }
}

/// Everything that happened during one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub now: EpochMillis,
    pub checks: Vec<CheckRecord>,
    pub notifications: Vec<SentNotification>,
    pub errors: Vec<MonitorError>,
    /// The status snapshot did not exist and was created this cycle.
    pub initialized_status: bool,
    /// Shutdown interrupted probing; notifications were skipped.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn probed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.result, CheckResult::Passed | CheckResult::Failed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.result, CheckResult::Failed(_)))
            .count()
    }

    /// One line per monitor, then notifications and errors.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.checks.len() + self.errors.len() + 1);

        for check in &self.checks {
            let line = match &check.result {
                CheckResult::Passed => format!("{} OK", check.url),
                CheckResult::Failed(reason) => format!("{} BAD {}", check.url, reason),
                CheckResult::NotDue { .. } => format!("{} skipped, not due", check.url),
                CheckResult::NoUrl => format!("{} skipped", check.url),
                CheckResult::Abandoned => format!("{} abandoned at shutdown", check.url),
            };
            lines.push(line);
        }
        for sent in &self.notifications {
            lines.push(format!("{} {} email sent to {}", sent.url, sent.kind, sent.to));
        }
        for error in &self.errors {
            lines.push(format!("ERROR {}", error));
        }
        if lines.is_empty() {
            lines.push("No monitors configured".to_string());
        }

        lines.join("\n")
    }
}

/// Serializes evaluation cycles over the shared store.
pub struct Coordinator {
    registry: Registry,
    status: StatusStore,
    prober: Arc<dyn Prober>,
    emailer: Arc<dyn Emailer>,
    settings: EngineSettings,
    run_lock: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        prober: Arc<dyn Prober>,
        emailer: Arc<dyn Emailer>,
        settings: EngineSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry: Registry::new(store.clone()),
            status: StatusStore::new(store),
            prober,
            emailer,
            settings,
            run_lock: Mutex::new(()),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current persisted status, read straight from the store.
    pub fn status_snapshot(&self) -> Result<Option<StatusCollection>, DbError> {
        self.status.load()
    }

    /// Run one full cycle at time `now`.
    ///
    /// Concurrent callers wait for the running cycle to finish first.
    pub async fn run_cycle(&self, now: EpochMillis) -> Result<CycleReport, CycleError> {
        let _guard = self.run_lock.lock().await;
        self.cycle_locked(now).await
    }

    /// Like [`Coordinator::run_cycle`], with `now` read once the run lock is held.
    pub async fn run_cycle_now(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.run_lock.lock().await;
        self.cycle_locked(now_millis()).await
    }

    /// Probe due monitors and persist the outcomes without sending email.
    pub async fn run_checks(&self, now: EpochMillis) -> Result<CycleReport, CycleError> {
        let _guard = self.run_lock.lock().await;
        let (report, _, _) = self.checks_locked(now).await?;
        Ok(report)
    }

    /// Like [`Coordinator::run_checks`], with `now` read once the run lock is held.
    pub async fn run_checks_now(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.run_lock.lock().await;
        let (report, _, _) = self.checks_locked(now_millis()).await?;
        Ok(report)
    }

    async fn cycle_locked(&self, now: EpochMillis) -> Result<CycleReport, CycleError> {
        let (mut report, snapshot, mut status) = self.checks_locked(now).await?;
        if report.interrupted {
            return Ok(report);
        }

        let notified = notify(
            &mut status,
            &snapshot.monitors,
            now,
            self.emailer.as_ref(),
            self.settings.email_timeout,
        )
        .await;
        if notified.dirty {
            self.status.save(&status)?;
        }
        report.notifications = notified.sent;
        report.errors.extend(notified.failed.into_iter().map(|f| {
            MonitorError::Notification {
                url: f.url,
                kind: f.kind,
                error: f.error,
            }
        }));

        tracing::info!(
            "Coordinator: cycle at {} done, {} probed, {} failed, {} emails, {} errors",
            report.now,
            report.probed(),
            report.failed(),
            report.notifications.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Load, evaluate and persist. The caller must hold the run lock.
    async fn checks_locked(
        &self,
        now: EpochMillis,
    ) -> Result<(CycleReport, RegistrySnapshot, StatusCollection), CycleError> {
        let mut report = CycleReport {
            now,
            ..Default::default()
        };

        let snapshot = self.registry.load()?;
        report
            .errors
            .extend(snapshot.rejected.iter().cloned().map(MonitorError::InvalidRecord));

        let mut status = match self.status.load()? {
            Some(status) => status,
            None => {
                tracing::info!("Coordinator: no status snapshot, creating one");
                let status = StatusCollection::from_urls(snapshot.urls());
                self.status.save(&status)?;
                report.initialized_status = true;
                status
            }
        };

        let mut shutdown = self.shutdown.clone();
        let evaluation = evaluate(
            &snapshot.monitors,
            &mut status,
            now,
            self.prober.clone(),
            &self.settings.evaluation,
            &mut shutdown,
        )
        .await;
        self.status.save(&status)?;
        report.checks = evaluation.checks;

        if evaluation.interrupted {
            report.interrupted = true;
            tracing::warn!("Coordinator: checks at {} interrupted, saved partial status", report.now);
        }
        Ok((report, snapshot, status))
    }
}
