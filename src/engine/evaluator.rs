//! Scheduling evaluator: decides which monitors are due and probes them.

use crate::db::{EpochMillis, MonitorConfig, StatusCollection};
use crate::probe::{run_probe, FailureReason, ProbeOutcome, Prober};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Label used in reports for a monitor record without a URL.
pub const MISSING_URL_LABEL: &str = "(missing url_to_monitor)";

/// Limits applied while probing.
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            max_concurrent_probes: 8,
        }
    }
}

/// What happened to one monitor during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Passed,
    Failed(FailureReason),
    /// Frequency has not elapsed; the next probe happens after `next_due`.
    NotDue { next_due: EpochMillis },
    /// The record has no URL to probe.
    NoUrl,
    /// Shutdown arrived before the probe finished; status untouched.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub url: String,
    pub result: CheckResult,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    pub checks: Vec<CheckRecord>,
    /// Set when shutdown cut the probing phase short.
    pub interrupted: bool,
}

impl EvaluationResult {
    /// Number of monitors whose probe completed this cycle.
    pub fn probed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.result, CheckResult::Passed | CheckResult::Failed(_)))
            .count()
    }
}

enum Plan {
    NoUrl,
    NotDue { url: String, next_due: EpochMillis },
    Probe { url: String },
    Duplicate,
}

/// Probe every due monitor and record the outcomes in `status`.
///
/// Status entries are created for monitors seen for the first time. Probes run
/// concurrently, but outcomes are applied here, one writer per entry, after
/// the probes complete. If `shutdown` flips to `true` mid-flight the remaining
/// probes are abandoned and only completed outcomes are applied.
pub async fn evaluate(
    monitors: &[MonitorConfig],
    status: &mut StatusCollection,
    now: EpochMillis,
    prober: Arc<dyn Prober>,
    settings: &EvaluationSettings,
    shutdown: &mut watch::Receiver<bool>,
) -> EvaluationResult {
    let mut plans = Vec::with_capacity(monitors.len());
    let mut scheduled = HashSet::new();

    for monitor in monitors {
        let Some(url) = monitor.url() else {
            tracing::warn!("Evaluator: skipping monitor record without a URL");
            plans.push(Plan::NoUrl);
            continue;
        };

        let entry = status.get_or_insert(url);
        if !entry.is_due(monitor.frequency_secs, now) {
            let next_due = entry
                .last_checked()
                .saturating_add((monitor.frequency_secs as i64).saturating_mul(1000));
            tracing::debug!("Evaluator: {} not due until {}", url, next_due);
            plans.push(Plan::NotDue {
                url: url.to_string(),
                next_due,
            });
        } else if scheduled.insert(url.to_string()) {
            plans.push(Plan::Probe {
                url: url.to_string(),
            });
        } else {
            tracing::warn!("Evaluator: {} is registered twice, probing once", url);
            plans.push(Plan::Duplicate);
        }
    }

    let (outcomes, interrupted) = probe_all(scheduled, prober, settings, shutdown).await;

    let mut result = EvaluationResult {
        checks: Vec::with_capacity(plans.len()),
        interrupted,
    };

    for plan in plans {
        let record = match plan {
            Plan::NoUrl => CheckRecord {
                url: MISSING_URL_LABEL.to_string(),
                result: CheckResult::NoUrl,
            },
            Plan::NotDue { url, next_due } => CheckRecord {
                url,
                result: CheckResult::NotDue { next_due },
            },
            Plan::Duplicate => continue,
            Plan::Probe { url } => {
                let outcome = match outcomes.get(&url) {
                    Some(outcome) => outcome.clone(),
                    None if interrupted => {
                        result.checks.push(CheckRecord {
                            url,
                            result: CheckResult::Abandoned,
                        });
                        continue;
                    }
                    // the probe task itself died
                    None => ProbeOutcome::Failure(FailureReason::Transport(
                        "probe task aborted".to_string(),
                    )),
                };

                let entry = status.get_or_insert(url.as_str());
                let check = match outcome {
                    ProbeOutcome::Success => {
                        entry.record_success(now);
                        CheckResult::Passed
                    }
                    ProbeOutcome::Failure(reason) => {
                        if let FailureReason::Status(code) = &reason {
                            tracing::warn!("Evaluator: {} returned status {}", url, code);
                        }
                        entry.record_failure(now);
                        CheckResult::Failed(reason)
                    }
                };
                CheckRecord { url, result: check }
            }
        };
        result.checks.push(record);
    }

    tracing::debug!(
        "Evaluator: {} monitors, {} probed, interrupted={}",
        monitors.len(),
        result.probed(),
        result.interrupted
    );
    result
}

async fn probe_all(
    urls: HashSet<String>,
    prober: Arc<dyn Prober>,
    settings: &EvaluationSettings,
    shutdown: &mut watch::Receiver<bool>,
) -> (HashMap<String, ProbeOutcome>, bool) {
    let mut outcomes = HashMap::with_capacity(urls.len());
    if urls.is_empty() {
        return (outcomes, false);
    }

    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_probes.max(1)));
    let mut tasks = JoinSet::new();

    for url in urls {
        let semaphore = semaphore.clone();
        let prober = prober.clone();
        let timeout = settings.probe_timeout;
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = run_probe(prober.as_ref(), &url, timeout).await;
            (url, outcome)
        });
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => {
                tracing::warn!(
                    "Evaluator: shutdown requested, abandoning {} in-flight probes",
                    tasks.len()
                );
                tasks.abort_all();
                return (outcomes, true);
            }
            joined = tasks.join_next() => match joined {
                Some(Ok((url, outcome))) => {
                    outcomes.insert(url, outcome);
                }
                Some(Err(e)) => {
                    tracing::error!("Evaluator: probe task failed: {}", e);
                }
                None => break,
            }
        }
    }

    (outcomes, false)
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
