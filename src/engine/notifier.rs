//! Notification engine: failure and recovery alerts with dedup and rate limiting.
//!
//! State for a notification is written only after the emailer reports
//! success. A failed send leaves the status as it was so the next cycle
//! retries it.

use crate::db::{EpochMillis, MonitorConfig, MonitorStatus, StatusCollection};
use crate::email::{EmailMessage, Emailer, NotificationError, NotificationKind};

use std::collections::HashMap;
use std::time::Duration;

/// Minimum gap between two failure alerts for the same monitor.
pub const RENOTIFY_INTERVAL_MS: EpochMillis = 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub url: String,
    pub kind: NotificationKind,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNotification {
    pub url: String,
    pub kind: NotificationKind,
    pub error: NotificationError,
}

#[derive(Debug, Clone, Default)]
pub struct NotifyResult {
    pub sent: Vec<SentNotification>,
    pub failed: Vec<FailedNotification>,
    /// Whether any status field changed.
    pub dirty: bool,
}

/// A failure alert is owed while failing, unless one went out within the last hour.
pub fn needs_failure_notice(status: &MonitorStatus, now: EpochMillis) -> bool {
    if !status.is_failing() {
        return false;
    }
    match status.fail_notified_at {
        None => true,
        Some(at) => now.saturating_sub(at) > RENOTIFY_INTERVAL_MS,
    }
}

/// A recovery alert is owed once per reported episode that has since ended.
pub fn needs_recovery_notice(status: &MonitorStatus) -> bool {
    let (Some(success), Some(failure)) = (status.last_success, status.last_failure) else {
        return false;
    };
    if failure >= success {
        return false;
    }
    // only episodes that were actually reported get a recovery
    let Some(fail_notified) = status.fail_notified_at else {
        return false;
    };
    if fail_notified >= success {
        return false;
    }
    match status.recover_notified_at {
        None => true,
        Some(recovered) => recovered < failure,
    }
}

/// Send every owed alert and record it in `status`.
pub async fn notify(
    status: &mut StatusCollection,
    monitors: &[MonitorConfig],
    now: EpochMillis,
    emailer: &dyn Emailer,
    email_timeout: Duration,
) -> NotifyResult {
    let recipients: HashMap<&str, &str> = monitors
        .iter()
        .filter_map(|m| Some((m.url()?, m.recipient()?)))
        .collect();

    let mut result = NotifyResult::default();

    for entry in status.iter_mut() {
        if entry.last_failure.is_none() {
            continue;
        }
        let recipient = recipients.get(entry.url.as_str()).copied();

        if needs_failure_notice(entry, now) {
            tracing::info!("Notifier: downtime notification for {}", entry.url);
            match deliver(NotificationKind::Failure, &entry.url, recipient, now, emailer, email_timeout).await {
                Ok(to) => {
                    entry.fail_notified_at = Some(now);
                    entry.recover_notified_at = None;
                    result.dirty = true;
                    result.sent.push(SentNotification {
                        url: entry.url.clone(),
                        kind: NotificationKind::Failure,
                        to,
                    });
                }
                Err(error) => {
                    tracing::warn!("Notifier: failure alert for {} not sent: {}", entry.url, error);
                    result.failed.push(FailedNotification {
                        url: entry.url.clone(),
                        kind: NotificationKind::Failure,
                        error,
                    });
                }
            }
        }

        if needs_recovery_notice(entry) {
            tracing::info!("Notifier: recovery notification for {}", entry.url);
            match deliver(NotificationKind::Recovery, &entry.url, recipient, now, emailer, email_timeout).await {
                Ok(to) => {
                    entry.recover_notified_at = Some(now);
                    result.dirty = true;
                    result.sent.push(SentNotification {
                        url: entry.url.clone(),
                        kind: NotificationKind::Recovery,
                        to,
                    });
                }
                Err(error) => {
                    tracing::warn!("Notifier: recovery alert for {} not sent: {}", entry.url, error);
                    result.failed.push(FailedNotification {
                        url: entry.url.clone(),
                        kind: NotificationKind::Recovery,
                        error,
                    });
                }
            }
        }
    }

    result
}

async fn deliver(
    kind: NotificationKind,
    url: &str,
    recipient: Option<&str>,
    now: EpochMillis,
    emailer: &dyn Emailer,
    timeout: Duration,
) -> Result<String, NotificationError> {
    let to = recipient.ok_or_else(|| NotificationError::UnknownRecipient(url.to_string()))?;
    let message = EmailMessage::alert(kind, url, to, now);
    match tokio::time::timeout(timeout, emailer.send(&message)).await {
        Ok(sent) => sent.map(|_| to.to_string()),
        Err(_) => Err(NotificationError::Timeout(timeout)),
    }
}
