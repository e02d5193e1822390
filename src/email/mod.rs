//! Outbound alert email.
//!
//! The notification engine only sees the [`Emailer`] trait; Mailgun is the
//! production transport and [`LogEmailer`] stands in when it is not configured.

mod mailgun;

pub use mailgun::*;

use crate::db::EpochMillis;

use async_trait::async_trait;
use chrono::DateTime;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Email delivery error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("no alert recipient configured for {0}")]
    UnknownRecipient(String),
    #[error("email send timed out after {0:?}")]
    Timeout(Duration),
    #[error("email transport error: {0}")]
    Transport(String),
    #[error("email rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid email configuration: {0}")]
    Config(String),
}

/// Which transition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Failure,
    Recovery,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Failure => f.write_str("failure"),
            NotificationKind::Recovery => f.write_str("recovery"),
        }
    }
}

/// A rendered alert ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Build the alert for `url` at time `at`.
    pub fn alert(kind: NotificationKind, url: &str, to: &str, at: EpochMillis) -> Self {
        let when = format_alert_time(at);
        let text = match kind {
            NotificationKind::Failure => format!("The URL {} could not be reached at {}", url, when),
            NotificationKind::Recovery => format!("The URL {} has recovered at {}", url, when),
        };
        Self {
            to: to.to_string(),
            subject: text.clone(),
            body: text,
        }
    }
}

/// `dd/mm/YYYY, HH:MM:SS` in UTC.
pub fn format_alert_time(at: EpochMillis) -> String {
    match DateTime::from_timestamp_millis(at) {
        Some(dt) => dt.format("%d/%m/%Y, %H:%M:%S").to_string(),
        None => at.to_string(),
    }
}

/// Transport used to deliver alert email.
#[async_trait]
pub trait Emailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Emailer that only logs; used when no mail transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailer;

#[async_trait]
impl Emailer for LogEmailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        tracing::warn!(
            "Email transport not configured. Would send to {}: {}",
            message.to,
            message.subject
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_text() {
        // 2021-10-14T20:34:48.666Z
        let failure = EmailMessage::alert(
            NotificationKind::Failure,
            "https://amazon.co.uk/",
            "ops@example.com",
            1_634_243_688_666,
        );
        assert_eq!(failure.to, "ops@example.com");
        assert_eq!(
            failure.subject,
            "The URL https://amazon.co.uk/ could not be reached at 14/10/2021, 20:34:48"
        );
        assert_eq!(failure.body, failure.subject);

        let recovery =
            EmailMessage::alert(NotificationKind::Recovery, "https://a.example", "ops@example.com", 0);
        assert_eq!(recovery.subject, "The URL https://a.example has recovered at 01/01/1970, 00:00:00");
    }

    #[tokio::test]
    async fn test_log_emailer_never_fails() {
        let message = EmailMessage::alert(NotificationKind::Failure, "https://a.example", "x@y.z", 0);
        tokio_test::assert_ok!(LogEmailer.send(&message).await);
    }
}
