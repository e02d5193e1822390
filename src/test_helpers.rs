//! Scripted probes, recording emailers and other test doubles.

use crate::db::{DbError, KeyValueStore};
use crate::email::{EmailMessage, Emailer, NotificationError};
use crate::probe::{ProbeError, Prober};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Long enough that any test timeout fires first.
const HANG: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
enum Scripted {
    Status(u16),
    Error(String),
    Hang,
}

/// A `Prober` that answers from a per-URL script and records every call.
///
/// Unscripted URLs fail with a network error.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with an HTTP status code.
    pub fn status(self, url: &str, code: u16) -> Self {
        self.script(url, Scripted::Status(code))
    }

    /// Fail `url` with a network error.
    pub fn error(self, url: &str, message: &str) -> Self {
        self.script(url, Scripted::Error(message.to_string()))
    }

    /// Never answer `url`.
    pub fn hang(self, url: &str) -> Self {
        self.script(url, Scripted::Hang)
    }

    /// Wait this long before answering any probe.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change the answer for `url` on a shared prober.
    pub fn set_status(&self, url: &str, code: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Status(code));
    }

    /// Most probes that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// URLs probed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn script(self, url: &str, response: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        self.calls.lock().unwrap().push(url.to_string());
        let response = self.responses.lock().unwrap().get(url).cloned();
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match response {
            Some(Scripted::Status(code)) => Ok(code),
            Some(Scripted::Error(message)) => Err(ProbeError::Network(message)),
            Some(Scripted::Hang) => {
                tokio::time::sleep(HANG).await;
                Err(ProbeError::Timeout(HANG))
            }
            None => Err(ProbeError::Network(format!("no script for {}", url))),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// An `Emailer` that keeps every delivered message.
#[derive(Debug, Default)]
pub struct RecordingEmailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: HashSet<String>,
    hang: bool,
}

impl RecordingEmailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message addressed to `recipient`.
    pub fn fail_for(mut self, recipient: &str) -> Self {
        self.failing.insert(recipient.to_string());
        self
    }

    /// Never finish sending.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Emailer for RecordingEmailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if self.hang {
            tokio::time::sleep(HANG).await;
        }
        if self.failing.contains(&message.to) {
            return Err(NotificationError::Transport(format!(
                "mailbox {} unavailable",
                message.to
            )));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// A store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn list_keys(&self) -> Result<Vec<String>, DbError> {
        Err(DbError::Unavailable("list_keys".to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        Err(DbError::Unavailable(format!("get {}", key)))
    }

    fn put(&self, key: &str, _value: &str) -> Result<(), DbError> {
        Err(DbError::Unavailable(format!("put {}", key)))
    }
}

/// A shutdown channel that stays `false` while the sender is held.
pub fn never_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Collects formatted log output from the current thread.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route WARN and above to this buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
