//! Probe module for uptime checks.
//!
//! A probe is a plain GET; HTTP 200 is the only success.

mod http;

pub use http::*;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Something that can fetch a URL and report the HTTP status code.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError>;
}

/// Why a probe counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The target answered with something other than 200.
    Status(u16),
    /// No usable response: DNS, connect, TLS, timeout.
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status(code) => write!(f, "{} Returned", code),
            FailureReason::Transport(reason) => f.write_str(reason),
        }
    }
}

/// Result of one probe, collapsed to pass/fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(FailureReason),
}

impl ProbeOutcome {
    pub fn from_result(result: Result<u16, ProbeError>) -> Self {
        match result {
            Ok(200) => ProbeOutcome::Success,
            Ok(code) => ProbeOutcome::Failure(FailureReason::Status(code)),
            Err(e) => ProbeOutcome::Failure(FailureReason::Transport(e.to_string())),
        }
    }
}

/// Run one probe, bounding it by `timeout` whatever the prober does.
pub async fn run_probe(prober: &dyn Prober, url: &str, timeout: Duration) -> ProbeOutcome {
    let result = match tokio::time::timeout(timeout, prober.probe(url)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    if let Err(e) = &result {
        tracing::warn!("Probe failed for {}: {}", url, e);
    }

    ProbeOutcome::from_result(result)
}
