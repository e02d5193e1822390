//! Configuration module for pulsewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Mailgun credentials for outbound alert email.
#[derive(Debug, Clone, PartialEq)]
pub struct MailgunConfig {
    /// API root, e.g. `https://api.mailgun.net` or the EU endpoint
    pub api_base: String,
    /// Sending domain registered with Mailgun
    pub domain: String,
    /// Private API key
    pub api_key: String,
    /// `From:` header used for every alert
    pub from: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// How often the scheduler runs an evaluation cycle
    pub check_interval: Duration,
    /// Smallest frequency (seconds) accepted when adding a monitor
    pub min_frequency_secs: u64,
    /// Upper bound for a single probe request
    pub probe_timeout: Duration,
    /// Upper bound for a single email send
    pub email_timeout: Duration,
    /// Number of probes allowed in flight at once
    pub max_concurrent_probes: usize,
    /// Mailgun settings; `None` logs alerts instead of sending them
    pub mailgun: Option<MailgunConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            check_interval: Duration::from_secs(60),
            min_frequency_secs: 60,
            probe_timeout: Duration::from_secs(10),
            email_timeout: Duration::from_secs(10),
            max_concurrent_probes: 8,
            mailgun: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PULSEWATCH_DB_PATH`: Database file path (default: "pulsewatch.db")
    /// - `PULSEWATCH_CHECK_INTERVAL_SECS`: Scheduler tick (default: 60)
    /// - `PULSEWATCH_MIN_FREQUENCY_SECS`: Minimum monitor frequency (default: 60)
    /// - `PULSEWATCH_PROBE_TIMEOUT_SECS`: Probe timeout (default: 10)
    /// - `PULSEWATCH_EMAIL_TIMEOUT_SECS`: Email send timeout (default: 10)
    /// - `PULSEWATCH_MAX_CONCURRENT_PROBES`: Probe worker count (default: 8)
    /// - `PULSEWATCH_MAILGUN_DOMAIN` / `PULSEWATCH_MAILGUN_API_KEY`: enable Mailgun
    /// - `PULSEWATCH_MAILGUN_API_BASE`: Mailgun API root (default: https://api.mailgun.net)
    /// - `PULSEWATCH_MAILGUN_FROM`: sender (default: "pulsewatch <postmaster@DOMAIN>")
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_positive::<u16>(&lookup, "PULSEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PULSEWATCH_DB_PATH").filter(|s| !s.is_empty()) {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "PULSEWATCH_CHECK_INTERVAL_SECS") {
            cfg.check_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "PULSEWATCH_MIN_FREQUENCY_SECS") {
            cfg.min_frequency_secs = secs;
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "PULSEWATCH_PROBE_TIMEOUT_SECS") {
            cfg.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "PULSEWATCH_EMAIL_TIMEOUT_SECS") {
            cfg.email_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_positive::<usize>(&lookup, "PULSEWATCH_MAX_CONCURRENT_PROBES") {
            cfg.max_concurrent_probes = n;
        }

        let domain = lookup("PULSEWATCH_MAILGUN_DOMAIN").filter(|s| !s.is_empty());
        let api_key = lookup("PULSEWATCH_MAILGUN_API_KEY").filter(|s| !s.is_empty());
        if let (Some(domain), Some(api_key)) = (domain, api_key) {
            let api_base = lookup("PULSEWATCH_MAILGUN_API_BASE")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.mailgun.net".to_string());
            let from = lookup("PULSEWATCH_MAILGUN_FROM")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("pulsewatch <postmaster@{}>", domain));
            cfg.mailgun = Some(MailgunConfig {
                api_base: api_base.trim_end_matches('/').to_string(),
                domain,
                api_key,
                from,
            });
        }

        cfg
    }
}

/// Parse a strictly positive number, ignoring garbage and zero.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    lookup(key)
        .and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}
