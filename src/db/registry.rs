//! Monitor registry: the configured monitors, one key-value record per URL.

use super::models::{deserialize_loose_text, MonitorConfig};
use super::store::{DbError, KeyValueStore};

use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Reserved key holding the status snapshot; never a monitor.
pub const STATUS_KEY: &str = "status";

/// Rejection reasons for an add-monitor request.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("url_to_monitor is required")]
    MissingUrl,
    #[error("url_to_monitor must be an absolute http(s) URL, got {0:?}")]
    InvalidUrl(String),
    #[error("frequency is required")]
    MissingFrequency,
    #[error("frequency must be a whole number of seconds, got {0:?}")]
    InvalidFrequency(String),
    #[error("frequency must be at least {minimum} seconds, got {frequency}")]
    FrequencyTooLow { frequency: u64, minimum: u64 },
    #[error("alert-email is required")]
    MissingAlertEmail,
    #[error("alert-email is not a valid email address: {0:?}")]
    InvalidAlertEmail(String),
}

/// Errors from [`Registry::add_monitor`].
#[derive(Error, Debug)]
pub enum AddMonitorError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Unvalidated add-monitor input, as posted by the form or the JSON API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorRequest {
    #[serde(default)]
    pub url_to_monitor: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_text")]
    pub frequency: Option<String>,
    #[serde(rename = "alert-email", default)]
    pub alert_email: Option<String>,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s<>]+@[^@\s<>]+\.[^@\s<>.]+$").expect("email pattern is valid")
    })
}

impl MonitorRequest {
    /// Validate the request into a storable configuration.
    pub fn validate(self, min_frequency_secs: u64) -> Result<MonitorConfig, ConfigError> {
        let url = self
            .url_to_monitor
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUrl)?;
        match reqwest::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
            _ => return Err(ConfigError::InvalidUrl(url)),
        }

        let raw_frequency = self.frequency.ok_or(ConfigError::MissingFrequency)?;
        let frequency = raw_frequency
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidFrequency(raw_frequency.clone()))?;
        if frequency < min_frequency_secs.max(1) {
            return Err(ConfigError::FrequencyTooLow {
                frequency,
                minimum: min_frequency_secs.max(1),
            });
        }

        let email = self
            .alert_email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ConfigError::MissingAlertEmail)?;
        if !email_regex().is_match(&email) {
            return Err(ConfigError::InvalidAlertEmail(email));
        }

        Ok(MonitorConfig::new(url, frequency, email))
    }
}

/// A stored record that could not be read as a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub key: String,
    pub reason: String,
}

/// Monitors loaded at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub monitors: Vec<MonitorConfig>,
    pub rejected: Vec<RejectedRecord>,
}

impl RegistrySnapshot {
    /// URLs of every monitor that has one.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.monitors.iter().filter_map(MonitorConfig::url)
    }

    pub fn find(&self, url: &str) -> Option<&MonitorConfig> {
        self.monitors.iter().find(|m| m.url() == Some(url))
    }
}

/// Read/write access to monitor configurations.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KeyValueStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load every monitor record. Unreadable records are reported, not fatal.
    pub fn load(&self) -> Result<RegistrySnapshot, DbError> {
        let mut snapshot = RegistrySnapshot::default();

        for key in self.store.list_keys()? {
            if key == STATUS_KEY {
                continue;
            }
            let Some(raw) = self.store.get(&key)? else {
                // deleted between list and get
                continue;
            };
            match serde_json::from_str::<MonitorConfig>(&raw) {
                Ok(config) => snapshot.monitors.push(config),
                Err(e) => {
                    tracing::warn!("Registry: skipping unreadable monitor {}: {}", key, e);
                    snapshot.rejected.push(RejectedRecord {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(snapshot)
    }

    /// Get a single monitor by URL.
    pub fn get(&self, url: &str) -> Result<Option<MonitorConfig>, DbError> {
        if url == STATUS_KEY {
            return Ok(None);
        }
        match self.store.get(url)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| DbError::Serialization {
                    key: url.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Validate and store a monitor, replacing any existing one for the URL.
    pub fn add_monitor(
        &self,
        request: MonitorRequest,
        min_frequency_secs: u64,
    ) -> Result<MonitorConfig, AddMonitorError> {
        let config = request.validate(min_frequency_secs)?;
        let replaced = matches!(self.get(config.url().unwrap_or_default()), Ok(Some(_)));
        self.put(&config)?;
        tracing::info!(
            "Registry: {} monitor {} every {}s alerting {}",
            if replaced { "replaced" } else { "stored" },
            config.url().unwrap_or_default(),
            config.frequency_secs,
            config.alert_email
        );
        Ok(config)
    }

    fn put(&self, config: &MonitorConfig) -> Result<(), DbError> {
        let key = config.url().unwrap_or_default();
        let raw = serde_json::to_string(config).map_err(|source| DbError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, &raw)
    }
}
