//! Database model types.
//!
//! Both records are stored as JSON values in the key-value store. Timestamps
//! are epoch milliseconds, written as strings and read back from strings,
//! numbers, `""` or `null`.

use chrono::Utc;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Check frequency used when a stored monitor does not specify one.
pub const DEFAULT_FREQUENCY_SECS: u64 = 60;

/// A monitored URL and how it should be checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(rename = "url_to_monitor", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "frequency", default = "default_frequency", with = "frequency_text")]
    pub frequency_secs: u64,
    #[serde(rename = "alert-email", default)]
    pub alert_email: String,
}

fn default_frequency() -> u64 {
    DEFAULT_FREQUENCY_SECS
}

impl MonitorConfig {
    pub fn new(url: impl Into<String>, frequency_secs: u64, alert_email: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            frequency_secs,
            alert_email: alert_email.into(),
        }
    }

    /// The URL to probe, or `None` when the record has no usable URL.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// The alert recipient, or `None` when blank.
    pub fn recipient(&self) -> Option<&str> {
        Some(self.alert_email.trim()).filter(|r| !r.is_empty())
    }
}

/// Probe and notification history for one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    #[serde(rename = "name")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "millis_text")]
    pub last_success: Option<EpochMillis>,
    #[serde(
        rename = "last_failed",
        default,
        skip_serializing_if = "Option::is_none",
        with = "millis_text"
    )]
    pub last_failure: Option<EpochMillis>,
    #[serde(
        rename = "fail_notification_date",
        default,
        skip_serializing_if = "Option::is_none",
        with = "millis_text"
    )]
    pub fail_notified_at: Option<EpochMillis>,
    #[serde(
        rename = "recovery_notification_date",
        default,
        skip_serializing_if = "Option::is_none",
        with = "millis_text"
    )]
    pub recover_notified_at: Option<EpochMillis>,
}

impl MonitorStatus {
    /// A never-probed monitor: every timestamp unset.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_success: None,
            last_failure: None,
            fail_notified_at: None,
            recover_notified_at: None,
        }
    }

    /// Time of the latest probe result of either kind, 0 if never probed.
    pub fn last_checked(&self) -> EpochMillis {
        self.last_success
            .unwrap_or(0)
            .max(self.last_failure.unwrap_or(0))
    }

    /// A monitor is due once its frequency has fully elapsed since the last
    /// probe. A never-probed monitor is always due.
    pub fn is_due(&self, frequency_secs: u64, now: EpochMillis) -> bool {
        if self.last_success.is_none() && self.last_failure.is_none() {
            return true;
        }
        let period = i64::try_from(frequency_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.last_checked().saturating_add(period) < now
    }

    pub fn is_healthy(&self) -> bool {
        match (self.last_success, self.last_failure) {
            (Some(success), Some(failure)) => success > failure,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// True while the most recent probe result is a failure.
    pub fn is_failing(&self) -> bool {
        match (self.last_success, self.last_failure) {
            (Some(success), Some(failure)) => failure > success,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    pub fn record_success(&mut self, now: EpochMillis) {
        self.last_success = Some(now);
    }

    pub fn record_failure(&mut self, now: EpochMillis) {
        self.last_failure = Some(now);
    }
}

/// Status of every monitor, persisted as one record under the `status` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCollection {
    #[serde(default)]
    urls: Vec<MonitorStatus>,
}

impl StatusCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh collection with one unset entry per URL.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collection = Self::new();
        for url in urls {
            collection.get_or_insert(url.into());
        }
        collection
    }

    pub fn get(&self, url: &str) -> Option<&MonitorStatus> {
        self.urls.iter().find(|s| s.url == url)
    }

    /// Entry for `url`, appending a never-probed one if missing.
    pub fn get_or_insert(&mut self, url: impl Into<String>) -> &mut MonitorStatus {
        let url = url.into();
        let idx = match self.urls.iter().position(|s| s.url == url) {
            Some(idx) => idx,
            None => {
                self.urls.push(MonitorStatus::new(url));
                self.urls.len() - 1
            }
        };
        &mut self.urls[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitorStatus> {
        self.urls.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonitorStatus> {
        self.urls.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Accepts a JSON string, number, `null` or form value and yields its text.
///
/// Blank strings and `null` become `None`.
pub fn deserialize_loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LooseTextVisitor)
}

struct LooseTextVisitor;

impl<'de> de::Visitor<'de> for LooseTextVisitor {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, a number or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let v = v.trim();
        Ok((!v.is_empty()).then(|| v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(self)
    }
}

/// Parse integer text, tolerating a fractional part (`"1634243688666.0"`).
fn parse_integer_text(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f as i64)
    })
}

mod millis_text {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<EpochMillis>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ms) => s.serialize_str(&ms.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<EpochMillis>, D::Error> {
        match deserialize_loose_text(d)? {
            None => Ok(None),
            Some(text) => parse_integer_text(&text)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", text))),
        }
    }
}

mod frequency_text {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match deserialize_loose_text(d)? {
            None => Ok(DEFAULT_FREQUENCY_SECS),
            Some(text) => parse_integer_text(&text)
                .and_then(|v| u64::try_from(v).ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| de::Error::custom(format!("invalid frequency: {}", text))),
        }
    }
}
