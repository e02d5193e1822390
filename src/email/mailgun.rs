//! Mailgun HTTP API transport.

use async_trait::async_trait;
use std::time::Duration;

use super::{EmailMessage, Emailer, NotificationError};
use crate::config::MailgunConfig;

/// Sends alerts through `POST {api_base}/v3/{domain}/messages`.
#[derive(Debug, Clone)]
pub struct MailgunEmailer {
    client: reqwest::Client,
    config: MailgunConfig,
    timeout: Duration,
}

impl MailgunEmailer {
    pub fn new(config: MailgunConfig, timeout: Duration) -> Result<Self, NotificationError> {
        if config.domain.is_empty() || config.api_key.is_empty() {
            return Err(NotificationError::Config(
                "mailgun domain and api key are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;
        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v3/{}/messages", self.config.api_base, self.config.domain)
    }
}

#[async_trait]
impl Emailer for MailgunEmailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let form = [
            ("from", self.config.from.as_str()),
            ("to", message.to.as_str()),
            ("subject", message.subject.as_str()),
            ("text", message.body.as_str()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.config.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout(self.timeout)
                } else {
                    NotificationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Mailgun accepted alert for {}: {}", message.to, message.subject);
        Ok(())
    }
}
