//! HTTP probe implementation.

use async_trait::async_trait;
use std::time::Duration;

use super::{ProbeError, Prober};

/// Prober backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    /// Run an HTTP GET against the given URL and return the status code.
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else if e.is_builder() {
                ProbeError::Config(e.to_string())
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        tracing::debug!("Probe {} returned {}", url, status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let prober = HttpProber::new(Duration::from_millis(100)).unwrap();
        let result = prober.probe("http://256.256.256.256").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_probe_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let prober = HttpProber::new(Duration::from_secs(5)).unwrap();
        let status = prober.probe(&format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(status, 503);
    }
}
