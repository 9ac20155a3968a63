// src/utils/http.rs

//! HTTP transport.
//!
//! The protocol driver talks to the provider through the small [`Transport`]
//! capability so tests can swap in an in-memory transport with canned
//! responses.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Config;

/// Status and body of a provider response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal request capability used by the client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request. `body` is sent when `is_post` is set; transport
    /// failures are errors, non-2xx statuses are not.
    async fn request(&self, url: &str, body: &[u8], is_post: bool) -> Result<TransportResponse>;
}

/// Transport backed by a reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a configured transport.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", config.client_name, config.app_version))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, url: &str, body: &[u8], is_post: bool) -> Result<TransportResponse> {
        let request = if is_post {
            self.client.post(url).body(body.to_vec())
        } else {
            self.client.get(url)
        };
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_transport() {
        let config = Config::new("key", "/tmp/sb");
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_status_classification() {
        let ok = TransportResponse {
            status: 204,
            body: Vec::new(),
        };
        let bad = TransportResponse {
            status: 503,
            body: Vec::new(),
        };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
