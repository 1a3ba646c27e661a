//! HTTP POST transport.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::forwarder::{Batch, Transport, TransportError};

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/";

/// Default request timeout (10 seconds).
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_url() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TRANSPORT_TIMEOUT
}

/// Collection endpoint settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint receiving `POST` requests with a JSON array body.
    #[serde(default = "default_url")]
    pub url: String,
    /// Account the readings are attributed to.
    #[serde(default)]
    pub user_id: String,
    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            user_id: String::new(),
            auth_token: None,
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("url", &self.url)
            .field("user_id", &self.user_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One reading as sent over the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireReading<'a> {
    user_id: &'a str,
    timestamp: f64,
    serial: &'a str,
    wattage: f64,
}

/// Delivers a batch as one JSON array `POST`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport for `config`.
    ///
    /// # Errors
    /// Returns `TransportError::Http` if the HTTP client cannot be built.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn payload<'a>(&'a self, batch: &'a Batch) -> Vec<WireReading<'a>> {
        batch
            .readings()
            .iter()
            .map(|r| WireReading {
                user_id: &self.config.user_id,
                timestamp: r.unix_timestamp(),
                serial: &r.serial,
                wattage: r.wattage,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.config.url).json(&self.payload(batch));
        if let Some(token) = self.config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        tracing::debug!(url = %self.config.url, count = batch.len(), "Batch posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Reading;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_wire_payload_shape() {
        let transport = HttpTransport::new(TransportConfig {
            user_id: "user-1".to_string(),
            ..TransportConfig::default()
        })
        .unwrap();

        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = Batch::from(vec![Reading::new("AA11", ts, 42.0)]);
        let value = serde_json::to_value(transport.payload(&batch)).unwrap();

        assert_eq!(
            value,
            json!([{
                "userId": "user-1",
                "timestamp": 1_700_000_000.0,
                "serial": "AA11",
                "wattage": 42.0
            }])
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = TransportConfig {
            auth_token: Some("s3cret".to_string()),
            ..TransportConfig::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let transport = HttpTransport::new(TransportConfig {
            url: "http://127.0.0.1:9/".to_string(),
            timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        })
        .unwrap();

        let err = transport.send(&Batch::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
