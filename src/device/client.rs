//! Meter HTTP API client.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde_json::Value;

use crate::device::types::base_url;
use crate::device::{Device, DeviceError, DeviceIdentity, Reading};

/// Capability to talk to a meter.
///
/// Both calls block the caller until the device answers or the client's own
/// timeout elapses; callers never cancel them midway.
#[async_trait::async_trait]
pub trait DeviceClient: Send + Sync + 'static {
    /// Query `GET <address>/api` and build a [`Device`] from its answer.
    async fn identify(&self, address: &str) -> Result<Device, DeviceError>;

    /// Fetch one telemetry sample from the device.
    async fn fetch_reading(&self, device: &Device) -> Result<Reading, DeviceError>;
}

/// `reqwest`-backed [`DeviceClient`].
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    client: Client,
}

impl HttpDeviceClient {
    /// Create a client whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns `DeviceError::Http` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, DeviceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn get_json(&self, url: &str) -> Result<Value, DeviceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait::async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn identify(&self, address: &str) -> Result<Device, DeviceError> {
        let url = format!("{}/api", base_url(address));
        tracing::debug!(url = %url, "Querying device identity");

        let body = self.get_json(&url).await?;
        let identity = DeviceIdentity::from_json(body)?;
        Ok(Device::new(address, identity))
    }

    async fn fetch_reading(&self, device: &Device) -> Result<Reading, DeviceError> {
        let body = self.get_json(&device.telemetry_url()).await?;
        Reading::from_telemetry(&device.serial, Utc::now(), body)
    }
}
