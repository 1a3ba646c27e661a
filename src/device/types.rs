//! Device and reading types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::DeviceError;

/// Telemetry fields carrying instantaneous power, in order of preference.
///
/// Firmware revisions disagree on the name; all are normalised to `wattage`.
pub const POWER_FIELDS: &[&str] = &["active_power_w", "active_power"];

/// API version used when the identity response does not announce one.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Self-description returned by `GET <address>/api`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Unique device serial.
    pub serial: String,
    /// Product type code (e.g., "HWE-P1").
    #[serde(default)]
    pub product_type: Option<String>,
    /// Human-readable product name.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Firmware version string.
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Data API version (e.g., "v1").
    #[serde(default)]
    pub api_version: Option<String>,
}

impl DeviceIdentity {
    /// Identity carrying only a serial.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            product_type: None,
            product_name: None,
            firmware_version: None,
            api_version: None,
        }
    }

    /// Decode an identity response, requiring a non-empty `serial`.
    pub fn from_json(value: Value) -> Result<Self, DeviceError> {
        if !value.is_object() {
            return Err(DeviceError::MalformedIdentity(format!(
                "expected JSON object, got {}",
                value
            )));
        }

        let identity: Self = serde_json::from_value(value)
            .map_err(|e| DeviceError::MalformedIdentity(e.to_string()))?;

        if identity.serial.trim().is_empty() {
            return Err(DeviceError::MalformedIdentity("empty serial".to_string()));
        }
        // The serial is written verbatim into line-oriented audit records
        if identity.serial.chars().any(char::is_control) {
            return Err(DeviceError::MalformedIdentity(format!(
                "serial contains control characters: {:?}",
                identity.serial
            )));
        }
        Ok(identity)
    }
}

/// A discovered meter.
///
/// Immutable once created; the registry keys devices by [`Device::serial`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device serial.
    pub serial: String,
    /// Network address (`ip`, `ip:port` or `host:port`).
    pub address: String,
    /// Capability metadata from the identity response.
    pub identity: DeviceIdentity,
}

impl Device {
    /// Create a device from a resolved identity.
    pub fn new(address: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self {
            serial: identity.serial.clone(),
            address: address.into(),
            identity,
        }
    }

    /// Base URL of the device API (no trailing slash).
    pub fn base_url(&self) -> String {
        base_url(&self.address)
    }

    /// Telemetry endpoint, honouring the announced API version.
    pub fn telemetry_url(&self) -> String {
        let version = self
            .identity
            .api_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_API_VERSION);
        format!("{}/api/{}/data", self.base_url(), version)
    }
}

/// Normalise an address into an HTTP base URL.
pub(crate) fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// One telemetry sample from one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Serial of the producing device.
    pub serial: String,
    /// Wall-clock time at fetch.
    pub timestamp: DateTime<Utc>,
    /// Instantaneous power in watts.
    pub wattage: f64,
    /// Remaining telemetry fields, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

impl Reading {
    /// Create a reading without raw payload fields.
    pub fn new(serial: impl Into<String>, timestamp: DateTime<Utc>, wattage: f64) -> Self {
        Self {
            serial: serial.into(),
            timestamp,
            wattage,
            raw: Map::new(),
        }
    }

    /// Decode a telemetry response into a reading.
    ///
    /// The first field of [`POWER_FIELDS`] holding a number becomes `wattage`;
    /// every other field is kept in `raw`. Fails if no power field is present.
    pub fn from_telemetry(
        serial: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Value,
    ) -> Result<Self, DeviceError> {
        let Value::Object(mut fields) = payload else {
            return Err(missing_power());
        };

        let wattage = POWER_FIELDS
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_f64).map(|w| (*name, w)));

        let Some((field, wattage)) = wattage else {
            return Err(missing_power());
        };
        fields.remove(field);

        Ok(Self {
            serial: serial.into(),
            timestamp,
            wattage,
            raw: fields,
        })
    }

    /// Timestamp as fractional Unix seconds.
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64 / 1000.0
    }
}

fn missing_power() -> DeviceError {
    DeviceError::MissingPower {
        expected: POWER_FIELDS.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_identity_requires_serial() {
        let identity = DeviceIdentity::from_json(json!({
            "serial": "AA11",
            "product_type": "HWE-P1",
            "api_version": "v1"
        }))
        .unwrap();
        assert_eq!(identity.serial, "AA11");
        assert_eq!(identity.product_type.as_deref(), Some("HWE-P1"));

        assert!(DeviceIdentity::from_json(json!({"product_type": "HWE-P1"})).is_err());
        assert!(DeviceIdentity::from_json(json!({"serial": "  "})).is_err());
        assert!(DeviceIdentity::from_json(json!({"serial": 42})).is_err());
        assert!(DeviceIdentity::from_json(json!(["AA11"])).is_err());
    }

    #[test]
    fn test_identity_rejects_control_characters_in_serial() {
        for serial in ["AA11\n1700000000,FAKE,9999.0", "AA11\r", "AA\u{0}11", "AA11\t"] {
            let err = DeviceIdentity::from_json(json!({ "serial": serial })).unwrap_err();
            assert!(
                matches!(err, DeviceError::MalformedIdentity(_)),
                "accepted serial {serial:?}"
            );
        }

        // Commas and spaces survive the audit format
        let identity = DeviceIdentity::from_json(json!({"serial": "AA 11,b"})).unwrap();
        assert_eq!(identity.serial, "AA 11,b");
    }

    #[test]
    fn test_device_urls() {
        let identity = DeviceIdentity::from_json(json!({"serial": "AA11"})).unwrap();
        let device = Device::new("10.0.0.5", identity.clone());
        assert_eq!(device.serial, "AA11");
        assert_eq!(device.base_url(), "http://10.0.0.5");
        assert_eq!(device.telemetry_url(), "http://10.0.0.5/api/v1/data");

        let device = Device::new(
            "http://meter.local:8080/",
            DeviceIdentity {
                api_version: Some("v2".to_string()),
                ..identity
            },
        );
        assert_eq!(device.telemetry_url(), "http://meter.local:8080/api/v2/data");
    }

    #[test]
    fn test_reading_from_active_power_w() {
        let reading = Reading::from_telemetry(
            "AA11",
            ts(),
            json!({"active_power_w": 42.0, "wifi_strength": 80}),
        )
        .unwrap();

        assert_eq!(reading.serial, "AA11");
        assert_eq!(reading.wattage, 42.0);
        assert_eq!(reading.timestamp, ts());
        assert!(!reading.raw.contains_key("active_power_w"));
        assert_eq!(reading.raw["wifi_strength"], json!(80));
    }

    #[test]
    fn test_reading_from_legacy_field_name() {
        let reading = Reading::from_telemetry("AA11", ts(), json!({"active_power": -150})).unwrap();
        assert_eq!(reading.wattage, -150.0);
    }

    #[test]
    fn test_reading_prefers_first_power_field() {
        let reading = Reading::from_telemetry(
            "AA11",
            ts(),
            json!({"active_power": 1.0, "active_power_w": 2.0}),
        )
        .unwrap();
        assert_eq!(reading.wattage, 2.0);
        assert_eq!(reading.raw["active_power"], json!(1.0));
    }

    #[test]
    fn test_reading_missing_power_is_error() {
        let err = Reading::from_telemetry("AA11", ts(), json!({"total_power_import_kwh": 1.5}))
            .unwrap_err();
        assert!(matches!(err, DeviceError::MissingPower { .. }));
        assert!(err.to_string().contains("active_power_w"));

        // Non-numeric power is as good as missing
        assert!(Reading::from_telemetry("AA11", ts(), json!({"active_power_w": "42"})).is_err());
        assert!(Reading::from_telemetry("AA11", ts(), json!(42.0)).is_err());
    }

    #[test]
    fn test_unix_timestamp() {
        let reading = Reading::new("AA11", ts(), 42.0);
        assert_eq!(reading.unix_timestamp(), 1_700_000_000.0);
    }
}
