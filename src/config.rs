use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Longest lifetime accepted for the SAS tokens minted on connect.
pub const MAX_SAS_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Credentials of one device, parsed from its connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub hostname: String,
    pub device_id: String,
    shared_access_key: String,
}

impl ConnectionIdentity {
    pub fn new(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        shared_access_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let identity = ConnectionIdentity {
            hostname: hostname.into(),
            device_id: device_id.into(),
            shared_access_key: shared_access_key.into(),
        };
        if identity.hostname.is_empty() || identity.device_id.is_empty() {
            return Err(ConfigError::InvalidConnectionString(
                "host name and device id must not be empty".into(),
            ));
        }

        // Verify key is base64 and usable for Hmac
        let decoded_key = general_purpose::STANDARD
            .decode(&identity.shared_access_key)
            .map_err(|e| ConfigError::InvalidConnectionString(format!("SharedAccessKey: {e}")))?;
        Hmac::<Sha256>::new_from_slice(&decoded_key)
            .map_err(|e| ConfigError::InvalidConnectionString(format!("SharedAccessKey: {e}")))?;

        Ok(identity)
    }

    /// Parses `HostName=...;DeviceId=...;SharedAccessKey=...`.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut hostname = None;
        let mut device_id = None;
        let mut key = None;

        let parts = connection_string.trim().split(';');
        for part in parts.filter(|p| !p.is_empty()) {
            if let Some(value) = part.strip_prefix("HostName=") {
                hostname = Some(value);
            } else if let Some(value) = part.strip_prefix("DeviceId=") {
                device_id = Some(value);
            } else if let Some(value) = part.strip_prefix("SharedAccessKey=") {
                key = Some(value);
            }
        }

        let missing = |name: &str| ConfigError::InvalidConnectionString(format!("missing {name}"));
        Self::new(
            hostname.ok_or_else(|| missing("HostName"))?,
            device_id.ok_or_else(|| missing("DeviceId"))?,
            key.ok_or_else(|| missing("SharedAccessKey"))?,
        )
    }

    pub fn shared_access_key(&self) -> &str {
        &self.shared_access_key
    }
}

// Keeps the key out of logs.
impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("hostname", &self.hostname)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"<redacted>")
            .finish()
    }
}

/// Everything a sample needs to run one device session.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub identity: ConnectionIdentity,
    pub telemetry_interval: Duration,
    pub message_limit: Option<u64>,
    pub include_metadata: bool,
    pub sas_token_ttl: Duration,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub send_retry: RetryPolicy,
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let identity = match lookup("IOTHUB_DEVICE_CONNECTION_STRING") {
            Some(connection_string) => ConnectionIdentity::parse(&connection_string)?,
            None => {
                let require = |name: &str| {
                    lookup(name).ok_or_else(|| {
                        ConfigError::Missing(format!(
                            "set IOTHUB_DEVICE_CONNECTION_STRING or the {name} environment variable"
                        ))
                    })
                };
                ConnectionIdentity::new(
                    require("IOTHUB_HOSTNAME")?,
                    require("DEVICE_ID")?,
                    require("SHARED_ACCESS_KEY")?,
                )?
            }
        };

        let retry_backoff = Duration::from_millis(parse_or(&lookup, "SEND_RETRY_BACKOFF_MS", 500)?);
        let max_attempts = parse_in(&lookup, "SEND_MAX_ATTEMPTS", 3, 1..=u32::MAX)?;
        let interval_ms = parse_in(&lookup, "TELEMETRY_INTERVAL_MS", 1000, 1..=u64::MAX)?;
        let ttl_secs = parse_in(
            &lookup,
            "SAS_TOKEN_TTL_SECS",
            600,
            1..=MAX_SAS_TOKEN_TTL_SECS,
        )?;

        Ok(DeviceConfig {
            identity,
            telemetry_interval: Duration::from_millis(interval_ms),
            message_limit: parse_opt(&lookup, "TELEMETRY_MESSAGE_LIMIT")?,
            include_metadata: parse_or(&lookup, "TELEMETRY_INCLUDE_METADATA", true)?,
            sas_token_ttl: Duration::from_secs(ttl_secs),
            keep_alive: Duration::from_secs(parse_or(&lookup, "MQTT_KEEP_ALIVE_SECS", 5)?),
            connect_timeout: Duration::from_secs(parse_or(&lookup, "CONNECT_TIMEOUT_SECS", 30)?),
            operation_timeout: Duration::from_secs(parse_or(
                &lookup,
                "OPERATION_TIMEOUT_SECS",
                30,
            )?),
            send_retry: RetryPolicy::new(max_attempts, retry_backoff, retry_backoff * 10),
        })
    }
}

fn parse_opt<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}

fn parse_in<F, T>(
    lookup: &F,
    name: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + ToString,
{
    let value = parse_or(lookup, name, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}
