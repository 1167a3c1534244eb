use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::HubError;

/// MQTT API version the hub is addressed with.
pub const API_VERSION: &str = "2021-04-12";

fn generate_token(decoded_key: &[u8], message: &str) -> Result<String, HubError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(decoded_key)
        .map_err(|e| HubError::InvalidKey(e.to_string()))?;
    mac.update(message.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    serde_urlencoded::to_string([("sig", signature)])
        .map_err(|e| HubError::InvalidKey(e.to_string()))
}

pub fn generate_username(hostname: &str, device_id: &str) -> String {
    format!("{hostname}/{device_id}/?api-version={API_VERSION}")
}

pub fn generate_shared_access_signature(
    hostname: &str,
    device_id: &str,
    key: &str,
    expiry: &DateTime<Utc>,
) -> Result<String, HubError> {
    let decoded_key = general_purpose::STANDARD
        .decode(key)
        .map_err(|e| HubError::InvalidKey(e.to_string()))?;

    let resource_uri = format!("{}%2Fdevices%2F{}", hostname, device_id);
    let expiry_timestamp = expiry.timestamp();
    let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);
    let token = generate_token(&decoded_key, &to_sign)?;

    Ok(format!(
        "SharedAccessSignature sr={}&{}&se={}",
        resource_uri, token, expiry_timestamp
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY: &str = "dGhpcyBpcyBhIHRlc3Qga2V5IGZvciB0aGUgZGV2aWNl";

    #[test]
    fn test_username() {
        assert_eq!(
            generate_username("hub.azure-devices.net", "buoy-01"),
            "hub.azure-devices.net/buoy-01/?api-version=2021-04-12"
        );
    }

    #[test]
    fn test_signature_shape() {
        let expiry = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let sas =
            generate_shared_access_signature("hub.azure-devices.net", "buoy-01", KEY, &expiry)
                .unwrap();

        assert!(sas.starts_with(
            "SharedAccessSignature sr=hub.azure-devices.net%2Fdevices%2Fbuoy-01&sig="
        ));
        assert!(sas.ends_with("&se=1700000000"));
    }

    #[test]
    fn test_signature_is_deterministic_and_key_dependent() {
        let expiry = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = generate_shared_access_signature("hub", "d", KEY, &expiry).unwrap();
        let second = generate_shared_access_signature("hub", "d", KEY, &expiry).unwrap();
        let other_key = general_purpose::STANDARD.encode("another key");
        let third = generate_shared_access_signature("hub", "d", &other_key, &expiry).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn test_signature_rejects_bad_key() {
        let expiry = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let err = generate_shared_access_signature("hub", "d", "%%%", &expiry).unwrap_err();
        assert!(matches!(err, HubError::InvalidKey(_)));
    }
}
