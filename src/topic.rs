//! IoT Hub MQTT topic names.

use std::collections::HashMap;

use crate::message::Message;

pub const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
pub const TWIN_RESPONSE_SUBSCRIPTION: &str = "$iothub/twin/res/#";
pub const DESIRED_PROPERTIES_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
pub const DESIRED_PROPERTIES_SUBSCRIPTION: &str = "$iothub/twin/PATCH/properties/desired/#";

// Form encoding writes a space as `+` (and a literal `+` as `%2B`); the hub
// only decodes `%20`.
fn percent_encode<T: serde::Serialize>(pairs: T) -> Result<String, serde_urlencoded::ser::Error> {
    Ok(serde_urlencoded::to_string(pairs)?.replace('+', "%20"))
}

fn encode_value(value: &str) -> Result<String, serde_urlencoded::ser::Error> {
    // Encodes as "=<value>"; only the value part is wanted.
    let pair = percent_encode([("", value)])?;
    Ok(pair.trim_start_matches('=').to_string())
}

/// `devices/{device_id}/messages/events/{property_bag}`
pub fn telemetry_topic(
    device_id: &str,
    message: &Message,
) -> Result<String, serde_urlencoded::ser::Error> {
    let mut bag = Vec::new();
    let system = [
        ("$.mid", &message.message_id),
        ("$.ce", &message.content_encoding),
        ("$.ct", &message.content_type),
    ];
    for (key, value) in system {
        if let Some(value) = value {
            bag.push(format!("{key}={}", encode_value(value)?));
        }
    }
    if !message.properties.is_empty() {
        bag.push(percent_encode(&message.properties)?);
    }

    Ok(format!(
        "devices/{device_id}/messages/events/{}",
        bag.join("&")
    ))
}

pub fn twin_get_topic(request_id: &str) -> String {
    format!("$iothub/twin/GET/?$rid={request_id}")
}

pub fn twin_patch_reported_topic(request_id: &str) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
}

/// Parsed `$iothub/twin/res/{status}/?$rid={rid}[&$version={n}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinResponseTopic {
    pub status: u16,
    pub request_id: String,
    pub version: Option<u64>,
}

impl TwinResponseTopic {
    pub fn parse(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(TWIN_RESPONSE_PREFIX)?;
        let (status, query) = rest.split_once("/?")?;
        let params: HashMap<String, String> = serde_urlencoded::from_str(query).ok()?;

        Some(TwinResponseTopic {
            status: status.parse().ok()?,
            request_id: params.get("$rid")?.clone(),
            version: params.get("$version").and_then(|v| v.parse().ok()),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Version carried by a desired-properties notification topic.
pub fn parse_desired_properties_version(topic: &str) -> Option<u64> {
    let query = topic
        .strip_prefix(DESIRED_PROPERTIES_PREFIX)?
        .strip_prefix('?')?;
    let params: HashMap<String, String> = serde_urlencoded::from_str(query).ok()?;
    params.get("$version")?.parse().ok()
}
