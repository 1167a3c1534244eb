use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Full twin document as returned by a GET. Not cached locally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TwinSnapshot {
    #[serde(default)]
    pub desired: Value,
    #[serde(default)]
    pub reported: Value,
}

/// The reported-properties patch the twin sample sends.
pub fn sample_reported_patch() -> Value {
    json!({
        "weather": {
            "temperature": 72,
            "humidity": 17
        },
        "firmwareVersion": "1.2.2"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_hub_document() {
        let document = br#"{
            "desired": { "telemetryInterval": 10, "$version": 4 },
            "reported": { "firmwareVersion": "1.2.1", "$version": 9 }
        }"#;
        let twin: TwinSnapshot = serde_json::from_slice(document).unwrap();

        assert_eq!(twin.desired["telemetryInterval"], 10);
        assert_eq!(twin.desired["$version"], 4);
        assert_eq!(twin.reported["$version"], 9);
    }

    #[test]
    fn test_snapshot_tolerates_missing_sections() {
        let twin: TwinSnapshot = serde_json::from_slice(br#"{"desired":{"$version":1}}"#).unwrap();
        assert_eq!(twin.reported, Value::Null);
        assert_eq!(twin.desired["$version"], 1);
    }

    #[test]
    fn test_sample_patch_shape() {
        let patch = sample_reported_patch();
        assert_eq!(patch["weather"]["temperature"], 72);
        assert_eq!(patch["weather"]["humidity"], 17);
        assert_eq!(patch["firmwareVersion"], "1.2.2");
    }
}
