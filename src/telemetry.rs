use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::message::{new_message_id, Message};

pub const BASE_TEMPERATURE: f64 = 20.0;
pub const TEMPERATURE_SPREAD: f64 = 15.0;
pub const BASE_HUMIDITY: f64 = 60.0;
pub const HUMIDITY_SPREAD: f64 = 20.0;

/// Readings above this raise the `temperatureAlert` property.
pub const TEMPERATURE_ALERT_THRESHOLD: f64 = 30.0;

pub const TEMPERATURE_ALERT_PROPERTY: &str = "temperatureAlert";

/// One simulated sensor sample. Serializes to the message body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub temperature: f64,
    pub humidity: f64,
}

impl TelemetryReading {
    pub fn simulate<R: Rng>(rng: &mut R) -> Self {
        TelemetryReading {
            temperature: BASE_TEMPERATURE + rng.gen_range(0.0..=TEMPERATURE_SPREAD),
            humidity: BASE_HUMIDITY + rng.gen_range(0.0..=HUMIDITY_SPREAD),
        }
    }

    pub fn temperature_alert(&self) -> bool {
        temperature_alert(self.temperature)
    }

    /// Builds the message sent for this reading. `with_metadata` adds a
    /// unique id plus content encoding and type.
    pub fn into_message(self, with_metadata: bool) -> Result<Message, serde_json::Error> {
        let body = serde_json::to_vec(&self)?;
        let alert = self.temperature_alert().to_string();
        let mut builder = Message::builder()
            .set_body(body)
            .add_property(TEMPERATURE_ALERT_PROPERTY, alert);
        if with_metadata {
            builder = builder
                .set_message_id(new_message_id())
                .set_content_encoding("utf-8")
                .set_content_type("application/json");
        }
        Ok(builder.build())
    }
}

pub fn temperature_alert(temperature: f64) -> bool {
    temperature > TEMPERATURE_ALERT_THRESHOLD
}
