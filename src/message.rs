use std::collections::BTreeMap;

/// A device-to-cloud message as the hub sees it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    /// Application properties the hub can route on without reading the body.
    pub properties: BTreeMap<String, String>,
}

impl Message {
    pub fn new(body: Vec<u8>) -> Self {
        Message {
            body,
            ..Default::default()
        }
    }

    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.message.body = body;
        self
    }

    pub fn set_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message.message_id = Some(message_id.into());
        self
    }

    pub fn set_content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.message.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn set_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.message.content_type = Some(content_type.into());
        self
    }

    pub fn add_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

/// Random 128-bit hex token used as a message id.
pub fn new_message_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_metadata_and_properties() {
        let message = Message::builder()
            .set_body(b"{}".to_vec())
            .set_message_id("42")
            .set_content_encoding("utf-8")
            .set_content_type("application/json")
            .add_property("temperatureAlert", "false")
            .build();

        assert_eq!(message.body_text(), "{}");
        assert_eq!(message.message_id.as_deref(), Some("42"));
        assert_eq!(message.content_encoding.as_deref(), Some("utf-8"));
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(message.properties["temperatureAlert"], "false");
    }

    #[test]
    fn test_message_ids_are_unique_hex() {
        let first = new_message_id();
        let second = new_message_id();

        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
