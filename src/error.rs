use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid shared access key: {0}")]
    InvalidKey(String),

    #[error("hub rejected the device credentials: {0}")]
    Authentication(String),

    #[error("could not connect to the hub: {0}")]
    Connection(String),

    #[error("connection to the hub was lost")]
    ConnectionLost,

    #[error("client is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("twin request failed with status {status}")]
    TwinStatus { status: u16 },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Fatal errors end the whole session; the rest only fail one operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::InvalidKey(_)
                | HubError::Authentication(_)
                | HubError::Connection(_)
                | HubError::ConnectionLost
                | HubError::NotConnected
        )
    }
}

impl From<rumqttc::ClientError> for HubError {
    fn from(error: rumqttc::ClientError) -> Self {
        HubError::Transport(error.to_string())
    }
}

/// Errors raised while loading the device configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
}
