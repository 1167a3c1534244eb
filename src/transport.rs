use async_trait::async_trait;
use serde_json::Value;

use crate::error::HubError;
use crate::message::Message;
use crate::twin::TwinSnapshot;

/// What a device session needs from a hub connection.
///
/// Calls other than `connect` and `disconnect` are only valid between a
/// successful `connect` and the following `disconnect`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubTransport: Send {
    /// Opens the connection. Fails with [`HubError::Authentication`] when the
    /// hub rejects the credentials.
    async fn connect(&mut self) -> Result<(), HubError>;

    /// Publishes one device-to-cloud message. At most once from the caller's
    /// point of view.
    async fn send_message(&mut self, message: &Message) -> Result<(), HubError>;

    /// Fetches the whole twin document.
    async fn get_twin(&mut self) -> Result<TwinSnapshot, HubError>;

    /// Sends a partial update of the reported section. The hub merges it.
    async fn patch_reported_properties(&mut self, patch: &Value) -> Result<(), HubError>;

    /// Closes the connection. Must be safe after a failed or partial connect.
    async fn disconnect(&mut self) -> Result<(), HubError>;
}
