//! Simulated device samples for Azure IoT Hub: periodic telemetry and
//! device twin read/patch over MQTT.

pub mod communication;
pub mod config;
pub mod console;
pub mod error;
pub mod message;
pub mod retry;
pub mod sas;
pub mod schedule;
pub mod session;
pub mod telemetry;
pub mod topic;
pub mod transport;
pub mod twin;

#[cfg(test)]
mod mock;

pub use communication::AzureIotHub;
pub use config::{ConnectionIdentity, DeviceConfig};
pub use console::Console;
pub use error::{ConfigError, HubError};
pub use message::Message;
pub use session::{DeviceSession, Operation, SessionOutcome, SessionReport, TelemetryPlan, TwinPlan};
pub use transport::HubTransport;
pub use twin::TwinSnapshot;

/// Cancels `interrupt` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(interrupt: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("received Ctrl-C");
                interrupt.cancel();
            }
            Err(e) => log::error!("unable to listen for Ctrl-C: {e}"),
        }
    });
}
