//! Test doubles that need to await: stalled transport calls, deterministic
//! tickers and a console sink.

use async_trait::async_trait;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::message::Message;
use crate::schedule::Ticker;
use crate::transport::{HubTransport, MockHubTransport};
use crate::twin::TwinSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Send,
    GetTwin,
}

/// Forwards every call to `inner`, then never returns from `stage`.
///
/// Expectations returned by a mockall double resolve immediately, so a hung
/// hub needs this wrapper.
pub struct StalledTransport {
    inner: MockHubTransport,
    stage: Stage,
}

impl StalledTransport {
    pub fn new(inner: MockHubTransport, stage: Stage) -> Self {
        StalledTransport { inner, stage }
    }
}

async fn stall_if(stalled: bool) {
    if stalled {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl HubTransport for StalledTransport {
    async fn connect(&mut self) -> Result<(), HubError> {
        let result = self.inner.connect().await;
        stall_if(self.stage == Stage::Connect).await;
        result
    }

    async fn send_message(&mut self, message: &Message) -> Result<(), HubError> {
        let result = self.inner.send_message(message).await;
        stall_if(self.stage == Stage::Send).await;
        result
    }

    async fn get_twin(&mut self) -> Result<TwinSnapshot, HubError> {
        let result = self.inner.get_twin().await;
        stall_if(self.stage == Stage::GetTwin).await;
        result
    }

    async fn patch_reported_properties(&mut self, patch: &Value) -> Result<(), HubError> {
        self.inner.patch_reported_properties(patch).await
    }

    async fn disconnect(&mut self) -> Result<(), HubError> {
        self.inner.disconnect().await
    }
}

/// Ticks immediately `ticks` times, then raises the interrupt.
pub struct CountdownTicker {
    remaining: usize,
    interrupt: CancellationToken,
}

impl CountdownTicker {
    pub fn new(ticks: usize, interrupt: CancellationToken) -> Self {
        CountdownTicker {
            remaining: ticks,
            interrupt,
        }
    }
}

#[async_trait]
impl Ticker for CountdownTicker {
    async fn tick(&mut self) {
        if self.remaining == 0 {
            self.interrupt.cancel();
            std::future::pending::<()>().await;
        }
        self.remaining -= 1;
    }
}

/// Always ready.
pub struct ImmediateTicker;

#[async_trait]
impl Ticker for ImmediateTicker {
    async fn tick(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// Cloneable in-memory sink, for capturing console output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
