use log::{debug, error, info, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::console::Console;
use crate::console_line;
use crate::error::HubError;
use crate::message::Message;
use crate::retry::RetryPolicy;
use crate::schedule::{IntervalTicker, Ticker};
use crate::telemetry::TelemetryReading;
use crate::transport::HubTransport;
use crate::twin::sample_reported_patch;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Operating,
    Disconnecting,
    Closed,
}

/// Periodic telemetry until interrupted or `message_limit` is reached.
pub struct TelemetryPlan {
    pub ticker: Box<dyn Ticker>,
    pub with_metadata: bool,
    pub message_limit: Option<u64>,
    pub retry: RetryPolicy,
    pub operation_timeout: Duration,
}

impl TelemetryPlan {
    pub fn from_config(config: &DeviceConfig) -> Self {
        TelemetryPlan {
            ticker: Box::new(IntervalTicker::new(config.telemetry_interval)),
            with_metadata: config.include_metadata,
            message_limit: config.message_limit,
            retry: config.send_retry,
            operation_timeout: config.operation_timeout,
        }
    }
}

/// One twin read followed by one reported-properties patch.
#[derive(Debug, Clone)]
pub struct TwinPlan {
    pub patch: Value,
    pub operation_timeout: Duration,
}

impl TwinPlan {
    pub fn from_config(config: &DeviceConfig) -> Self {
        TwinPlan {
            patch: sample_reported_patch(),
            operation_timeout: config.operation_timeout,
        }
    }
}

pub enum Operation {
    Telemetry(TelemetryPlan),
    Twin(TwinPlan),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub stats: SendStats,
}

enum Delivery {
    Accepted,
    Interrupted,
}

fn timed_out(operation: &'static str, timeout: Duration) -> HubError {
    HubError::Timeout { operation, timeout }
}

/// One connect → operate → disconnect cycle against a hub.
///
/// `run` consumes the session: the transport is released exactly once on
/// every exit path, and a closed session can not be reopened. The interrupt
/// takes priority over every other event the session waits on.
pub struct DeviceSession<T> {
    transport: T,
    console: Console,
    connect_timeout: Duration,
    state: SessionState,
}

impl<T: HubTransport> DeviceSession<T> {
    pub fn new(transport: T, console: Console) -> Self {
        DeviceSession {
            transport,
            console,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state: SessionState::Uninitialized,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub async fn run(
        mut self,
        operation: Operation,
        interrupt: CancellationToken,
    ) -> Result<SessionReport, HubError> {
        let result = self.connect_and_operate(operation, &interrupt).await;
        if let Err(e) = &result {
            error!("device session failed: {e}");
            console_line!(self.console, "Unexpected error {e} from IoTHub");
        }

        self.transition(SessionState::Disconnecting);
        console_line!(self.console, "Disconnecting client");
        if let Err(e) = self.transport.disconnect().await {
            warn!("disconnect failed: {e}");
        }
        self.transition(SessionState::Closed);

        result
    }

    fn finish(&mut self, outcome: SessionOutcome, stats: SendStats) -> SessionReport {
        if outcome == SessionOutcome::Interrupted {
            info!("interrupt received, stopping device session");
            console_line!(self.console, "Shutting down device client");
        }
        SessionReport { outcome, stats }
    }

    async fn connect_and_operate(
        &mut self,
        operation: Operation,
        interrupt: &CancellationToken,
    ) -> Result<SessionReport, HubError> {
        self.transition(SessionState::Connecting);
        let connect_timeout = self.connect_timeout;
        let connected = tokio::select! {
            biased;
            _ = interrupt.cancelled() => None,
            result = timeout(connect_timeout, self.transport.connect()) => Some(result),
        };
        match connected {
            None => {
                return Ok(self.finish(SessionOutcome::Interrupted, SendStats::default()));
            }
            Some(result) => result.map_err(|_| timed_out("connect", connect_timeout))??,
        }
        self.transition(SessionState::Connected);
        info!("device session connected");

        match operation {
            Operation::Telemetry(plan) => self.run_telemetry(plan, interrupt).await,
            Operation::Twin(plan) => self.run_twin(plan, interrupt).await,
        }
    }

    async fn run_telemetry(
        &mut self,
        mut plan: TelemetryPlan,
        interrupt: &CancellationToken,
    ) -> Result<SessionReport, HubError> {
        console_line!(
            self.console,
            "IoT Hub device sending periodic messages, press Ctrl-C to exit"
        );

        let message_limit = plan.message_limit;
        let mut stats = SendStats::default();
        let outcome = loop {
            if message_limit.is_some_and(|limit| stats.sent >= limit) {
                break SessionOutcome::Completed;
            }
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => break SessionOutcome::Interrupted,
                _ = plan.ticker.tick() => {}
            }
            self.transition(SessionState::Operating);

            let reading = TelemetryReading::simulate(&mut rand::thread_rng());
            let message = reading.into_message(plan.with_metadata)?;
            console_line!(self.console, "Sending message: {}", message.body_text());
            stats.sent += 1;

            match self
                .send_with_retry(&message, plan.retry, plan.operation_timeout, interrupt)
                .await
            {
                Ok(Delivery::Accepted) => {
                    stats.succeeded += 1;
                    debug!("send status: accepted");
                }
                Ok(Delivery::Interrupted) => {
                    stats.failed += 1;
                    debug!("message {} abandoned on interrupt", stats.sent);
                    break SessionOutcome::Interrupted;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.failed += 1;
                    warn!("message {} not delivered: {e}", stats.sent);
                    console_line!(self.console, "Error sending message from device: {e}");
                }
            }
        };

        console_line!(
            self.console,
            "Sent {} messages ({} succeeded, {} failed)",
            stats.sent,
            stats.succeeded,
            stats.failed
        );
        Ok(self.finish(outcome, stats))
    }

    async fn send_with_retry(
        &mut self,
        message: &Message,
        retry: RetryPolicy,
        operation_timeout: Duration,
        interrupt: &CancellationToken,
    ) -> Result<Delivery, HubError> {
        let mut attempt = 1;
        loop {
            let sent = tokio::select! {
                biased;
                _ = interrupt.cancelled() => return Ok(Delivery::Interrupted),
                sent = timeout(operation_timeout, self.transport.send_message(message)) => sent,
            };
            let error = match sent {
                Ok(Ok(())) => return Ok(Delivery::Accepted),
                Ok(Err(e)) => e,
                Err(_) => timed_out("send", operation_timeout),
            };
            if error.is_fatal() {
                return Err(error);
            }
            let Some(delay) = retry.backoff(attempt) else {
                return Err(error);
            };

            warn!("send attempt {attempt} failed: {error}, retrying in {delay:?}");
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => return Ok(Delivery::Interrupted),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn run_twin(
        &mut self,
        plan: TwinPlan,
        interrupt: &CancellationToken,
    ) -> Result<SessionReport, HubError> {
        let stats = SendStats::default();
        let operation_timeout = plan.operation_timeout;
        self.transition(SessionState::Operating);

        console_line!(self.console, "Get device twin");
        let twin = tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                return Ok(self.finish(SessionOutcome::Interrupted, stats));
            }
            result = timeout(operation_timeout, self.transport.get_twin()) => {
                result.map_err(|_| timed_out("get twin", operation_timeout))??
            }
        };
        console_line!(self.console, "{}", serde_json::to_string_pretty(&twin)?);

        console_line!(self.console, "Updating reported properties");
        tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                return Ok(self.finish(SessionOutcome::Interrupted, stats));
            }
            result = timeout(
                operation_timeout,
                self.transport.patch_reported_properties(&plan.patch),
            ) => {
                result.map_err(|_| timed_out("patch reported properties", operation_timeout))??
            }
        }
        console_line!(self.console, "twin state reported");

        Ok(self.finish(SessionOutcome::Completed, stats))
    }
}
