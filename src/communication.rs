use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS, Transport,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionIdentity, DeviceConfig};
use crate::error::HubError;
use crate::message::Message;
use crate::sas::{generate_shared_access_signature, generate_username};
use crate::topic::{
    parse_desired_properties_version, telemetry_topic, twin_get_topic, twin_patch_reported_topic,
    TwinResponseTopic, DESIRED_PROPERTIES_SUBSCRIPTION, TWIN_RESPONSE_SUBSCRIPTION,
};
use crate::transport::HubTransport;
use crate::twin::TwinSnapshot;

const MQTT_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct TwinReply {
    topic: TwinResponseTopic,
    payload: Vec<u8>,
}

type PendingTable = HashMap<String, oneshot::Sender<TwinReply>>;
type PendingRequests = Arc<Mutex<PendingTable>>;

fn lock(pending: &PendingRequests) -> MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a twin request from the pending table however its wait ends.
struct PendingRequest {
    pending: PendingRequests,
    request_id: String,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.request_id);
    }
}

/// Device client for Azure IoT Hub over MQTT.
///
/// The MQTT event loop runs on a background task started by `connect`.
/// A lost connection is not re-established.
pub struct AzureIotHub {
    identity: ConnectionIdentity,
    keep_alive: Duration,
    sas_token_ttl: Duration,
    client: Option<AsyncClient>,
    connection_task: Option<JoinHandle<()>>,
    stop_signal: CancellationToken,
    connected: Arc<AtomicBool>,
    pending: PendingRequests,
    last_request_id: u64,
}

impl AzureIotHub {
    pub fn new(config: &DeviceConfig) -> AzureIotHub {
        AzureIotHub {
            identity: config.identity.clone(),
            keep_alive: config.keep_alive,
            sas_token_ttl: config.sas_token_ttl,
            client: None,
            connection_task: None,
            stop_signal: CancellationToken::new(),
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_request_id: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn mqtt_options(&self) -> Result<MqttOptions, HubError> {
        let hostname = &self.identity.hostname;
        let device_id = &self.identity.device_id;
        let expiry = token_expiry(Utc::now(), self.sas_token_ttl)?;
        let password = generate_shared_access_signature(
            hostname,
            device_id,
            self.identity.shared_access_key(),
            &expiry,
        )?;

        let mut mqttoptions = MqttOptions::new(device_id, hostname, MQTT_PORT);
        mqttoptions
            .set_transport(Transport::tls_with_default_config())
            .set_keep_alive(self.keep_alive)
            .set_credentials(generate_username(hostname, device_id), password);
        Ok(mqttoptions)
    }

    fn connected_client(&self) -> Result<&AsyncClient, HubError> {
        let client = self.client.as_ref().ok_or(HubError::NotConnected)?;
        if !self.is_connected() {
            return Err(HubError::ConnectionLost);
        }
        Ok(client)
    }

    async fn twin_request(
        &mut self,
        topic: fn(&str) -> String,
        payload: Vec<u8>,
    ) -> Result<TwinReply, HubError> {
        self.last_request_id += 1;
        let request_id = self.last_request_id.to_string();
        let client = self.connected_client()?.clone();

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), reply_tx);
        let _pending = PendingRequest {
            pending: Arc::clone(&self.pending),
            request_id: request_id.clone(),
        };

        let topic = topic(&request_id);
        debug!("twin request {request_id} -> {topic}");
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;

        // The sender is dropped when the event loop dies.
        let reply = reply_rx.await.map_err(|_| HubError::ConnectionLost)?;
        debug!("twin response {request_id}: status {}", reply.topic.status);
        if !reply.topic.is_success() {
            return Err(HubError::TwinStatus {
                status: reply.topic.status,
            });
        }
        Ok(reply)
    }
}

#[async_trait]
impl HubTransport for AzureIotHub {
    async fn connect(&mut self) -> Result<(), HubError> {
        if self.client.is_some() {
            return Err(HubError::Connection(
                "the connection has already been established".into(),
            ));
        }

        let (client, eventloop) = AsyncClient::new(self.mqtt_options()?, REQUEST_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        self.stop_signal = CancellationToken::new();
        let context = EventLoopContext {
            stop_signal: self.stop_signal.clone(),
            connected: Arc::clone(&self.connected),
            pending: Arc::clone(&self.pending),
            connack: Some(connack_tx),
        };
        self.connection_task = Some(tokio::spawn(run_event_loop(eventloop, context)));
        self.client = Some(client.clone());

        connack_rx
            .await
            .map_err(|_| HubError::Connection("event loop stopped before CONNACK".into()))??;

        for topic in [
            TWIN_RESPONSE_SUBSCRIPTION,
            DESIRED_PROPERTIES_SUBSCRIPTION,
        ] {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|e| HubError::Connection(format!("failed to subscribe to {topic}: {e}")))?;
        }

        info!("IotHub client connected as {}", self.identity.device_id);
        Ok(())
    }

    async fn send_message(&mut self, message: &Message) -> Result<(), HubError> {
        let client = self.connected_client()?;
        let topic = telemetry_topic(&self.identity.device_id, message)
            .map_err(|e| HubError::Transport(format!("cannot encode message properties: {e}")))?;

        debug!("publishing {} bytes to {topic}", message.body.len());
        client
            .publish(topic, QoS::AtLeastOnce, false, message.body.clone())
            .await?;
        Ok(())
    }

    async fn get_twin(&mut self) -> Result<TwinSnapshot, HubError> {
        let reply = self.twin_request(twin_get_topic, Vec::new()).await?;
        Ok(serde_json::from_slice(&reply.payload)?)
    }

    async fn patch_reported_properties(&mut self, patch: &Value) -> Result<(), HubError> {
        let payload = serde_json::to_vec(patch)?;
        let reply = self
            .twin_request(twin_patch_reported_topic, payload)
            .await?;
        debug!(
            "reported properties accepted, version {:?}",
            reply.topic.version
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), HubError> {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(client) = self.client.take() {
            if was_connected {
                if let Err(e) = client.disconnect().await {
                    debug!("disconnect request not delivered: {e}");
                }
            }
        }
        if !was_connected {
            // Nothing to say goodbye to; stop a connect that may still be in flight.
            self.stop_signal.cancel();
        }

        if let Some(mut task) = self.connection_task.take() {
            let stopped = tokio::time::timeout(DISCONNECT_GRACE, &mut task).await;
            if stopped.is_err() {
                warn!("event loop did not stop within {DISCONNECT_GRACE:?}, cancelling it");
                self.stop_signal.cancel();
                let _ = task.await;
            }
            info!("IotHub client disconnected");
        }

        self.stop_signal.cancel();
        Ok(())
    }
}

impl Drop for AzureIotHub {
    fn drop(&mut self) {
        self.stop_signal.cancel();
    }
}

struct EventLoopContext {
    stop_signal: CancellationToken,
    connected: Arc<AtomicBool>,
    pending: PendingRequests,
    connack: Option<oneshot::Sender<Result<(), HubError>>>,
}

impl EventLoopContext {
    fn resolve_connect(&mut self, result: Result<(), HubError>) -> bool {
        match self.connack.take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn route(&self, publish: Publish) {
        if let Some(topic) = TwinResponseTopic::parse(&publish.topic) {
            let waiter = lock(&self.pending).remove(&topic.request_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(TwinReply {
                        topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                None => debug!("twin response for unknown request {}", topic.request_id),
            }
        } else if let Some(version) = parse_desired_properties_version(&publish.topic) {
            match serde_json::from_slice::<Value>(&publish.payload) {
                Ok(delta) => info!("new desired properties received (version {version}): {delta}"),
                Err(e) => warn!("malformed desired properties update: {e}"),
            }
        } else {
            debug!("ignoring publish on {}", publish.topic);
        }
    }
}

fn token_expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, HubError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| HubError::InvalidKey(format!("token lifetime {ttl:?} is out of range")))
}

fn connect_error(error: ConnectionError) -> HubError {
    match error {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => HubError::Authentication(format!("{code:?}")),
        other => HubError::Connection(other.to_string()),
    }
}

async fn run_event_loop(mut eventloop: EventLoop, mut context: EventLoopContext) {
    for i in 0u64.. {
        let notification = tokio::select! {
            _ = context.stop_signal.cancelled() => break,
            notification = eventloop.poll() => notification,
        };

        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("{i}. ConnAck = {ack:?}");
                context.connected.store(true, Ordering::Release);
                context.resolve_connect(Ok(()));
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("{i}. Publish on {}", publish.topic);
                context.route(publish);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("{i}. Disconnect sent");
                break;
            }
            Ok(event) => {
                debug!("{i}. Notification = {event:?}");
            }
            Err(error) => {
                debug!("{i}. Notification = {error:?}");
                let was_connected = context.connected.swap(false, Ordering::AcqRel);
                if !context.resolve_connect(Err(connect_error(error))) && was_connected {
                    error!("connection to IoT Hub lost");
                }
                break;
            }
        }
    }

    context.connected.store(false, Ordering::Release);
    // Wakes every waiting twin request with a closed channel.
    lock(&context.pending).clear();
}
