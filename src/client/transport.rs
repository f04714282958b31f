//! Seam between [`BrokerClient`](crate::client::BrokerClient) and the wire.
//!
//! The I/O side of a session is a background task that translates transport
//! activity into [`SessionEvent`]s on a channel; the command side is the
//! non-blocking [`Transport`] object. Tests substitute both with scripted
//! stand-ins through [`Dial`].

use crate::config::BrokerConfig;
use crate::core::error::ProbeError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::time::Duration;
use tracing::{debug, error};

/// Events the background I/O task reports to the session pump.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Broker handshake completed with the given return code (0 = accepted).
    ConnAck { code: u8 },
    /// Inbound publish on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// The network loop ended.
    Disconnected { reason: String },
}

/// Non-blocking operations a live session supports.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProbeError>;
    fn subscribe(&self, topic: &str) -> Result<(), ProbeError>;
    fn disconnect(&self) -> Result<(), ProbeError>;
}

/// An opened session: the command side plus the event stream feeding the
/// pump.
pub struct Session {
    pub transport: Box<dyn Transport>,
    pub events: flume::Receiver<SessionEvent>,
}

/// Opens sessions against a broker. The CLI uses [`MqttDialer`]; tests plug
/// in scripted dialers.
pub trait Dial: Send + Sync {
    fn dial(&self, config: &BrokerConfig, client_id: &str) -> Result<Session, ProbeError>;
}

// Delivery knobs are fixed: publishes go out at-least-once with the retain
// flag set, subscriptions are at-most-once.
const PUBLISH_QOS: rumqttc::QoS = rumqttc::QoS::AtLeastOnce;
const PUBLISH_RETAIN: bool = true;
const SUBSCRIBE_QOS: rumqttc::QoS = rumqttc::QoS::AtMostOnce;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CHANNEL_CAPACITY: usize = 100;

/// Dials real MQTT sessions. Must be called from within a tokio runtime, as
/// it spawns the network loop.
pub struct MqttDialer;

impl Dial for MqttDialer {
    fn dial(&self, config: &BrokerConfig, client_id: &str) -> Result<Session, ProbeError> {
        let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_credentials(config.username.clone(), config.password.clone());

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let (event_tx, event_rx) = flume::bounded(CHANNEL_CAPACITY);
        tokio::spawn(run_event_loop(event_loop, event_tx));

        Ok(Session {
            transport: Box::new(MqttTransport { client }),
            events: event_rx,
        })
    }
}

struct MqttTransport {
    client: AsyncClient,
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProbeError> {
        self.client
            .try_publish(topic, PUBLISH_QOS, PUBLISH_RETAIN, payload.to_vec())
            .map_err(|e| ProbeError::Transport(e.to_string()))
    }

    fn subscribe(&self, topic: &str) -> Result<(), ProbeError> {
        self.client
            .try_subscribe(topic, SUBSCRIBE_QOS)
            .map_err(|e| ProbeError::Transport(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), ProbeError> {
        self.client
            .try_disconnect()
            .map_err(|e| ProbeError::Transport(e.to_string()))
    }
}

/// Drives the rumqttc event loop until the connection ends, forwarding what
/// the session pump cares about. One-shot tool: the first connection error
/// ends the session instead of reconnecting.
async fn run_event_loop(mut event_loop: EventLoop, events: flume::Sender<SessionEvent>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let event = SessionEvent::ConnAck {
                    code: ack.code as u8,
                };
                if events.send_async(event).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "inbound publish");
                let event = SessionEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if events.send_async(event).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = events
                    .send_async(SessionEvent::Disconnected {
                        reason: "broker closed the session".to_string(),
                    })
                    .await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt event loop error: {e}");
                let _ = events
                    .send_async(SessionEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
}
