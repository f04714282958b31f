//! Broker session wrapper.
//!
//! [`BrokerClient`] owns one session against a broker: the transport handle,
//! the event pump that applies session events to shared state, and the
//! accumulated inbound payloads. Connecting is split in two — `connect()`
//! returns as soon as the session is dialed, and callers poll
//! [`BrokerClient::is_connected`] with
//! [`wait_until`](crate::util::wait::wait_until) to observe the handshake.

pub mod transport;

use crate::config::BrokerConfig;
use crate::core::error::ProbeError;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use self::transport::{Dial, SessionEvent, Transport};

/// Handler invoked with topic and decoded payload for each inbound message.
pub type MessageHandler = Box<dyn Fn(&str, &str) + Send + Sync>;

/// State shared between the pump task and the caller's thread. The pump is
/// the only writer of `messages`; `connected` flips on handshake results and
/// disconnects.
#[derive(Default)]
struct SessionState {
    connected: AtomicBool,
    messages: Mutex<Vec<String>>,
    handler: Mutex<Option<MessageHandler>>,
}

pub struct BrokerClient {
    config: BrokerConfig,
    dialer: Box<dyn Dial>,
    state: Arc<SessionState>,
    transport: Option<Box<dyn Transport>>,
    events: Option<flume::Receiver<SessionEvent>>,
    pump: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl BrokerClient {
    pub fn new(config: BrokerConfig, dialer: Box<dyn Dial>) -> Self {
        Self {
            config,
            dialer,
            state: Arc::new(SessionState::default()),
            transport: None,
            events: None,
            pump: None,
        }
    }

    /// Dials the broker and starts the event pump. No-op when already
    /// connected. Returns without waiting for the handshake; poll
    /// [`BrokerClient::is_connected`].
    pub fn connect(&mut self) -> Result<(), ProbeError> {
        if self.is_connected() {
            return Ok(());
        }

        let client_id = format!("client-{}", rand::thread_rng().gen_range(0..10_000));
        let session = self.dialer.dial(&self.config, &client_id)?;
        self.transport = Some(session.transport);
        self.events = Some(session.events);
        self.start();

        info!(
            broker = %self.config.broker,
            port = self.config.port,
            %client_id,
            "connecting to broker"
        );
        Ok(())
    }

    /// Stops the pump and closes the transport. Errors if `connect()` was
    /// never called.
    pub fn disconnect(&mut self) -> Result<(), ProbeError> {
        let Some(transport) = self.transport.take() else {
            error!("have not connected to a broker");
            return Err(ProbeError::NotConnected);
        };

        self.stop();
        transport.disconnect()?;
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Publishes with a bounded number of attempts and no backoff between
    /// them. Delivery knobs are fixed by the transport.
    pub fn publish(&mut self, topic: &str, msg: &str, retry_count: u32) -> Result<(), ProbeError> {
        if !self.is_connected() {
            error!("have not connected to a broker");
            return Err(ProbeError::NotConnected);
        }
        self.start();

        let transport = self.transport.as_ref().ok_or(ProbeError::NotConnected)?;
        let mut attempts = 0;
        while attempts < retry_count {
            attempts += 1;
            match transport.publish(topic, msg.as_bytes()) {
                Ok(()) => {
                    info!("Sent `{msg}` to topic `{topic}`");
                    return Ok(());
                }
                Err(err) => {
                    warn!("failed to send to topic `{topic}` (attempt {attempts}): {err}");
                }
            }
        }

        Err(ProbeError::PublishRejected {
            topic: topic.to_string(),
            attempts,
        })
    }

    /// Subscribes with the default handler, which decodes each payload as
    /// text and records it. Waiting for traffic is the caller's job via
    /// [`wait_until`](crate::util::wait::wait_until).
    pub fn subscribe(&mut self, topic: &str) -> Result<(), ProbeError> {
        self.subscribe_inner(topic, None)
    }

    /// Subscribes with a caller-supplied handler in place of the recording
    /// default.
    pub fn subscribe_with(
        &mut self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<(), ProbeError> {
        self.subscribe_inner(topic, Some(handler))
    }

    fn subscribe_inner(
        &mut self,
        topic: &str,
        handler: Option<MessageHandler>,
    ) -> Result<(), ProbeError> {
        if !self.is_connected() {
            error!("have not connected to a broker");
            return Err(ProbeError::NotConnected);
        }
        self.start();

        let transport = self.transport.as_ref().ok_or(ProbeError::NotConnected)?;
        transport.subscribe(topic)?;
        *self.state.handler.lock() = handler;
        info!("subscribed to topic `{topic}`");
        Ok(())
    }

    pub fn clear_messages(&self) {
        self.state.messages.lock().clear();
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().clone()
    }

    pub fn message_count(&self) -> usize {
        self.state.messages.lock().len()
    }

    /// Spawns the event pump. Idempotent.
    fn start(&mut self) {
        if self.pump.is_some() {
            return;
        }
        let Some(events) = self.events.take() else {
            return;
        };

        let state = Arc::clone(&self.state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(pump_events(events, state, shutdown_rx));
        self.pump = Some((shutdown_tx, handle));
    }

    fn stop(&mut self) {
        if let Some((shutdown_tx, _handle)) = self.pump.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Applies session events to shared state until shutdown is signalled or the
/// I/O task drops its sender.
async fn pump_events(
    events: flume::Receiver<SessionEvent>,
    state: Arc<SessionState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv_async() => {
                let Ok(event) = event else { break };
                match event {
                    SessionEvent::ConnAck { code: 0 } => {
                        // Repeated success acks must not re-log.
                        if !state.connected.swap(true, Ordering::SeqCst) {
                            info!("Connected to MQTT broker");
                        }
                    }
                    SessionEvent::ConnAck { code } => {
                        error!("Failed to connect, return_code={code}");
                        state.connected.store(false, Ordering::SeqCst);
                    }
                    SessionEvent::Message { topic, payload } => {
                        let text = String::from_utf8_lossy(&payload).into_owned();
                        let handler = state.handler.lock();
                        match &*handler {
                            Some(callback) => callback(&topic, &text),
                            None => {
                                let mut messages = state.messages.lock();
                                messages.push(text.clone());
                                debug!(
                                    "Received `{text}` from `{topic}` topic, count={}",
                                    messages.len()
                                );
                            }
                        }
                    }
                    SessionEvent::Disconnected { reason } => {
                        warn!("session ended: {reason}");
                        state.connected.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
    }
}
