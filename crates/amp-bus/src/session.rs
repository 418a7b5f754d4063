//! Connection state machine for the bus client.
//!
//! Pure decision logic: the I/O loop in [`crate::client`] translates transport
//! events into [`TransportEvent`]s and executes the returned [`SessionAction`].

use std::time::Duration;

const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Connection lifecycle as seen by the bus client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Transport-level happenings relevant to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted the connection.
    ConnAck,
    /// Publish received on a subscribed topic.
    Message(InboundMessage),
    /// Connection dropped or the connect attempt failed.
    Lost(String),
    /// Anything else (pings, acks, outgoing packets).
    Other,
}

/// What the I/O loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Subscribe to the topic filter.
    Subscribe(String),
    /// Hand the message to the inbound handler.
    Deliver(InboundMessage),
    /// Wait `delay`, then poll the transport again to reconnect.
    Reconnect { delay: Duration },
    /// The first connect attempt failed; give up.
    Fail(String),
    Idle,
}

/// Exponential reconnect delay, doubling from `min` up to `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl ReconnectBackoff {
    /// `min` is floored at 1 ms so the doubling always makes progress.
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_RECONNECT_DELAY);
        let max = max.max(min);
        Self { min, max, next: min }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Session bookkeeping for one logical bus connection.
#[derive(Debug)]
pub struct BusSession {
    state: ConnectionState,
    topic_filter: String,
    backoff: ReconnectBackoff,
    ever_connected: bool,
}

impl BusSession {
    pub fn new(topic_filter: impl Into<String>, backoff: ReconnectBackoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            topic_filter: topic_filter.into(),
            backoff,
            ever_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    /// Mark a connect (or reconnect) attempt as in flight.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_event(&mut self, event: TransportEvent) -> SessionAction {
        match event {
            TransportEvent::ConnAck => {
                self.state = ConnectionState::Connected;
                self.ever_connected = true;
                self.backoff.reset();
                // Clean sessions drop subscriptions, so every CONNACK resubscribes.
                if self.topic_filter.is_empty() {
                    SessionAction::Idle
                } else {
                    SessionAction::Subscribe(self.topic_filter.clone())
                }
            }
            TransportEvent::Message(msg) => SessionAction::Deliver(msg),
            TransportEvent::Lost(reason) => {
                self.state = ConnectionState::Disconnected;
                if self.ever_connected {
                    SessionAction::Reconnect {
                        delay: self.backoff.next_delay(),
                    }
                } else {
                    SessionAction::Fail(reason)
                }
            }
            TransportEvent::Other => SessionAction::Idle,
        }
    }
}
