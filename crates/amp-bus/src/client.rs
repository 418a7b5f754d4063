//! MQTT bus client.
//!
//! One persistent broker connection driven by a background thread. The thread
//! feeds transport events through [`BusSession`] and carries out its actions:
//! resubscribe after every CONNACK, back off and reconnect after a drop, and
//! dispatch inbound publishes to the registered handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Packet, QoS};

use crate::config::BusConfig;
use crate::error::{ConnectError, PublishError};
use crate::session::{
    BusSession, ConnectionState, InboundMessage, ReconnectBackoff, SessionAction, TransportEvent,
};
use crate::shutdown::ShutdownSignal;

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// State shared between [`BusHandle`] clones and the event loop thread.
struct Shared {
    state: Mutex<ConnectionState>,
    handler: Mutex<MessageHandler>,
    closing: ShutdownSignal,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            handler: Mutex::new(Arc::new(noop_handler)),
            closing: ShutdownSignal::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut g) = self.state.lock() {
            *g = state;
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|g| *g)
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn set_handler(&self, handler: MessageHandler) {
        if let Ok(mut g) = self.handler.lock() {
            *g = handler;
        }
    }

    /// The lock is released before the handler runs, so a handler may
    /// replace itself through [`BusHandle::on_message`].
    fn deliver(&self, msg: &InboundMessage) {
        let handler = match self.handler.lock() {
            Ok(g) => g.clone(),
            Err(_) => return,
        };
        handler(msg);
    }
}

fn noop_handler(msg: &InboundMessage) {
    tracing::debug!(
        topic = %msg.topic,
        bytes = msg.payload.len(),
        "bus: inbound message ignored"
    );
}

/// Entry point for establishing the bus connection.
pub struct BusClient;

impl BusClient {
    /// Connect to the broker and subscribe to `config.subscribe_topic`.
    ///
    /// Blocks until the first connect attempt finishes. The initial attempt is
    /// not retried; once connected, drops are recovered in the background.
    pub fn connect(config: &BusConfig) -> Result<BusHandle, ConnectError> {
        let options = mqtt_options(config)?;
        let (client, mut connection) = Client::new(options, config.request_capacity.max(1));
        let shared = Arc::new(Shared::new());
        let mut session = BusSession::new(
            config.subscribe_topic.clone(),
            ReconnectBackoff::new(config.reconnect_min, config.reconnect_max),
        );

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "bus: connecting"
        );
        session.begin_connect();
        shared.set_state(session.state());
        wait_for_first_connack(&client, &mut connection, &mut session, &shared)?;
        tracing::info!(
            host = %config.host,
            topic = %session.topic_filter(),
            "bus: connected"
        );

        let join = {
            let client = client.clone();
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("amp-bus".to_string())
                .spawn(move || run_event_loop(client, connection, session, shared))
                .map_err(|e| ConnectError::Transport(format!("spawn event loop: {e}")))?
        };

        Ok(BusHandle {
            client,
            shared,
            join: Arc::new(Mutex::new(Some(join))),
        })
    }
}

/// Owned handle to a connected bus client. Cheap to clone.
#[derive(Clone)]
pub struct BusHandle {
    client: Client,
    shared: Arc<Shared>,
    join: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
}

impl BusHandle {
    /// Publish with QoS 0 ("at most once"), not retained.
    ///
    /// Fails fast while disconnected; nothing is queued for later delivery.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), PublishError> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.into())
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    /// Replace the inbound message handler.
    ///
    /// The handler runs on the bus thread and must not block. It may call
    /// `on_message` itself; the swap applies from the next message on.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.set_handler(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Disconnect from the broker and stop the event loop thread.
    pub fn shutdown(&self) {
        if self.shared.closing.is_triggered() {
            return;
        }
        self.shared.closing.trigger();
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "bus: disconnect request failed");
        }
        let join = self.join.lock().ok().and_then(|mut g| g.take());
        if let Some(join) = join {
            if join.join().is_err() {
                tracing::warn!("bus: event loop thread panicked");
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("bus: shut down");
    }
}

fn mqtt_options(config: &BusConfig) -> Result<MqttOptions, ConnectError> {
    let client_id = config.client_id.trim();
    if client_id.is_empty() || client_id != config.client_id {
        return Err(ConnectError::InvalidConfig(format!(
            "client id {:?} must be non-empty without surrounding whitespace",
            config.client_id
        )));
    }
    if config.host.trim().is_empty() {
        return Err(ConnectError::InvalidConfig("broker host is empty".to_string()));
    }
    let mut options = MqttOptions::new(client_id, config.host.trim(), config.port);
    options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);
    if let Some(creds) = config.credentials.as_ref() {
        options.set_credentials(creds.username.clone(), creds.password.clone());
    }
    Ok(options)
}

fn wait_for_first_connack(
    client: &Client,
    connection: &mut Connection,
    session: &mut BusSession,
    shared: &Shared,
) -> Result<(), ConnectError> {
    for notification in connection.iter() {
        if let Err(ConnectionError::ConnectionRefused(code)) = &notification {
            return Err(ConnectError::Refused(format!("{code:?}")));
        }
        match step(session, shared, translate(notification), &mut |topic: &str| {
            subscribe(client, topic)
        }) {
            SessionAction::Subscribe(_) | SessionAction::Idle
                if session.state() == ConnectionState::Connected =>
            {
                return Ok(());
            }
            SessionAction::Fail(reason) => return Err(ConnectError::Transport(reason)),
            _ => {}
        }
    }
    Err(ConnectError::Transport(
        "event loop closed before connect".to_string(),
    ))
}

fn run_event_loop(
    client: Client,
    mut connection: Connection,
    mut session: BusSession,
    shared: Arc<Shared>,
) {
    for notification in connection.iter() {
        if shared.closing.is_triggered() {
            break;
        }
        match step(&mut session, &shared, translate(notification), &mut |topic: &str| {
            subscribe(&client, topic)
        }) {
            SessionAction::Reconnect { delay } => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "bus: reconnecting");
                if shared.closing.wait_timeout(delay) {
                    break;
                }
                session.begin_connect();
                shared.set_state(session.state());
            }
            SessionAction::Fail(reason) => {
                tracing::warn!(reason = %reason, "bus: event loop failed");
                break;
            }
            _ => {}
        }
    }
    shared.set_state(ConnectionState::Disconnected);
    tracing::debug!("bus: event loop exited");
}

/// Feed one event through the session and carry out the immediate action.
///
/// Subscribe and deliver happen here; reconnect delays and failures are left
/// to the caller.
fn step(
    session: &mut BusSession,
    shared: &Shared,
    event: TransportEvent,
    subscriber: &mut dyn FnMut(&str),
) -> SessionAction {
    let was = session.state();
    let lost_reason = match &event {
        TransportEvent::Lost(reason) => Some(reason.clone()),
        _ => None,
    };
    let action = session.on_event(event);
    shared.set_state(session.state());

    if let Some(reason) = lost_reason {
        if was == ConnectionState::Connected {
            tracing::warn!(reason = %reason, "bus: connection lost");
        } else {
            tracing::debug!(reason = %reason, "bus: connect attempt failed");
        }
    }

    match &action {
        SessionAction::Subscribe(topic) => {
            if was != ConnectionState::Connected {
                tracing::info!("bus: session established");
            }
            subscriber(topic);
        }
        SessionAction::Deliver(msg) => shared.deliver(msg),
        _ => {}
    }
    action
}

fn subscribe(client: &Client, topic: &str) {
    match client.try_subscribe(topic, QoS::AtMostOnce) {
        Ok(()) => tracing::info!(topic = %topic, "bus: subscribed"),
        Err(e) => tracing::warn!(topic = %topic, error = %e, "bus: subscribe failed"),
    }
}

fn translate(notification: Result<Event, ConnectionError>) -> TransportEvent {
    match notification {
        Ok(Event::Incoming(Packet::ConnAck(_))) => TransportEvent::ConnAck,
        Ok(Event::Incoming(Packet::Publish(publish))) => {
            TransportEvent::Message(InboundMessage {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            })
        }
        Ok(_) => TransportEvent::Other,
        Err(e) => TransportEvent::Lost(e.to_string()),
    }
}
