use std::time::Duration;

/// Broker credentials. Opaque to the client; passed through as-is.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection parameters for [`crate::BusClient::connect`].
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Broker host name or IP.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    pub credentials: Option<Credentials>,
    /// Topic filter subscribed after every successful connect.
    pub subscribe_topic: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Capacity of the outgoing request queue.
    pub request_capacity: usize,
    /// First delay after a lost connection.
    pub reconnect_min: Duration,
    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,
}

impl BusConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            subscribe_topic: String::new(),
            keep_alive: Duration::from_secs(30),
            request_capacity: 16,
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}
