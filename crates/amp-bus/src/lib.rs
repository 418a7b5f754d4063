//! Resilient MQTT client used to deliver amplifier commands.
//!
//! [`BusClient::connect`] establishes one broker connection and hands back a
//! [`BusHandle`]; a background thread keeps the connection alive, reconnects
//! after drops and keeps the configured topic subscribed.

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod shutdown;

pub use client::{BusClient, BusHandle};
pub use config::{BusConfig, Credentials};
pub use error::{ConnectError, PublishError};
pub use session::{ConnectionState, InboundMessage};
pub use shutdown::ShutdownSignal;
