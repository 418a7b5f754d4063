//! Amplifier command transport abstraction.
//!
//! The controller talks to the amplifier through [`AmplifierTransport`]; the
//! production implementation publishes on the MQTT bus.

use amp_bus::{BusHandle, PublishError};

/// Power commands understood by the amplifier switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplifierCommand {
    PowerOn,
    PowerOff,
}

impl AmplifierCommand {
    /// Wire payload for the command topic.
    pub fn payload(self) -> &'static str {
        match self {
            AmplifierCommand::PowerOn => "powerOn",
            AmplifierCommand::PowerOff => "powerOff",
        }
    }
}

pub trait AmplifierTransport {
    fn send(&self, command: AmplifierCommand) -> Result<(), PublishError>;
}

/// Publishes commands on a fixed bus topic.
pub struct BusTransport {
    bus: BusHandle,
    topic: String,
}

impl BusTransport {
    pub fn new(bus: BusHandle, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl AmplifierTransport for BusTransport {
    fn send(&self, command: AmplifierCommand) -> Result<(), PublishError> {
        tracing::debug!(topic = %self.topic, payload = command.payload(), "publishing command");
        self.bus.publish(&self.topic, command.payload())
    }
}
