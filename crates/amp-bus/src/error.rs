use thiserror::Error;

/// Failure to establish the initial broker connection. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Options rejected before any I/O happened.
    #[error("invalid bus config: {0}")]
    InvalidConfig(String),
    /// Broker answered CONNACK with a non-success code.
    #[error("broker refused connection: {0}")]
    Refused(String),
    /// Network or protocol failure during the connect attempt.
    #[error("broker connection failed: {0}")]
    Transport(String),
}

/// Failure to hand a message to the transport. Non-fatal; never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The session is not currently connected.
    #[error("bus not connected")]
    NotConnected,
    /// The request queue rejected the message.
    #[error("publish failed: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_cause() {
        let err = ConnectError::Refused("BadUserNamePassword".to_string());
        assert_eq!(
            err.to_string(),
            "broker refused connection: BadUserNamePassword"
        );
        assert_eq!(PublishError::NotConnected.to_string(), "bus not connected");
    }

    #[test]
    fn connect_error_boxes_as_std_error() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(ConnectError::Transport("reset".to_string()));
        assert_eq!(boxed.to_string(), "broker connection failed: reset");
    }
}
