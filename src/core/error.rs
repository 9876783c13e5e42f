//! Error types shared by the session, codec and orchestrator layers.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used across the core modules.
pub type IronResult<T> = std::result::Result<T, IronError>;

/// Errors surfaced by the device session core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IronError {
    /// No active session, or characteristic discovery has not finished yet.
    #[error("not connected to an iron")]
    NotConnected,

    /// The connected device does not expose a characteristic the catalog expects.
    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("invalid value type: expected {expected}, got {actual}")]
    InvalidValueType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    /// Bulk telemetry buffer holds fewer than 14 complete words.
    #[error("telemetry payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },

    /// Settings value buffer is narrower than the field width.
    #[error("setting value too short: expected {expected} bytes, got {actual}")]
    ValueTooShort { expected: usize, actual: usize },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("request timed out for characteristic {0}")]
    Timeout(Uuid),

    #[error("bluetooth transport error: {0}")]
    Transport(String),

    /// The session task has shut down.
    #[error("session closed")]
    SessionClosed,
}

impl IronError {
    /// Wraps any displayable backend error as a transport error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(IronError::NotConnected.to_string(), "not connected to an iron");

        let err = IronError::PayloadTooShort {
            expected: 56,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "telemetry payload too short: expected 56 bytes, got 12"
        );

        let err = IronError::InvalidValueType {
            expected: "bool",
            actual: "decimal",
        };
        assert_eq!(err.to_string(), "invalid value type: expected bool, got decimal");

        let uuid = Uuid::from_u128(0xf6d70000_5a10_4eba_aa55_33e27f9bc533);
        assert_eq!(
            IronError::CharacteristicNotFound(uuid).to_string(),
            "characteristic not found: f6d70000-5a10-4eba-aa55-33e27f9bc533"
        );
    }

    #[test]
    fn test_backend_errors_wrap_as_transport() {
        let err = IronError::transport(std::io::Error::other("adapter powered off"));
        assert_eq!(err, IronError::Transport("adapter powered off".into()));
        assert_eq!(
            err.to_string(),
            "bluetooth transport error: adapter powered off"
        );
    }
}
