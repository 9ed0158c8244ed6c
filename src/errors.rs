//! Error types for the voicelink session client.

use thiserror::Error;

/// Errors that can occur while establishing or operating a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid session configuration. Fatal; raised before any network
    /// activity and never retried.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The ephemeral credential could not be minted.
    #[error("Credential issuance failed: {0}")]
    TokenIssuance(String),

    /// The SDP offer/answer exchange with the provider failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Local audio capture could not be acquired.
    #[error("Media capture unavailable: {0}")]
    Media(String),

    /// Peer connection or control channel failure.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The control channel is not open.
    #[error("Control channel not open")]
    ChannelNotOpen,

    /// A frame could not be serialized or sent.
    #[error("Send failed: {0}")]
    Send(String),

    /// A bounded wait for an acknowledgement frame elapsed.
    #[error("Acknowledgement timed out: {0}")]
    AckTimeout(String),

    /// An operation exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::Configuration("instructions are required".to_string());
        assert!(err.to_string().contains("Invalid configuration"));

        let err = SessionError::ChannelNotOpen;
        assert_eq!(err.to_string(), "Control channel not open");

        let err = SessionError::AckTimeout("session.updated".to_string());
        assert!(err.to_string().contains("session.updated"));
    }
}
