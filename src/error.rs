//! Error types for the match client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::rules::RejectReason;
use crate::session::SessionPhase;
use crate::state::StateError;

/// Errors that can occur while running a match session.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize an outgoing message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame is not a valid protocol message.
    #[error("malformed response: {source} (raw: {raw})")]
    MalformedResponse {
        /// The frame as received.
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// An inbound frame carries a state that breaks the match invariants.
    #[error("invalid match state: {source} (raw: {raw})")]
    InvalidState {
        /// The frame as received.
        raw: String,
        #[source]
        source: StateError,
    },

    /// An inbound frame is valid but not what the exchange expects.
    #[error("unexpected message: {raw}")]
    UnexpectedMessage {
        /// The frame as received.
        raw: String,
    },

    /// An authoritative event contradicts the local state.
    #[error("authority event cannot be applied: {0}")]
    InvalidEvent(RejectReason),

    /// The authority refused an action. The prediction was rolled back.
    #[error("action rejected by authority: {}", reason.as_deref().unwrap_or("no reason given"))]
    ActionRejected {
        /// Structured code, if the authority sent one.
        code: Option<ErrorCode>,
        /// Human-readable reason, if the authority sent one.
        reason: Option<String>,
    },

    /// The authority reported an error.
    #[error("server error: {message}")]
    ServerError {
        /// Human-readable error message from the authority.
        message: String,
        /// Structured error code, if provided.
        error_code: Option<ErrorCode>,
    },

    /// The operation requires a different session phase.
    #[error("operation not valid while session is {0:?}")]
    WrongPhase(SessionPhase),

    /// The session has been torn down.
    #[error("session terminated")]
    Terminated,

    /// The session's cancellation scope was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// The authority did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// A startup side-load failed.
    #[error("side-load failed: {0}")]
    SideLoad(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatchError {
    /// Returns `true` if the session stays usable after this error.
    ///
    /// Recoverable errors abort a single action and restore the state that
    /// preceded it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::MalformedResponse { .. }
                | Self::InvalidState { .. }
                | Self::UnexpectedMessage { .. }
                | Self::ActionRejected { .. }
                | Self::ServerError { .. }
                | Self::Timeout
        )
    }

    /// Returns `true` for the normal exit path of a torn-down session.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Terminated)
    }
}

/// A specialized [`Result`] type for match client operations.
pub type Result<T> = std::result::Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_recoverable() {
        let err = MatchError::ActionRejected {
            code: Some(ErrorCode::NotYourTurn),
            reason: Some("wait".into()),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_cancellation());
        assert_eq!(err.to_string(), "action rejected by authority: wait");
    }

    #[test]
    fn cancellation_is_not_recoverable() {
        assert!(MatchError::Cancelled.is_cancellation());
        assert!(!MatchError::Cancelled.is_recoverable());
        assert!(!MatchError::Terminated.is_recoverable());
    }

    #[test]
    fn wrong_phase_names_the_phase() {
        let err = MatchError::WrongPhase(SessionPhase::Uninitialized);
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "operation not valid while session is Uninitialized"
        );
    }
}
