//! Chat controller error types.
//!
//! Error types map to wire-level `code` values for client error acks.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Chat controller error type.
///
/// Maps to wire `code` values in error ack frames:
/// - `StoreUnavailable`: `STORE_UNAVAILABLE` (1)
/// - `InvalidTransition`: `INVALID_TRANSITION` (2)
/// - `DuplicateInvite`: `DUPLICATE_INVITE` (3)
/// - `RoomNotFound`, `CallNotFound`: `NOT_FOUND` (4)
/// - `Draining`: `UNAVAILABLE` (5)
/// - Index, Delivery, Config, Internal: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum ChatError {
    /// Persistence layer is down. Sender-visible: the message was not
    /// delivered to anyone and the client may retry.
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    /// Search backend operation failed. Never blocks live delivery.
    #[error("Search index error: {0}")]
    Index(String),

    /// Per-connection push error. Isolated to the failing connection,
    /// never surfaced to the sender.
    #[error("Delivery failure: {0}")]
    Delivery(String),

    /// Signaling event arrived for a call session in an incompatible state.
    #[error("Invalid call transition: {0}")]
    InvalidTransition(String),

    /// An invite arrived while a ringing or active call already exists
    /// for the same peer pair.
    #[error("Call already in progress for this peer pair")]
    DuplicateInvite,

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Call session not found.
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// Message not found (or not owned by the requester).
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Service is draining (graceful shutdown).
    #[error("Service is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Returns the wire `code` value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            ChatError::StoreUnavailable(_) => 1,
            ChatError::InvalidTransition(_) => 2,
            ChatError::DuplicateInvite => 3,
            ChatError::RoomNotFound(_)
            | ChatError::CallNotFound(_)
            | ChatError::MessageNotFound(_) => 4,
            ChatError::Draining => 5,
            ChatError::Index(_)
            | ChatError::Delivery(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => 6,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ChatError::StoreUnavailable(_) => {
                "Message could not be saved, please retry".to_string()
            }
            ChatError::InvalidTransition(msg) => msg.clone(),
            ChatError::DuplicateInvite => "Call already in progress".to_string(),
            ChatError::RoomNotFound(_) => "Room not found".to_string(),
            ChatError::CallNotFound(_) => "Call not found".to_string(),
            ChatError::MessageNotFound(_) => "Message not found".to_string(),
            ChatError::Draining => "Server is shutting down, please reconnect".to_string(),
            ChatError::Index(_)
            | ChatError::Delivery(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the sender should receive an explicit failure ack.
    ///
    /// Per the propagation policy, only store, transition, and duplicate
    /// invite errors are sender-visible; delivery-layer errors are not.
    #[must_use]
    pub fn is_sender_visible(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_)
                | ChatError::InvalidTransition(_)
                | ChatError::DuplicateInvite
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ChatError::StoreUnavailable("db down".to_string()).error_code(),
            1
        );
        assert_eq!(
            ChatError::InvalidTransition("not ringing".to_string()).error_code(),
            2
        );
        assert_eq!(ChatError::DuplicateInvite.error_code(), 3);
        assert_eq!(
            ChatError::RoomNotFound("room-1".to_string()).error_code(),
            4
        );
        assert_eq!(
            ChatError::CallNotFound("call-1".to_string()).error_code(),
            4
        );
        assert_eq!(ChatError::Draining.error_code(), 5);
        assert_eq!(ChatError::Index("search down".to_string()).error_code(), 6);
        assert_eq!(
            ChatError::Delivery("socket write".to_string()).error_code(),
            6
        );
        assert_eq!(ChatError::Internal("bug".to_string()).error_code(), 6);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = ChatError::StoreUnavailable("pg at 192.168.1.100:5432 refused".to_string());
        assert!(!store_err.client_message().contains("192.168"));

        let index_err = ChatError::Index("bulk to http://search:9200 timed out".to_string());
        assert!(!index_err.client_message().contains("9200"));
        assert_eq!(index_err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_sender_visibility() {
        assert!(ChatError::StoreUnavailable("down".to_string()).is_sender_visible());
        assert!(ChatError::InvalidTransition("late accept".to_string()).is_sender_visible());
        assert!(ChatError::DuplicateInvite.is_sender_visible());

        // Delivery and index errors never reach the sender
        assert!(!ChatError::Delivery("overflow".to_string()).is_sender_visible());
        assert!(!ChatError::Index("down".to_string()).is_sender_visible());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ChatError::StoreUnavailable("timeout".to_string())),
            "Message store unavailable: timeout"
        );
        assert_eq!(
            format!("{}", ChatError::DuplicateInvite),
            "Call already in progress for this peer pair"
        );
    }
}
