//! Error types for the switchboard runtime.

use parking_lot::Mutex;
use std::sync::Arc;
use switchboard_protocol::SessionError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising connections.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer refused the connection. Outbound only; the reconnect policy
    /// applies to this error and to no other.
    #[error("connection refused: {addr}")]
    Refused { addr: String },

    /// Any other stream-level fault. Surfaced, never retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection options could not be resolved to a usable transport.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fault reported by the session collaborator.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while framing an outgoing request.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal channel closed unexpectedly.
    #[error("channel closed unexpectedly")]
    ChannelClosed,
}

impl Error {
    /// Returns true if this is a connection-refused error.
    pub fn is_refused(&self) -> bool {
        matches!(self, Error::Refused { .. })
    }

    /// Maps an I/O error from a dial attempt, folding refusals into
    /// [`Error::Refused`] so the reconnect policy can recognize them.
    pub(crate) fn from_dial(err: std::io::Error, addr: &str) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            Error::Refused {
                addr: addr.to_string(),
            }
        } else {
            Error::Io(err)
        }
    }
}

/// Caller-registered observer for session-level errors.
///
/// Invoked with the session identifier and the error.
pub type SessionErrorHandler = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Shared slot holding the caller's error observer, if any.
///
/// Observer presence is checked at delivery time: with an observer
/// registered the caller is fully responsible; without one the error is
/// logged to the operator-facing error stream and swallowed, so an
/// unobserved session error never takes down the host process.
#[derive(Clone, Default)]
pub struct ErrorSlot {
    handler: Arc<Mutex<Option<SessionErrorHandler>>>,
}

impl ErrorSlot {
    /// Installs the caller's observer, replacing any previous one.
    pub fn install(&self, handler: SessionErrorHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Delivers `err` for `session` to the observer, or logs and swallows.
    pub fn report(&self, session: &str, err: Error) {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(session, &err),
            None => tracing::error!(session, error = %err, "unhandled session error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn refused_is_recognized() {
        let err = Error::from_dial(
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            "127.0.0.1:1",
        );
        assert!(err.is_refused());

        let err = Error::from_dial(
            std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            "127.0.0.1:1",
        );
        assert!(!err.is_refused());
    }

    #[test]
    fn slot_prefers_installed_observer() {
        let slot = ErrorSlot::default();
        let seen = Arc::new(AtomicUsize::new(0));

        // No observer yet: report must not panic (logged and swallowed).
        slot.report("session@0", Error::ChannelClosed);

        let counted = seen.clone();
        slot.install(Arc::new(move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        slot.report("session@0", Error::ChannelClosed);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
