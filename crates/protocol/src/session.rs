//! The session contract: one peer conversation, owned by the protocol layer.

use downcast_rs::{DowncastSync, impl_downcast};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors reported by a session collaborator.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// An inbound line could not be parsed as a protocol message.
    #[error("failed to parse line: {0}")]
    Parse(String),

    /// The remote peer reported a protocol-level fault.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// The session was used after it ended.
    #[error("session closed")]
    Closed,
}

/// Opaque object exposed by a session: its local handler surface or its
/// remote-method proxy.
///
/// The supervisor never inspects these. Middleware and ready callbacks
/// downcast to the protocol implementation's concrete types.
pub trait HandlerObject: DowncastSync {}
impl_downcast!(sync HandlerObject);

/// Typed events a session emits while a connection is live.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An outgoing request payload to serialize and write to the stream.
    Request(Value),
    /// The remote proxy was populated or updated.
    Remote,
    /// The session hit a protocol-level fault.
    Error(SessionError),
    /// The session ended the conversation.
    End,
}

/// One RPC conversation's local/remote handler pairing.
///
/// A fresh session is created per connection attempt, including each
/// reconnect attempt; the supervisor drops its reference when the stream
/// ends or the connection is explicitly closed.
pub trait Session: Send + Sync {
    /// Identifier unique within one facade instance.
    fn id(&self) -> &str;

    /// Begins the handshake. Called once, after middleware has run.
    fn start(&self);

    /// Feeds one framed line, in arrival order.
    fn parse(&self, line: &str) -> Result<()>;

    /// Takes the session's event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;

    /// The local handler object exposed to the peer.
    fn local(&self) -> Arc<dyn HandlerObject>;

    /// The proxy for the peer's remote methods.
    fn remote(&self) -> Arc<dyn HandlerObject>;
}

/// Creates sessions on behalf of the supervisor.
pub trait SessionFactory: Send + Sync {
    /// Creates a new session for one connection attempt.
    fn create(&self) -> Result<Arc<dyn Session>>;
}
