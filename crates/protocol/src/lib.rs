//! Session collaborator interface for the switchboard supervisor.
//!
//! The supervisor in `switchboard-runtime` manages connection lifecycles but
//! never encodes, decodes, or dispatches RPC traffic itself. All of that
//! belongs to an external protocol implementation, consumed exclusively
//! through the narrow surface defined here:
//!
//! - [`SessionFactory`] creates one [`Session`] per connection attempt
//! - [`Session::parse`] receives each framed line as it arrives
//! - [`Session::take_events`] yields the session's typed event stream
//! - [`Session::start`] begins the handshake once the stream is up
//!
//! The session's local handler object and remote proxy object are opaque to
//! the supervisor; they are exposed as downcastable [`HandlerObject`]s so
//! middleware and ready callbacks can recover their concrete types.

pub mod session;
pub mod testing;

pub use session::{
    HandlerObject, Result, Session, SessionError, SessionEvent, SessionFactory,
};
