//! Switchboard Runtime - Connection lifecycle for line-framed RPC sessions
//!
//! This crate manages the connections a bidirectional RPC protocol layer
//! runs over, without interpreting the protocol itself:
//!
//! - **Facade**: One [`Switchboard`] owning middleware, registries, and the
//!   event stream
//! - **Outbound**: Connect with a fixed-interval reconnect state machine
//! - **Inbound**: TCP, web-server WebSocket mounts, and caller-supplied
//!   acceptors, with coordinated close
//! - **Transport**: Newline-delimited JSON framing over any duplex stream
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Switchboard │  connect / listen / end / close + events
//! └──────┬───────┘
//!        │ creates sessions via SessionFactory
//! ┌──────▼───────┐
//! │  supervisors │  reconnect machine (client) / accept loops (server)
//! │  ┌────────┐  │
//! │  │ bridge │  │  lines ⇄ session events, middleware, drop discipline
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ framer │  │  one JSON message per `\n`-terminated line
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! # Decoupling via SessionFactory
//!
//! Every connection asks a [`SessionFactory`] for a fresh protocol session
//! and drives it through the narrow [`Session`] trait, so this crate stays
//! independent of any particular RPC implementation.
//!
//! [`SessionFactory`]: switchboard_protocol::SessionFactory
//! [`Session`]: switchboard_protocol::Session

mod bridge;

pub mod connect;
pub mod error;
pub mod facade;
pub mod listen;
pub mod middleware;
pub mod options;
pub mod transport;

pub use connect::{ClientHandle, ClientEvent, ConnectState};
pub use error::{Error, ErrorSlot, Result, SessionErrorHandler};
pub use facade::{Switchboard, SwitchboardEvent};
pub use listen::ListenerId;
pub use middleware::{Middleware, MiddlewareStack};
pub use options::{
    ConnectOptions, ConnectTarget, DEFAULT_MOUNT, ListenOptions, ListenTarget, RemoteCallback,
    StreamAcceptor, StreamFactory,
};
pub use transport::{BoxedStream, DuplexStream, LineSink, LineSource, TransportParts};
