//! Normalized connection options.
//!
//! One immutable options record per `connect`/`listen` invocation. Transport
//! selection is an explicit tagged target rather than runtime shape
//! detection: the caller says whether it wants a fresh TCP dial/listener, a
//! web-server mount, or a stream it supplies itself.

use crate::transport::BoxedStream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::{HandlerObject, Session};
use tokio::net::TcpListener;

/// Default mount path for the web-server transport.
pub const DEFAULT_MOUNT: &str = "/dnode.js";

/// Future resolving to a freshly opened duplex stream.
pub type StreamFuture = Pin<Box<dyn Future<Output = std::io::Result<BoxedStream>> + Send>>;

/// Re-invocable factory producing one fresh stream per connection attempt.
///
/// Reconnects call the factory again rather than reusing a stream object
/// that already ended.
pub type StreamFactory = Arc<dyn Fn() -> StreamFuture + Send + Sync>;

/// Ready callback invoked each time a session's remote proxy is populated,
/// with `(local, remote, session)` in hand.
pub type RemoteCallback =
    Arc<dyn Fn(&Arc<dyn HandlerObject>, &Arc<dyn HandlerObject>, &Arc<dyn Session>) + Send + Sync>;

/// Caller-supplied acceptor of duplex streams, for listener transports the
/// runtime does not open itself.
pub trait StreamAcceptor: Send {
    /// Waits for and yields the next accepted stream.
    fn accept(&mut self) -> Pin<Box<dyn Future<Output = std::io::Result<BoxedStream>> + Send + '_>>;
}

/// Where an outbound connection gets its stream.
pub enum ConnectTarget {
    /// Dial `host:port` fresh on every attempt.
    Tcp { host: String, port: u16 },
    /// Invoke the factory on every attempt.
    Stream(StreamFactory),
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Tcp { host, port } => {
                f.debug_struct("Tcp").field("host", host).field("port", port).finish()
            }
            ConnectTarget::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Options for one outbound connection.
pub struct ConnectOptions {
    pub(crate) target: ConnectTarget,
    pub(crate) reconnect: Option<Duration>,
    pub(crate) on_remote: Option<RemoteCallback>,
}

impl ConnectOptions {
    /// Connects to a TCP peer.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            target: ConnectTarget::Tcp {
                host: host.into(),
                port,
            },
            reconnect: None,
            on_remote: None,
        }
    }

    /// Connects over streams produced by `factory`, one per attempt.
    pub fn stream<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::io::Result<BoxedStream>> + Send + 'static,
    {
        Self {
            target: ConnectTarget::Stream(Arc::new(move || Box::pin(factory()))),
            reconnect: None,
            on_remote: None,
        }
    }

    /// Enables the fixed-interval reconnect policy. A zero interval
    /// disables it, matching an absent option.
    pub fn reconnect(mut self, interval: Duration) -> Self {
        self.reconnect = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// Registers the ready callback invoked once the remote proxy becomes
    /// available (and again on each subsequent update).
    pub fn on_remote<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<dyn HandlerObject>, &Arc<dyn HandlerObject>, &Arc<dyn Session>)
            + Send
            + Sync
            + 'static,
    {
        self.on_remote = Some(Arc::new(callback));
        self
    }
}

/// Where a listener accepts its connections.
pub enum ListenTarget {
    /// Bind a fresh TCP listener to `host:port`.
    Tcp { host: String, port: u16 },
    /// Mount a WebSocket endpoint on an already-bound web-server listener;
    /// many logical connections share this one transport.
    WebServer { listener: TcpListener },
    /// Accept streams from a caller-supplied acceptor.
    Acceptor(Box<dyn StreamAcceptor>),
}

impl fmt::Debug for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenTarget::Tcp { host, port } => {
                f.debug_struct("Tcp").field("host", host).field("port", port).finish()
            }
            ListenTarget::WebServer { .. } => f.write_str("WebServer(..)"),
            ListenTarget::Acceptor(_) => f.write_str("Acceptor(..)"),
        }
    }
}

/// Options for one listener.
pub struct ListenOptions {
    pub(crate) target: Option<ListenTarget>,
    pub(crate) mount: String,
    pub(crate) on_remote: Option<RemoteCallback>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            target: None,
            mount: DEFAULT_MOUNT.to_string(),
            on_remote: None,
        }
    }
}

impl ListenOptions {
    /// Listens on a fresh TCP socket bound to `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            target: Some(ListenTarget::Tcp {
                host: host.into(),
                port,
            }),
            ..Self::default()
        }
    }

    /// Mounts on an already-bound web-server listener.
    pub fn web_server(listener: TcpListener) -> Self {
        Self {
            target: Some(ListenTarget::WebServer { listener }),
            ..Self::default()
        }
    }

    /// Accepts streams from a caller-supplied acceptor.
    pub fn acceptor(acceptor: impl StreamAcceptor + 'static) -> Self {
        Self {
            target: Some(ListenTarget::Acceptor(Box::new(acceptor))),
            ..Self::default()
        }
    }

    /// Overrides the web-server mount path (default [`DEFAULT_MOUNT`]).
    pub fn mount(mut self, path: impl Into<String>) -> Self {
        self.mount = path.into();
        self
    }

    /// Registers the ready callback, as for [`ConnectOptions::on_remote`].
    pub fn on_remote<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<dyn HandlerObject>, &Arc<dyn HandlerObject>, &Arc<dyn Session>)
            + Send
            + Sync
            + 'static,
    {
        self.on_remote = Some(Arc::new(callback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_reconnect_interval_disables_the_policy() {
        let options = ConnectOptions::tcp("127.0.0.1", 4000).reconnect(Duration::ZERO);
        assert!(options.reconnect.is_none());

        let options = ConnectOptions::tcp("127.0.0.1", 4000).reconnect(Duration::from_millis(250));
        assert_eq!(options.reconnect, Some(Duration::from_millis(250)));
    }

    #[test]
    fn listen_options_default_has_no_target() {
        let options = ListenOptions::default();
        assert!(options.target.is_none());
        assert_eq!(options.mount, DEFAULT_MOUNT);
    }
}
