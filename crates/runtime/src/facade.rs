//! The lifecycle facade: one object owning the middleware stack, the
//! listener and connection registries, and the event stream callers
//! observe.
//!
//! A facade is cheap to create and internally synchronized; `connect` and
//! `listen` may be called any number of times, and every connection either
//! side produces runs the same middleware stack against a fresh session.

use crate::connect::{self, ClientHandle};
use crate::error::{Error, ErrorSlot, Result};
use crate::listen::{self, ClientEntry, ListenerEntry, ListenerId, ListenerShared};
use crate::middleware::MiddlewareStack;
use crate::options::{ConnectOptions, ListenOptions, ListenTarget};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_protocol::{HandlerObject, Session, SessionFactory};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Signals surfaced on the facade's event stream.
#[derive(Debug)]
pub enum SwitchboardEvent {
    /// A freshly bound TCP listener is accepting connections at `addr`.
    Ready {
        id: ListenerId,
        addr: std::net::SocketAddr,
    },
    /// A client-role session connected; carries the session id.
    Connect(String),
    /// A server-role request was discarded because its stream was no
    /// longer writable.
    RequestDropped { session: String, request: Value },
    /// A listener-level fault that did not take the facade down.
    Error(Error),
    /// `end` was requested; server connections are shutting down.
    End,
    /// The last listener finished after a `close` request. Fires once.
    Close,
}

/// Connection-lifecycle manager for line-framed RPC transports.
pub struct Switchboard {
    factory: Arc<dyn SessionFactory>,
    stack: MiddlewareStack,
    errors: ErrorSlot,
    listeners: Arc<Mutex<HashMap<ListenerId, ListenerEntry>>>,
    clients: Arc<Mutex<HashMap<String, ClientEntry>>>,
    events_tx: mpsc::UnboundedSender<SwitchboardEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SwitchboardEvent>>>,
    closing: Arc<AtomicBool>,
    close_emitted: Arc<AtomicBool>,
}

impl Switchboard {
    /// Creates a facade whose connections get their sessions from
    /// `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            stack: MiddlewareStack::default(),
            errors: ErrorSlot::default(),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            clients: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            closing: Arc::new(AtomicBool::new(false)),
            close_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a middleware function run once per established session,
    /// client and server role alike, in registration order.
    pub fn use_middleware<F>(&self, middleware: F) -> &Self
    where
        F: Fn(&Arc<dyn HandlerObject>, &Arc<dyn HandlerObject>, &Arc<dyn Session>)
            + Send
            + Sync
            + 'static,
    {
        self.stack.push(Arc::new(middleware));
        self
    }

    /// Installs the session-error observer. Errors with no observer are
    /// logged instead.
    pub fn on_session_error<F>(&self, observer: F) -> &Self
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.errors.install(Arc::new(observer));
        self
    }

    /// Takes the facade event stream. Yields `Some` exactly once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SwitchboardEvent>> {
        self.events_rx.lock().take()
    }

    /// Starts one outbound connection under `options` and returns its
    /// handle. Must be called within a runtime.
    pub fn connect(&self, options: ConnectOptions) -> ClientHandle {
        connect::spawn_client(
            self.factory.clone(),
            self.stack.clone(),
            options,
            self.events_tx.clone(),
            self.errors.clone(),
        )
    }

    /// Registers a listener under `options` and starts its accept loop.
    /// Fails if the options carry no target or the TCP bind fails.
    pub async fn listen(&self, options: ListenOptions) -> Result<ListenerId> {
        let ListenOptions {
            target,
            mount,
            on_remote,
        } = options;
        let Some(target) = target else {
            return Err(Error::Config("listen requires a target".into()));
        };

        let id = Uuid::new_v4();
        let stop = Arc::new(Notify::new());
        self.listeners
            .lock()
            .insert(id, ListenerEntry { stop: stop.clone() });
        let shared = self.shared();

        match target {
            ListenTarget::Tcp { host, port } => {
                let bound = async {
                    let listener = TcpListener::bind((host.as_str(), port)).await?;
                    let addr = listener.local_addr()?;
                    Ok::<_, std::io::Error>((listener, addr))
                };
                let (listener, addr) = match bound.await {
                    Ok(bound) => bound,
                    Err(e) => {
                        self.listeners.lock().remove(&id);
                        return Err(e.into());
                    }
                };
                tracing::info!(listener = %id, %addr, "listening");
                let _ = self.events_tx.send(SwitchboardEvent::Ready { id, addr });
                tokio::spawn(listen::accept_tcp(listener, shared, id, stop, on_remote));
            }
            ListenTarget::WebServer { listener } => {
                tracing::info!(listener = %id, %mount, "mounted on web server");
                tokio::spawn(listen::accept_web(
                    listener, mount, shared, id, stop, on_remote,
                ));
            }
            ListenTarget::Acceptor(acceptor) => {
                tokio::spawn(listen::accept_custom(acceptor, shared, id, stop, on_remote));
            }
        }
        Ok(id)
    }

    /// Ends every registered server-role connection and signals `End`.
    pub fn end(&self) {
        let shutdowns: Vec<_> = self
            .clients
            .lock()
            .values()
            .map(|entry| entry.shutdown.clone())
            .collect();
        tracing::debug!(connections = shutdowns.len(), "ending server connections");
        for shutdown in shutdowns {
            shutdown.notify_one();
        }
        let _ = self.events_tx.send(SwitchboardEvent::End);
    }

    /// Requests listener shutdown. `Close` fires once the last listener
    /// finishes, or immediately when none are registered. Idempotent.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let stops: Vec<_> = self
            .listeners
            .lock()
            .values()
            .map(|entry| entry.stop.clone())
            .collect();
        if stops.is_empty() {
            if !self.close_emitted.swap(true, Ordering::SeqCst) {
                let _ = self.events_tx.send(SwitchboardEvent::Close);
            }
            return;
        }
        tracing::debug!(listeners = stops.len(), "closing listeners");
        for stop in stops {
            stop.notify_one();
        }
    }

    fn shared(&self) -> ListenerShared {
        ListenerShared {
            factory: self.factory.clone(),
            stack: self.stack.clone(),
            errors: self.errors.clone(),
            events_tx: self.events_tx.clone(),
            listeners: self.listeners.clone(),
            clients: self.clients.clone(),
            closing: self.closing.clone(),
            close_emitted: self.close_emitted.clone(),
        }
    }
}
