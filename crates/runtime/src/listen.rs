//! Inbound listener management.
//!
//! Each `listen` call registers one listener in a shared registry and
//! spawns an accept loop for its target: a freshly bound TCP socket, a
//! WebSocket mount on an existing web server, or a caller-supplied
//! acceptor. Every accepted stream becomes one server-role connection
//! driven to completion by the bridge.
//!
//! Listener shutdown is coordinated: `close` stops the accept loops, each
//! loop removes its registry entry as it exits, and the facade's close
//! signal fires exactly once when the registry empties.

use crate::bridge::{BridgeHooks, Role, run_session};
use crate::error::{Error, ErrorSlot};
use crate::facade::SwitchboardEvent;
use crate::middleware::MiddlewareStack;
use crate::options::{RemoteCallback, StreamAcceptor};
use crate::transport::{TransportParts, stream_transport, ws_transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_protocol::SessionFactory;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use uuid::Uuid;

/// Identifier of one registered listener.
pub type ListenerId = Uuid;

/// Registry entry for one live listener.
pub(crate) struct ListenerEntry {
    pub stop: Arc<Notify>,
}

/// Registry entry for one live server-role connection.
pub(crate) struct ClientEntry {
    pub shutdown: Arc<Notify>,
}

/// Shared state every listener task carries: the session factory, the
/// registries, and the facade's event channel.
#[derive(Clone)]
pub(crate) struct ListenerShared {
    pub factory: Arc<dyn SessionFactory>,
    pub stack: MiddlewareStack,
    pub errors: ErrorSlot,
    pub events_tx: mpsc::UnboundedSender<SwitchboardEvent>,
    pub listeners: Arc<Mutex<HashMap<ListenerId, ListenerEntry>>>,
    pub clients: Arc<Mutex<HashMap<String, ClientEntry>>>,
    pub closing: Arc<AtomicBool>,
    pub close_emitted: Arc<AtomicBool>,
}

/// Removes a finished listener from the registry. If that empties the
/// registry while a close is pending, fires the close signal, exactly once
/// no matter how many listeners finish concurrently.
pub(crate) fn finish_listener(shared: &ListenerShared, id: ListenerId) {
    let now_empty = {
        let mut listeners = shared.listeners.lock();
        listeners.remove(&id);
        listeners.is_empty()
    };
    if now_empty
        && shared.closing.load(Ordering::SeqCst)
        && !shared.close_emitted.swap(true, Ordering::SeqCst)
    {
        let _ = shared.events_tx.send(SwitchboardEvent::Close);
    }
}

/// Accept loop for a TCP listener. Runs until its stop signal fires.
pub(crate) async fn accept_tcp(
    listener: TcpListener,
    shared: ListenerShared,
    id: ListenerId,
    stop: Arc<Notify>,
    on_remote: Option<RemoteCallback>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(listener = %id, %peer, "accepted connection");
                    spawn_connection(
                        stream_transport(Box::new(stream)),
                        shared.clone(),
                        on_remote.clone(),
                    );
                }
                Err(e) => {
                    let _ = shared.events_tx.send(SwitchboardEvent::Error(e.into()));
                }
            },
        }
    }
    tracing::debug!(listener = %id, "listener stopped");
    finish_listener(&shared, id);
}

/// Accept loop for a WebSocket mount on an existing web-server socket.
///
/// Each TCP accept is upgraded off the loop so a slow handshake cannot
/// stall other connections. Upgrade requests for any path other than the
/// mount are rejected with 404; a failed handshake never takes the
/// listener down.
pub(crate) async fn accept_web(
    listener: TcpListener,
    mount: String,
    shared: ListenerShared,
    id: ListenerId,
    stop: Arc<Notify>,
    on_remote: Option<RemoteCallback>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let mount = mount.clone();
                    let shared = shared.clone();
                    let on_remote = on_remote.clone();
                    tokio::spawn(async move {
                        let check = |req: &Request, resp: Response| {
                            if req.uri().path() == mount {
                                Ok(resp)
                            } else {
                                let mut rejection = ErrorResponse::new(None);
                                *rejection.status_mut() = StatusCode::NOT_FOUND;
                                Err(rejection)
                            }
                        };
                        match accept_hdr_async(stream, check).await {
                            Ok(ws) => {
                                tracing::debug!(%peer, %mount, "websocket connection mounted");
                                spawn_connection(ws_transport(ws), shared, on_remote);
                            }
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "websocket handshake rejected");
                            }
                        }
                    });
                }
                Err(e) => {
                    let _ = shared.events_tx.send(SwitchboardEvent::Error(e.into()));
                }
            },
        }
    }
    tracing::debug!(listener = %id, "web listener stopped");
    finish_listener(&shared, id);
}

/// Accept loop for a caller-supplied acceptor. A fatal acceptor error ends
/// the loop and retires the listener.
pub(crate) async fn accept_custom(
    mut acceptor: Box<dyn StreamAcceptor>,
    shared: ListenerShared,
    id: ListenerId,
    stop: Arc<Notify>,
    on_remote: Option<RemoteCallback>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            accepted = acceptor.accept() => match accepted {
                Ok(stream) => {
                    spawn_connection(
                        stream_transport(stream),
                        shared.clone(),
                        on_remote.clone(),
                    );
                }
                Err(e) => {
                    let _ = shared.events_tx.send(SwitchboardEvent::Error(e.into()));
                    break;
                }
            },
        }
    }
    tracing::debug!(listener = %id, "acceptor stopped");
    finish_listener(&shared, id);
}

/// Drives one accepted stream as a server-role connection: creates a fresh
/// session, registers it so `end` can reach it, and removes it when the
/// conversation finishes.
pub(crate) fn spawn_connection(
    parts: TransportParts,
    shared: ListenerShared,
    on_remote: Option<RemoteCallback>,
) {
    tokio::spawn(async move {
        let session = match shared.factory.create() {
            Ok(session) => session,
            Err(e) => {
                shared.errors.report("accept", Error::Session(e));
                return;
            }
        };
        let session_id = session.id().to_string();
        let shutdown = Arc::new(Notify::new());
        shared.clients.lock().insert(
            session_id.clone(),
            ClientEntry {
                shutdown: shutdown.clone(),
            },
        );

        let dropped_tx = shared.events_tx.clone();
        let dropped_id = session_id.clone();
        let hooks = BridgeHooks {
            on_remote,
            on_dropped: Some(Arc::new(move |request| {
                let _ = dropped_tx.send(SwitchboardEvent::RequestDropped {
                    session: dropped_id.clone(),
                    request,
                });
            })),
            errors: shared.errors.clone(),
        };

        let end = run_session(session, parts, &shared.stack, Role::Server, hooks, shutdown).await;
        tracing::debug!(session = %session_id, outcome = ?end, "server connection finished");
        shared.clients.lock().remove(&session_id);
    });
}
