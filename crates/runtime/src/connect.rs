//! Outbound connection manager.
//!
//! Establishes one client-role connection and keeps it alive under the
//! configured reconnect policy until the caller explicitly terminates it.
//! The state machine:
//!
//! ```text
//! Connecting ── ok ──▶ Connected ── clean end ──▶ Waiting ─▶ Reconnecting ─▶ Connecting
//!     │                     │                        │
//!   refused             fault/no policy         policy disabled
//!     ▼                     ▼                        ▼
//!  Refused ─▶ Reconnecting  Terminated           Terminated
//! ```
//!
//! Connection-refused is the only error the policy retries; every other
//! fault is surfaced and terminal. Each attempt gets a fresh session and a
//! fresh stream: TCP targets are redialed, supplied-stream factories are
//! re-invoked.

use crate::bridge::{BridgeEnd, BridgeHooks, Role, run_session};
use crate::error::{Error, ErrorSlot, Result};
use crate::facade::SwitchboardEvent;
use crate::middleware::MiddlewareStack;
use crate::options::{ConnectOptions, ConnectTarget};
use crate::transport::{BoxedStream, stream_transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_protocol::SessionFactory;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

/// Reconnect state of one outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// A duplex stream is being established.
    Connecting,
    /// Stream up; traffic flows.
    Connected,
    /// The peer refused; the reconnect interval is running.
    Refused,
    /// Clean stream end; the reconnect interval is running.
    Waiting,
    /// Interval elapsed; about to re-enter `Connecting`.
    Reconnecting,
    /// Terminal. The stream is released.
    Terminated,
}

/// Signals surfaced on a [`ClientHandle`]'s event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Refused,
    Reconnecting,
    /// The stream ended while the reconnect policy was pending.
    Dropped,
    /// Terminal; no further events follow.
    Ended,
}

/// Caller-facing handle for one outbound connection.
pub struct ClientHandle {
    state_rx: watch::Receiver<ConnectState>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    shutdown: Arc<Notify>,
    reconnect_enabled: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Current state of the reconnect machine.
    pub fn state(&self) -> ConnectState {
        *self.state_rx.borrow()
    }

    /// A watch on state transitions, for awaiting a particular state.
    pub fn state_stream(&self) -> watch::Receiver<ConnectState> {
        self.state_rx.clone()
    }

    /// Takes the signal stream. Yields `Some` exactly once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    /// Gracefully terminates: disables the reconnect policy and closes the
    /// stream. Idempotent.
    pub fn terminate(&self) {
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Forcefully destroys the connection without graceful shutdown.
    pub fn destroy(&self) {
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Spawns the supervisor task for one outbound connection.
pub(crate) fn spawn_client(
    factory: Arc<dyn SessionFactory>,
    stack: MiddlewareStack,
    options: ConnectOptions,
    facade_tx: mpsc::UnboundedSender<SwitchboardEvent>,
    errors: ErrorSlot,
) -> ClientHandle {
    let (state_tx, state_rx) = watch::channel(ConnectState::Connecting);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());
    let reconnect_enabled = Arc::new(AtomicBool::new(options.reconnect.is_some()));
    let terminated = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(supervise(Supervisor {
        factory,
        stack,
        options,
        state_tx,
        events_tx,
        facade_tx,
        errors,
        reconnect_enabled: reconnect_enabled.clone(),
        terminated: terminated.clone(),
        shutdown: shutdown.clone(),
    }));

    ClientHandle {
        state_rx,
        events_rx: Mutex::new(Some(events_rx)),
        shutdown,
        reconnect_enabled,
        terminated,
        task,
    }
}

struct Supervisor {
    factory: Arc<dyn SessionFactory>,
    stack: MiddlewareStack,
    options: ConnectOptions,
    state_tx: watch::Sender<ConnectState>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    facade_tx: mpsc::UnboundedSender<SwitchboardEvent>,
    errors: ErrorSlot,
    reconnect_enabled: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

async fn supervise(sup: Supervisor) {
    loop {
        if sup.terminated.load(Ordering::SeqCst) {
            break;
        }
        let _ = sup.state_tx.send(ConnectState::Connecting);

        let stream = match open_stream(&sup.options.target).await {
            Ok(stream) => stream,
            Err(e) if e.is_refused() && sup.reconnect_enabled.load(Ordering::SeqCst) => {
                tracing::debug!(error = %e, "connection refused, reconnect policy engaged");
                let _ = sup.state_tx.send(ConnectState::Refused);
                let _ = sup.events_tx.send(ClientEvent::Refused);
                if !wait_to_reconnect(&sup).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                if !sup.terminated.load(Ordering::SeqCst) {
                    sup.errors.report("connect", e);
                }
                break;
            }
        };

        // Fresh session per attempt, including each reconnect attempt.
        let session = match sup.factory.create() {
            Ok(session) => session,
            Err(e) => {
                sup.errors.report("connect", Error::Session(e));
                break;
            }
        };

        let _ = sup.state_tx.send(ConnectState::Connected);
        let _ = sup.events_tx.send(ClientEvent::Connected);
        let _ = sup
            .facade_tx
            .send(SwitchboardEvent::Connect(session.id().to_string()));

        let hooks = BridgeHooks {
            on_remote: sup.options.on_remote.clone(),
            on_dropped: None,
            errors: sup.errors.clone(),
        };
        let outcome = run_session(
            session,
            stream_transport(stream),
            &sup.stack,
            Role::Client,
            hooks,
            sup.shutdown.clone(),
        )
        .await;

        match outcome {
            BridgeEnd::Terminated | BridgeEnd::Fault => break,
            BridgeEnd::Stream | BridgeEnd::Session => {
                if !sup.reconnect_enabled.load(Ordering::SeqCst) {
                    break;
                }
                let _ = sup.state_tx.send(ConnectState::Waiting);
                let _ = sup.events_tx.send(ClientEvent::Dropped);
                if !wait_to_reconnect(&sup).await {
                    break;
                }
            }
        }
    }

    let _ = sup.state_tx.send(ConnectState::Terminated);
    let _ = sup.events_tx.send(ClientEvent::Ended);
}

/// Runs the reconnect interval, re-checking that the policy is still
/// enabled afterwards (it may be disabled concurrently by `terminate`).
/// Returns true if the machine should re-enter `Connecting`.
async fn wait_to_reconnect(sup: &Supervisor) -> bool {
    let Some(interval) = sup.options.reconnect else {
        return false;
    };
    let slept = tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = sup.shutdown.notified() => false,
    };
    if !slept || !sup.reconnect_enabled.load(Ordering::SeqCst) {
        return false;
    }
    let _ = sup.state_tx.send(ConnectState::Reconnecting);
    let _ = sup.events_tx.send(ClientEvent::Reconnecting);
    true
}

/// Opens one fresh stream for one attempt.
async fn open_stream(target: &ConnectTarget) -> Result<BoxedStream> {
    match target {
        ConnectTarget::Tcp { host, port } => {
            let addr = format!("{host}:{port}");
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| Error::from_dial(e, &addr))?;
            Ok(Box::new(stream) as BoxedStream)
        }
        ConnectTarget::Stream(factory) => factory()
            .await
            .map_err(|e| Error::from_dial(e, "supplied stream")),
    }
}
