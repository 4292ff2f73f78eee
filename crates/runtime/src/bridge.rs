//! Bridges one duplex stream to one session.
//!
//! The bridge is the only place traffic crosses between a stream and a
//! session: inbound lines are fed to `parse()` in arrival order, outgoing
//! `Request` events are framed and written in submission order, and the
//! session's lifecycle events are turned into supervisor outcomes. Both the
//! outbound connection manager and the listener manager run every
//! established connection through here, so middleware application and the
//! error policy are uniform across roles.

use crate::error::{Error, ErrorSlot};
use crate::middleware::MiddlewareStack;
use crate::options::RemoteCallback;
use crate::transport::TransportParts;
use serde_json::Value;
use std::sync::Arc;
use switchboard_protocol::{Session, SessionEvent};
use tokio::sync::Notify;

/// How a bridged connection came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeEnd {
    /// The stream reached EOF.
    Stream,
    /// The session ended the conversation.
    Session,
    /// A non-refusal transport fault. Never retried.
    Fault,
    /// Explicit terminate/end request.
    Terminated,
}

/// Writing discipline differs by role: server-role requests are only
/// written while the stream is writable, and are surfaced as dropped
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// Per-connection callbacks handed in by the supervisor.
pub(crate) struct BridgeHooks {
    pub on_remote: Option<RemoteCallback>,
    /// Server role: receives request payloads that could not be written.
    pub on_dropped: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    pub errors: ErrorSlot,
}

/// Runs one established connection to completion.
///
/// Applies the middleware stack, starts the session, then pumps lines and
/// session events until the stream ends, the session ends, a fault occurs,
/// or `shutdown` fires.
pub(crate) async fn run_session(
    session: Arc<dyn Session>,
    parts: TransportParts,
    stack: &MiddlewareStack,
    role: Role,
    hooks: BridgeHooks,
    shutdown: Arc<Notify>,
) -> BridgeEnd {
    let TransportParts {
        mut sink,
        source,
        mut lines,
    } = parts;

    let session_id = session.id().to_string();

    // Middleware runs after the session exists but before any line is
    // parsed or written.
    stack.apply(&session);

    let Some(mut events) = session.take_events() else {
        hooks.errors.report(&session_id, Error::ChannelClosed);
        return BridgeEnd::Fault;
    };

    let reader = tokio::spawn(source.run());

    session.start();
    tracing::debug!(session = %session_id, ?role, "session bridged");

    let mut writable = true;
    let outcome = loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    if let Err(e) = session.parse(&line) {
                        hooks.errors.report(&session_id, Error::Session(e));
                    }
                }
                None => {
                    // Stream ended. Requests already queued by the session
                    // can no longer be written; surface them as dropped.
                    writable = false;
                    if role == Role::Server {
                        while let Ok(event) = events.try_recv() {
                            handle_event(event, &session, &hooks, &mut sink, role, &mut writable)
                                .await;
                        }
                    }
                    break BridgeEnd::Stream;
                }
            },
            event = events.recv() => match event {
                Some(SessionEvent::End) | None => break BridgeEnd::Session,
                Some(event) => {
                    if let Some(fault) =
                        handle_event(event, &session, &hooks, &mut sink, role, &mut writable).await
                    {
                        break fault;
                    }
                }
            },
            _ = shutdown.notified() => break BridgeEnd::Terminated,
        }
    };

    // Check whether the reader stopped on a transport fault rather than a
    // clean EOF; a fault is surfaced and never retried.
    let outcome = if outcome == BridgeEnd::Stream {
        match reader.await {
            Ok(Ok(())) => BridgeEnd::Stream,
            Ok(Err(e)) => {
                hooks.errors.report(&session_id, e);
                BridgeEnd::Fault
            }
            Err(_) => BridgeEnd::Fault,
        }
    } else {
        let _ = sink.shutdown().await;
        reader.abort();
        outcome
    };

    tracing::debug!(session = %session_id, ?outcome, "session unbridged");
    outcome
}

/// Handles one non-terminal session event. Returns a fault outcome if the
/// bridge should stop.
async fn handle_event(
    event: SessionEvent,
    session: &Arc<dyn Session>,
    hooks: &BridgeHooks,
    sink: &mut Box<dyn crate::transport::LineSink>,
    role: Role,
    writable: &mut bool,
) -> Option<BridgeEnd> {
    match event {
        SessionEvent::Request(request) => {
            if role == Role::Server && !*writable {
                tracing::debug!(session = session.id(), "dropping request: stream not writable");
                if let Some(on_dropped) = &hooks.on_dropped {
                    on_dropped(request);
                }
                return None;
            }
            if let Err(e) = sink.send(&request).await {
                *writable = false;
                hooks.errors.report(session.id(), e);
                if role == Role::Client {
                    return Some(BridgeEnd::Fault);
                }
            }
            None
        }
        SessionEvent::Remote => {
            if let Some(on_remote) = &hooks.on_remote {
                on_remote(&session.local(), &session.remote(), session);
            }
            None
        }
        SessionEvent::Error(e) => {
            hooks.errors.report(session.id(), Error::Session(e));
            None
        }
        // End is handled by the caller's select arm.
        SessionEvent::End => Some(BridgeEnd::Session),
    }
}
