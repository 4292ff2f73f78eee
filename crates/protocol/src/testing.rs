//! Scriptable session doubles for supervisor tests.
//!
//! [`MockFactory`] hands out [`MockSession`]s and records every one it
//! creates, so tests can reach into a session after the supervisor wired it
//! up: inspect parsed lines, check `start()` was called, or emit events as
//! if the protocol layer produced them.

use crate::session::{
    HandlerObject, Result, Session, SessionEvent, SessionFactory,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc};

/// Handler object with a tag list middleware can append to.
#[derive(Default)]
pub struct TestHandler {
    tags: Mutex<Vec<String>>,
}

impl TestHandler {
    /// Appends a tag. Used by test middleware to prove ordering.
    pub fn tag(&self, tag: impl Into<String>) {
        self.tags.lock().push(tag.into());
    }

    /// Snapshot of the tags appended so far.
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().clone()
    }
}

impl HandlerObject for TestHandler {}

/// A session double driven entirely by the test.
pub struct MockSession {
    id: String,
    started: AtomicBool,
    parsed: Mutex<Vec<String>>,
    parsed_notify: Notify,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    local: Arc<TestHandler>,
    remote: Arc<TestHandler>,
}

impl MockSession {
    /// Creates a standalone mock session with the given identifier.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: id.into(),
            started: AtomicBool::new(false),
            parsed: Mutex::new(Vec::new()),
            parsed_notify: Notify::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            local: Arc::new(TestHandler::default()),
            remote: Arc::new(TestHandler::default()),
        })
    }

    /// Emits an event as if the protocol layer produced it.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// True once the supervisor invoked `start()`.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Lines fed to `parse()` so far, in arrival order.
    pub fn parsed(&self) -> Vec<String> {
        self.parsed.lock().clone()
    }

    /// Waits until at least `n` lines have been parsed.
    pub async fn wait_for_parsed(&self, n: usize) -> Vec<String> {
        loop {
            let notified = self.parsed_notify.notified();
            let lines = self.parsed();
            if lines.len() >= n {
                return lines;
            }
            notified.await;
        }
    }

    /// The concrete local handler, for assertions.
    pub fn local_handler(&self) -> &Arc<TestHandler> {
        &self.local
    }
}

impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn parse(&self, line: &str) -> Result<()> {
        self.parsed.lock().push(line.to_string());
        self.parsed_notify.notify_waiters();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().take()
    }

    fn local(&self) -> Arc<dyn HandlerObject> {
        self.local.clone()
    }

    fn remote(&self) -> Arc<dyn HandlerObject> {
        self.remote.clone()
    }
}

/// Factory that records every session it creates.
#[derive(Default)]
pub struct MockFactory {
    counter: AtomicU64,
    created: Mutex<Vec<Arc<MockSession>>>,
    created_notify: Notify,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions created so far, in creation order.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.created.lock().clone()
    }

    /// Waits until at least `n` sessions have been created.
    pub async fn wait_for_sessions(&self, n: usize) -> Vec<Arc<MockSession>> {
        loop {
            let notified = self.created_notify.notified();
            let sessions = self.sessions();
            if sessions.len() >= n {
                return sessions;
            }
            notified.await;
        }
    }
}

impl SessionFactory for MockFactory {
    fn create(&self) -> Result<Arc<dyn Session>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let session = MockSession::new(format!("session@{n}"));
        self.created.lock().push(session.clone());
        self.created_notify.notify_waiters();
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_can_be_taken_once() {
        let session = MockSession::new("session@0");
        assert!(session.take_events().is_some());
        assert!(session.take_events().is_none());
    }

    #[tokio::test]
    async fn factory_records_sessions_in_order() {
        let factory = MockFactory::new();
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert_eq!(a.id(), "session@0");
        assert_eq!(b.id(), "session@1");
        assert_eq!(factory.wait_for_sessions(2).await.len(), 2);
    }

    #[test]
    fn handler_tags_preserve_order() {
        let handler = TestHandler::default();
        handler.tag("first");
        handler.tag("second");
        assert_eq!(handler.tags(), vec!["first", "second"]);
    }
}
