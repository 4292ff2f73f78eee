//! The middleware stack: ordered capability injection per session.

use parking_lot::Mutex;
use std::sync::Arc;
use switchboard_protocol::{HandlerObject, Session};

/// A capability-injecting function run once per established session, with
/// `(local, remote, session)` in hand, before any line is parsed or
/// written.
pub type Middleware =
    Arc<dyn Fn(&Arc<dyn HandlerObject>, &Arc<dyn HandlerObject>, &Arc<dyn Session>) + Send + Sync>;

/// Append-only, ordered middleware list shared by every connection of one
/// facade. There is no removal operation.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    stack: Arc<Mutex<Vec<Middleware>>>,
}

impl MiddlewareStack {
    /// Appends a middleware function.
    pub fn push(&self, middleware: Middleware) {
        self.stack.lock().push(middleware);
    }

    /// Runs every registered function against `session`, in registration
    /// order, synchronously. Applies uniformly to client and server roles.
    pub fn apply(&self, session: &Arc<dyn Session>) {
        // Snapshot under the lock, run outside it: a middleware may itself
        // register more middleware for future sessions.
        let snapshot = self.stack.lock().clone();
        let local = session.local();
        let remote = session.remote();
        for middleware in &snapshot {
            middleware(&local, &remote, session);
        }
    }

    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }
}
