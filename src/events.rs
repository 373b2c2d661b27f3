//! Engine event notifications.
//!
//! The engine announces three things about a vertex: that it was issued
//! into the live graph, and later that it was accepted or that it was
//! rejected. Subscribers receive
//! the chain id, the vertex id, and the vertex's opaque bytes — enough to
//! index, persist, or gossip the decision without touching engine state.
//!
//! Notifications are fire-and-forget and synchronous: a dispatcher must
//! return promptly and must not call back into the engine. Every event
//! reflects a decision the engine has already committed to — a subscriber
//! never observes a decision that can still change.

use std::rc::Rc;

use crate::ids::Id;

/// Notification sink for vertex lifecycle events.
pub trait Dispatcher {
    /// A vertex entered the live graph.
    fn issue(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]);
    /// A vertex was accepted.
    fn accept(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]);
    /// A vertex was rejected.
    fn reject(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]);
}

/// Logs every event through `tracing`.
pub struct EventLogger;

impl Dispatcher for EventLogger {
    fn issue(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]) {
        tracing::info!(chain = ?chain_id, vertex = ?vtx_id, len = bytes.len(), "Issued vertex");
    }

    fn accept(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]) {
        tracing::info!(chain = ?chain_id, vertex = ?vtx_id, len = bytes.len(), "Accepted vertex");
    }

    fn reject(&self, chain_id: Id, vtx_id: Id, bytes: &[u8]) {
        tracing::info!(chain = ?chain_id, vertex = ?vtx_id, len = bytes.len(), "Rejected vertex");
    }
}

/// Discards every event.
pub struct NullDispatcher;

impl Dispatcher for NullDispatcher {
    fn issue(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {}
    fn accept(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {}
    fn reject(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {}
}

/// Per-chain environment injected into a consensus engine: the chain being
/// decided, the event sink, and the metrics registry.
pub struct Context {
    pub chain_id: Id,
    pub dispatcher: Rc<dyn Dispatcher>,
    pub registry: prometheus::Registry,
}

impl Context {
    /// A context with a fresh, private metrics registry. Deployments that
    /// aggregate metrics across chains construct the struct directly with
    /// a shared registry.
    pub fn new(chain_id: Id, dispatcher: Rc<dyn Dispatcher>) -> Self {
        Context {
            chain_id,
            dispatcher,
            registry: prometheus::Registry::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingDispatcher {
        issued: Cell<usize>,
    }

    impl Dispatcher for CountingDispatcher {
        fn issue(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {
            self.issued.set(self.issued.get() + 1);
        }
        fn accept(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {}
        fn reject(&self, _chain_id: Id, _vtx_id: Id, _bytes: &[u8]) {}
    }

    #[test]
    fn dispatcher_receives_events_through_context() {
        let dispatcher = Rc::new(CountingDispatcher {
            issued: Cell::new(0),
        });
        let ctx = Context::new(Id::new([1; 32]), dispatcher.clone());
        ctx.dispatcher.issue(ctx.chain_id, Id::new([2; 32]), b"vertex");
        assert_eq!(dispatcher.issued.get(), 1);
    }
}
