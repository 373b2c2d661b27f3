//! # Poll-driven DAG consensus
//!
//! The ledger is a directed acyclic graph of vertices, each bundling one or
//! more transactions and referencing earlier vertices as parents. There is
//! no leader and no block interval: the network repeatedly samples a small
//! committee of peers, each sampled peer names the vertex it currently
//! prefers, and the engine folds those answers into per-transaction
//! confidence until every transaction — and with it every vertex — is
//! driven to Accepted or Rejected.
//!
//! ## How a poll lands
//!
//! 1. A vote for a vertex is a vote for its whole ancestry. The engine
//!    aggregates a poll in one topological pass over the reachable
//!    undecided sub-DAG, unioning voter sets downward so no voter is
//!    counted twice for any transaction.
//! 2. The per-transaction tallies feed the conflict graph, which raises or
//!    resets confidence and may decide transactions.
//! 3. The engine then recomputes its frontiers: the **preferred** frontier
//!    (vertices whose transactions are all currently winning their conflict
//!    sets), the **virtuous** frontier (vertices whose transactions have no
//!    known conflicts), and the **orphans** (virtuous transactions stranded
//!    in non-preferred vertices, candidates for reissue).
//!
//! Callers build new vertices on top of the preferred frontier and use the
//! virtuous frontier plus [`Topological::quiesce`] to decide when polling
//! can stop.
//!
//! ## Division of labor
//!
//! [`dag::Topological`] owns the vertex layer; [`conflicts::Directed`]
//! resolves transaction conflicts below it. Vertices and transactions are
//! external: the engine sees them through the [`Vertex`] and [`Tx`] traits
//! and shares ownership with storage and networking via [`VertexRef`] /
//! [`TxRef`] handles. The engine is single-threaded by design — callers
//! serialize access externally.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ids::{Bag, Id};

pub mod conflicts;
pub mod dag;
pub mod params;

pub use conflicts::Directed;
pub use dag::Topological;
pub use params::{Parameters, ParametersError};

/// Decision state of a vertex or transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Still being voted on.
    Processing,
    /// Irreversibly accepted.
    Accepted,
    /// Irreversibly rejected.
    Rejected,
}

impl Status {
    /// True once the decision is terminal.
    pub fn decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }
}

/// An atomic unit of state change, resolved by the conflict graph.
///
/// Two transactions conflict iff they consume a common input id. `accept`
/// and `reject` are invoked by the conflict graph exactly once and must be
/// idempotent afterwards.
pub trait Tx {
    fn id(&self) -> Id;
    /// Ids of the state this transaction consumes.
    fn input_ids(&self) -> Vec<Id>;
    fn status(&self) -> Status;
    fn accept(&mut self);
    fn reject(&mut self);
}

/// A vertex in the DAG: parent references plus a batch of transactions.
///
/// The engine never owns vertices exclusively; it holds [`VertexRef`]
/// handles and expects `parents` and `txs` to stay fixed for the vertex's
/// lifetime. `accept` and `reject` transition `status` to its terminal
/// value and are idempotent once decided.
pub trait Vertex {
    fn id(&self) -> Id;
    /// Opaque byte representation, forwarded to event subscribers.
    fn bytes(&self) -> Vec<u8>;
    fn status(&self) -> Status;
    fn parents(&self) -> Vec<VertexRef>;
    fn txs(&self) -> Vec<TxRef>;
    fn accept(&mut self);
    fn reject(&mut self);
}

/// Shared handle to an externally owned transaction.
pub type TxRef = Rc<RefCell<dyn Tx>>;

/// Shared handle to an externally owned vertex.
pub type VertexRef = Rc<RefCell<dyn Vertex>>;

/// Transaction-level consensus embedded in the DAG engine.
///
/// Tracks conflict relations among processing transactions and drives each
/// one to Accepted or Rejected from per-poll vote bags. After
/// [`ConflictGraph::record_poll`] returns, [`ConflictGraph::preferences`]
/// and [`ConflictGraph::virtuous`] reflect the updated state; transactions
/// move from Processing to a terminal status monotonically.
pub trait ConflictGraph {
    /// Register a processing transaction and its conflicts.
    fn add(&mut self, tx: TxRef);

    /// True iff the transaction is decided or currently tracked.
    fn issued(&self, tx: &TxRef) -> bool;

    /// Apply one poll's vote counts.
    fn record_poll(&mut self, votes: Bag);

    /// Undecided transactions currently winning their conflict sets.
    fn preferences(&self) -> &HashSet<Id>;

    /// Undecided transactions with no known conflicts.
    fn virtuous(&self) -> &HashSet<Id>;

    /// Whether `tx` has (or, if unissued, would have) no conflicts.
    fn is_virtuous(&self, tx: &TxRef) -> bool;

    /// True when no virtuous transaction is still awaiting a decision.
    fn quiesce(&self) -> bool;

    /// True when every tracked transaction has been decided.
    fn finalized(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Minimal in-memory `Tx`/`Vertex` implementations for unit tests.

    use super::*;

    pub(crate) struct TestTx {
        id: Id,
        inputs: Vec<Id>,
        status: Status,
    }

    impl Tx for TestTx {
        fn id(&self) -> Id {
            self.id
        }
        fn input_ids(&self) -> Vec<Id> {
            self.inputs.clone()
        }
        fn status(&self) -> Status {
            self.status
        }
        fn accept(&mut self) {
            self.status = Status::Accepted;
        }
        fn reject(&mut self) {
            self.status = Status::Rejected;
        }
    }

    pub(crate) struct TestVertex {
        id: Id,
        parents: Vec<VertexRef>,
        txs: Vec<TxRef>,
        status: Status,
    }

    impl Vertex for TestVertex {
        fn id(&self) -> Id {
            self.id
        }
        fn bytes(&self) -> Vec<u8> {
            self.id.as_bytes().to_vec()
        }
        fn status(&self) -> Status {
            self.status
        }
        fn parents(&self) -> Vec<VertexRef> {
            self.parents.clone()
        }
        fn txs(&self) -> Vec<TxRef> {
            self.txs.clone()
        }
        fn accept(&mut self) {
            self.status = Status::Accepted;
        }
        fn reject(&mut self) {
            self.status = Status::Rejected;
        }
    }

    pub(crate) fn tx(n: u8, inputs: Vec<Id>) -> TxRef {
        Rc::new(RefCell::new(TestTx {
            id: Id::new([n; 32]),
            inputs,
            status: Status::Processing,
        }))
    }

    pub(crate) fn vertex(n: u8, parents: Vec<VertexRef>, txs: Vec<TxRef>) -> VertexRef {
        vertex_with_status(n, parents, txs, Status::Processing)
    }

    pub(crate) fn vertex_with_status(
        n: u8,
        parents: Vec<VertexRef>,
        txs: Vec<TxRef>,
        status: Status,
    ) -> VertexRef {
        Rc::new(RefCell::new(TestVertex {
            id: Id::new([n; 32]),
            parents,
            txs,
            status,
        }))
    }
}
