//! The DAG consensus engine.
//!
//! [`Topological`] owns the live vertex graph and turns poll results into
//! decisions. Each poll is applied in four steps:
//!
//! 1. **In-degree pass** — walk the undecided ancestry of every voted
//!    vertex, counting how many tracked children point at each ancestor
//!    within the reachable sub-DAG.
//! 2. **Vote push** — drain the sub-DAG leaves-first (Kahn's algorithm),
//!    unioning voter sets from child to parent so a vote for a vertex
//!    reaches every transaction in its ancestry exactly once per voter.
//! 3. **Conflict-graph poll** — hand the per-transaction tallies to the
//!    conflict graph, which may decide transactions.
//! 4. **Frontier recompute** — re-derive the preferred/virtuous/orphan
//!    sets and propagate acceptance and rejection through the DAG.
//!
//! Steps 1 and 2 are linear in the reachable undecided sub-DAG; step 4 is
//! linear in the prior frontier's undecided ancestry.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::events::Context;
use crate::ids::{Bag, BitSet, Id, UniqueBag};
use crate::metrics::Metrics;

use super::{
    ConflictGraph, Directed, Parameters, ParametersError, Status, TxRef, VertexRef,
};

/// Per-vertex bookkeeping for the topological vote push.
struct KahnNode {
    in_degree: usize,
    votes: BitSet,
}

/// Poll-driven consensus over a DAG of transaction-bundling vertices.
///
/// Tracks every undecided vertex, delegates transaction conflicts to an
/// embedded conflict graph, and recomputes the decision frontiers after
/// every poll. All entry points must be invoked from a single thread;
/// callers serialize access externally.
pub struct Topological {
    ctx: Context,
    params: Parameters,
    metrics: Metrics,

    /// Every tracked, undecided vertex. A vertex leaves this map exactly
    /// when it is accepted or rejected.
    nodes: HashMap<Id, VertexRef>,
    /// Transaction-level consensus.
    cg: Box<dyn ConflictGraph>,

    /// Vertex frontiers: strongly preferred and strongly virtuous.
    preferred: HashSet<Id>,
    virtuous: HashSet<Id>,
    /// Transactions that are virtuous but not contained in any preferred
    /// vertex; candidates for reissue in a new vertex.
    orphans: HashSet<Id>,

    /// Tracked vertices with no tracked descendants.
    frontier: HashMap<Id, VertexRef>,
    /// Memoized strongly-preferred / strongly-virtuous checks. Rebuilt at
    /// the start of every frontier recompute; entries persist between
    /// recomputes so `add` can reuse them.
    preference_cache: HashMap<Id, bool>,
    virtuous_cache: HashMap<Id, bool>,
}

impl Topological {
    /// Build an engine over an already-accepted frontier.
    ///
    /// `frontier` seeds the initial accepted boundary (typically the
    /// genesis vertex). Fails if `params` is inconsistent; no partially
    /// initialized engine is ever observable.
    pub fn new(
        ctx: Context,
        params: Parameters,
        frontier: Vec<VertexRef>,
    ) -> Result<Self, ParametersError> {
        params.valid()?;
        let metrics = Metrics::new(&params.namespace, &ctx.registry);
        let mut engine = Topological {
            metrics,
            cg: Box::new(Directed::new(params.clone())),
            ctx,
            params,
            nodes: HashMap::new(),
            preferred: HashSet::new(),
            virtuous: HashSet::new(),
            orphans: HashSet::new(),
            frontier: HashMap::new(),
            preference_cache: HashMap::new(),
            virtuous_cache: HashMap::new(),
        };
        for vtx in frontier {
            let vtx_id = vtx.borrow().id();
            engine.frontier.insert(vtx_id, vtx);
        }
        engine.update_frontiers();
        Ok(engine)
    }

    /// The parameters the engine was built with.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Whether `tx` has (or would have) no conflicts.
    pub fn is_virtuous(&self, tx: &TxRef) -> bool {
        self.cg.is_virtuous(tx)
    }

    /// Insert a vertex into the live graph.
    ///
    /// Vertices must be added parents-first; the engine assumes the
    /// ancestry of every added vertex is already tracked or decided.
    /// Decided and already-tracked vertices are ignored.
    pub fn add(&mut self, vtx: VertexRef) {
        let (vtx_id, status) = {
            let v = vtx.borrow();
            (v.id(), v.status())
        };
        if status.decided() || self.nodes.contains_key(&vtx_id) {
            return;
        }

        let bytes = vtx.borrow().bytes();
        self.ctx.dispatcher.issue(self.ctx.chain_id, vtx_id, &bytes);

        let txs = vtx.borrow().txs();
        for tx in txs {
            if !tx.borrow().status().decided() {
                self.cg.add(tx);
            }
        }

        self.nodes.insert(vtx_id, vtx.clone());
        self.metrics.issued();
        tracing::debug!(vertex = ?vtx_id, "Vertex issued");

        self.update(&vtx);
    }

    /// True iff the vertex is decided or currently tracked.
    pub fn vertex_issued(&self, vtx: &VertexRef) -> bool {
        let vtx = vtx.borrow();
        vtx.status().decided() || self.nodes.contains_key(&vtx.id())
    }

    /// True iff the transaction is decided or tracked by the conflict graph.
    pub fn tx_issued(&self, tx: &TxRef) -> bool {
        self.cg.issued(tx)
    }

    /// The strongly preferred vertex frontier.
    pub fn preferences(&self) -> &HashSet<Id> {
        &self.preferred
    }

    /// The strongly virtuous vertex frontier.
    pub fn virtuous(&self) -> &HashSet<Id> {
        &self.virtuous
    }

    /// Virtuous transactions not contained in any preferred vertex.
    pub fn orphans(&self) -> &HashSet<Id> {
        &self.orphans
    }

    /// Apply one poll's responses.
    pub fn record_poll(&mut self, responses: UniqueBag) {
        let (mut kahns, leaves) = self.calculate_in_degree(&responses);
        let votes = self.push_votes(&mut kahns, leaves);
        tracing::trace!(
            vertices = kahns.len(),
            txs = votes.list().len(),
            "Pushing poll votes into the conflict graph"
        );
        self.cg.record_poll(votes);
        self.update_frontiers();
    }

    /// True when no virtuous transaction is still awaiting a decision.
    pub fn quiesce(&self) -> bool {
        self.cg.quiesce()
    }

    /// True when every tracked transaction has been decided.
    pub fn finalized(&self) -> bool {
        self.cg.finalized()
    }

    /// Annotate the sub-DAG reachable from the voted vertices with inbound
    /// edge counts and the directly applied votes. Returns the annotations
    /// and the leaves of the sub-DAG (reachable vertices with no tracked
    /// child inside it).
    fn calculate_in_degree(&self, responses: &UniqueBag) -> (HashMap<Id, KahnNode>, Vec<Id>) {
        let mut kahns: HashMap<Id, KahnNode> = HashMap::new();
        let mut leaves: HashSet<Id> = HashSet::new();

        for vote in responses.ids() {
            // Votes for decided or unknown vertices are dropped.
            let Some(vtx) = self.nodes.get(&vote) else {
                continue;
            };
            match kahns.entry(vote) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().votes.union(responses.get_set(&vote));
                }
                Entry::Vacant(entry) => {
                    entry.insert(KahnNode {
                        in_degree: 0,
                        votes: responses.get_set(&vote),
                    });
                    leaves.insert(vote);
                    let parents = vtx.borrow().parents();
                    Self::mark_ancestor_in_degrees(&mut kahns, &mut leaves, parents);
                }
            }
        }

        (kahns, leaves.into_iter().collect())
    }

    /// Add one inbound edge to every undecided ancestor reachable from
    /// `deps`, enqueueing newly discovered ancestors' parents.
    fn mark_ancestor_in_degrees(
        kahns: &mut HashMap<Id, KahnNode>,
        leaves: &mut HashSet<Id>,
        deps: Vec<VertexRef>,
    ) {
        let mut stack: Vec<VertexRef> = deps
            .into_iter()
            .filter(|dep| !dep.borrow().status().decided())
            .collect();

        while let Some(current) = stack.pop() {
            let current_id = current.borrow().id();
            match kahns.entry(current_id) {
                Entry::Occupied(mut entry) => {
                    let node = entry.get_mut();
                    node.in_degree += 1;
                    if node.in_degree == 1 {
                        // First transitive edge: a voted vertex with a
                        // tracked descendant is not a leaf.
                        leaves.remove(&current_id);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(KahnNode {
                        in_degree: 1,
                        votes: BitSet::empty(),
                    });
                    for parent in current.borrow().parents() {
                        if !parent.borrow().status().decided() {
                            stack.push(parent);
                        }
                    }
                }
            }
        }
    }

    /// Drain the sub-DAG leaves-first, unioning voter sets upward, and
    /// flatten the result into a per-transaction vote bag.
    fn push_votes(&self, kahns: &mut HashMap<Id, KahnNode>, mut leaves: Vec<Id>) -> Bag {
        let mut votes = UniqueBag::new();

        while let Some(leaf_id) = leaves.pop() {
            let leaf_votes = kahns
                .get(&leaf_id)
                .map(|node| node.votes)
                .unwrap_or_default();
            let Some(vtx) = self.nodes.get(&leaf_id) else {
                continue;
            };
            let (txs, parents) = {
                let v = vtx.borrow();
                (v.txs(), v.parents())
            };

            // A voter behind any descendant votes for every transaction in
            // this vertex.
            for tx in txs {
                votes.union_set(tx.borrow().id(), leaf_votes);
            }

            for dep in parents {
                let dep_id = dep.borrow().id();
                if let Some(dep_node) = kahns.get_mut(&dep_id) {
                    dep_node.in_degree -= 1;
                    dep_node.votes.union(leaf_votes);
                    if dep_node.in_degree == 0 {
                        leaves.push(dep_id);
                    }
                }
            }
        }

        votes.bag(self.params.alpha as u64)
    }

    /// Recompute the preferred/virtuous/orphan sets and the frontier from
    /// the previous frontier.
    fn update_frontiers(&mut self) {
        let prev: Vec<VertexRef> = self.frontier.drain().map(|(_, vtx)| vtx).collect();

        self.preferred.clear();
        self.virtuous.clear();
        self.orphans.clear();
        self.preference_cache.clear();
        self.virtuous_cache.clear();

        // Until preferred vertices are rediscovered below, every virtuous
        // transaction is presumed orphaned.
        self.orphans.extend(self.cg.virtuous().iter().copied());

        for vtx in prev {
            self.update(&vtx);
        }
    }

    /// Memoized post-order pass over the ancestry of `vtx`: decides
    /// vertices whose parents permit it and records whether each visited
    /// vertex is strongly preferred / strongly virtuous.
    fn update(&mut self, vtx: &VertexRef) {
        let (vtx_id, status) = {
            let v = vtx.borrow();
            (v.id(), v.status())
        };
        if self.preference_cache.contains_key(&vtx_id) {
            return;
        }

        match status {
            Status::Accepted => {
                // An accepted vertex anchors every frontier until a tracked
                // descendant displaces it.
                self.preferred.insert(vtx_id);
                self.virtuous.insert(vtx_id);
                self.frontier.insert(vtx_id, vtx.clone());
                self.preference_cache.insert(vtx_id, true);
                self.virtuous_cache.insert(vtx_id, true);
                return;
            }
            Status::Rejected => {
                self.preference_cache.insert(vtx_id, false);
                self.virtuous_cache.insert(vtx_id, false);
                return;
            }
            Status::Processing => {}
        }

        let (txs, parents) = {
            let v = vtx.borrow();
            (v.txs(), v.parents())
        };

        let mut acceptable = true;
        let mut rejectable = false;
        let mut preferred = true;
        let mut virtuous = true;

        for tx in &txs {
            let (tx_id, tx_status) = {
                let t = tx.borrow();
                (t.id(), t.status())
            };
            if tx_status == Status::Rejected {
                rejectable = true;
                preferred = false;
                virtuous = false;
            }
            if tx_status != Status::Accepted {
                acceptable = false;
                preferred = preferred && self.cg.preferences().contains(&tx_id);
                virtuous = virtuous && self.cg.virtuous().contains(&tx_id);
            }
        }

        // Memoization bounds the recursion to one visit per undecided
        // ancestor; stack depth is bounded by the undecided ancestry depth.
        for dep in &parents {
            self.update(dep);

            let dep_id = dep.borrow().id();
            preferred = preferred && self.preference_cache.get(&dep_id).copied().unwrap_or(false);
            virtuous = virtuous && self.virtuous_cache.get(&dep_id).copied().unwrap_or(false);
        }

        // Parent statuses are re-read here: a parent may have been decided
        // during the recursion above.
        for dep in &parents {
            let dep_status = dep.borrow().status();
            if dep_status == Status::Rejected {
                vtx.borrow_mut().reject();
                self.nodes.remove(&vtx_id);
                let bytes = vtx.borrow().bytes();
                self.ctx.dispatcher.reject(self.ctx.chain_id, vtx_id, &bytes);
                self.metrics.rejected();
                tracing::debug!(vertex = ?vtx_id, "Vertex rejected: rejected parent");

                self.preference_cache.insert(vtx_id, false);
                self.virtuous_cache.insert(vtx_id, false);
                return;
            } else if dep_status != Status::Accepted {
                acceptable = false;
            }
        }

        // A vertex could also conflict directly with a transaction in its
        // own ancestry, which would make it rejectable here. Detecting that
        // takes a full ancestry traversal and only a misbehaving issuer can
        // produce such a vertex, so the check is omitted.

        for dep in &parents {
            self.frontier.remove(&dep.borrow().id());
        }
        self.frontier.insert(vtx_id, vtx.clone());

        self.preference_cache.insert(vtx_id, preferred);
        self.virtuous_cache.insert(vtx_id, virtuous);

        if preferred {
            self.preferred.insert(vtx_id);
            for dep in &parents {
                self.preferred.remove(&dep.borrow().id());
            }
            // Transactions carried by a preferred vertex are not orphans.
            for tx in &txs {
                let t = tx.borrow();
                if t.status() != Status::Accepted {
                    self.orphans.remove(&t.id());
                }
            }
        }

        if virtuous {
            self.virtuous.insert(vtx_id);
            for dep in &parents {
                self.virtuous.remove(&dep.borrow().id());
            }
        }

        // The frontier-set updates above must happen before the decision
        // below: the previous frontier may list a descendant before its
        // ancestor, and the antichain only survives if the sets are already
        // settled when the ancestor is decided.
        if acceptable {
            let bytes = vtx.borrow().bytes();
            self.ctx.dispatcher.accept(self.ctx.chain_id, vtx_id, &bytes);
            vtx.borrow_mut().accept();
            self.nodes.remove(&vtx_id);
            self.metrics.accepted();
            tracing::debug!(vertex = ?vtx_id, "Vertex accepted");
        } else if rejectable {
            vtx.borrow_mut().reject();
            let bytes = vtx.borrow().bytes();
            self.ctx.dispatcher.reject(self.ctx.chain_id, vtx_id, &bytes);
            self.nodes.remove(&vtx_id);
            self.metrics.rejected();
            tracing::debug!(vertex = ?vtx_id, "Vertex rejected: rejected transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::super::test_fixtures::{tx, vertex, vertex_with_status};
    use super::*;
    use crate::events::{Context, NullDispatcher};

    fn id(n: u8) -> Id {
        Id::new([n; 32])
    }

    fn params() -> Parameters {
        Parameters {
            k: 5,
            alpha: 4,
            beta_virtuous: 2,
            beta_rogue: 3,
            ..Parameters::default()
        }
    }

    fn engine_with_genesis() -> (Topological, VertexRef) {
        let genesis = vertex_with_status(0, vec![], vec![], Status::Accepted);
        let ctx = Context::new(id(200), Rc::new(NullDispatcher));
        let engine = Topological::new(ctx, params(), vec![genesis.clone()]).unwrap();
        (engine, genesis)
    }

    #[test]
    fn invalid_parameters_rejected() {
        let ctx = Context::new(id(200), Rc::new(NullDispatcher));
        let bad = Parameters {
            k: 5,
            alpha: 1,
            ..params()
        };
        assert!(Topological::new(ctx, bad, vec![]).is_err());
    }

    #[test]
    fn initialize_with_frontier_only() {
        let (engine, genesis) = engine_with_genesis();
        let genesis_id = genesis.borrow().id();
        // The accepted seed anchors both frontiers; nothing is orphaned.
        assert_eq!(engine.preferences().len(), 1);
        assert!(engine.preferences().contains(&genesis_id));
        assert!(engine.virtuous().contains(&genesis_id));
        assert!(engine.orphans().is_empty());
        assert!(engine.quiesce());
        assert!(engine.finalized());
    }

    #[test]
    fn add_is_idempotent() {
        let (mut engine, genesis) = engine_with_genesis();
        let v1 = vertex(1, vec![genesis], vec![tx(10, vec![id(100)])]);
        engine.add(v1.clone());
        let preferred = engine.preferences().clone();
        engine.add(v1.clone());
        assert_eq!(*engine.preferences(), preferred);
        assert!(engine.vertex_issued(&v1));
    }

    #[test]
    fn decided_vertex_not_tracked() {
        let (mut engine, genesis) = engine_with_genesis();
        let accepted = vertex_with_status(1, vec![genesis], vec![], Status::Accepted);
        engine.add(accepted.clone());
        assert!(engine.vertex_issued(&accepted));
        // It was never inserted, so the frontiers are untouched.
        assert!(!engine.preferences().contains(&id(1)));
    }

    #[test]
    fn txless_vertex_accepted_on_accepted_parent() {
        let (mut engine, genesis) = engine_with_genesis();
        let v1 = vertex(1, vec![genesis], vec![]);
        engine.add(v1.clone());
        assert_eq!(v1.borrow().status(), Status::Accepted);
        assert!(engine.preferences().contains(&id(1)));
    }

    #[test]
    fn empty_poll_changes_nothing() {
        let (mut engine, genesis) = engine_with_genesis();
        let v1 = vertex(1, vec![genesis], vec![tx(10, vec![id(100)])]);
        engine.add(v1);
        let preferred = engine.preferences().clone();
        let virtuous = engine.virtuous().clone();
        let orphans = engine.orphans().clone();

        engine.record_poll(UniqueBag::new());

        assert_eq!(*engine.preferences(), preferred);
        assert_eq!(*engine.virtuous(), virtuous);
        assert_eq!(*engine.orphans(), orphans);
    }

    #[test]
    fn vote_for_unknown_vertex_dropped() {
        let (mut engine, genesis) = engine_with_genesis();
        let t1 = tx(10, vec![id(100)]);
        let v1 = vertex(1, vec![genesis], vec![t1.clone()]);
        engine.add(v1);

        let mut responses = UniqueBag::new();
        for voter in 0..5 {
            responses.add(id(99), voter);
        }
        engine.record_poll(responses);
        // The unknown vote contributed nothing.
        assert_eq!(t1.borrow().status(), Status::Processing);
    }

    #[test]
    fn tx_issued_delegates_to_conflict_graph() {
        let (mut engine, genesis) = engine_with_genesis();
        let t1 = tx(10, vec![id(100)]);
        let t2 = tx(11, vec![id(101)]);
        engine.add(vertex(1, vec![genesis], vec![t1.clone()]));
        assert!(engine.tx_issued(&t1));
        assert!(!engine.tx_issued(&t2));
        assert!(engine.is_virtuous(&t2));
    }
}
