//! Directed conflict graph: transaction-level consensus.
//!
//! Transactions conflict when they consume a common input. Conflicting
//! pairs are joined by a directed edge pointing from the currently
//! preferred transaction to the losing one, so the preference among a
//! conflict set is read off the graph as "no incoming edges". Successful
//! polls build confidence and may flip edges toward the better-supported
//! side; enough consecutive confidence decides a transaction and sweeps
//! its conflict set to Rejected.
//!
//! Invariants between calls:
//! - `spenders[input]` lists exactly the undecided transactions consuming
//!   `input`; entries leave the index the moment they are decided.
//! - every conflicting undecided pair shares exactly one edge.
//! - `preferences` = undecided transactions with no incoming edge.
//! - `rogue` is sticky: a transaction that has ever seen a conflict stays
//!   rogue even if every conflict is later rejected.

use std::collections::{HashMap, HashSet};

use crate::ids::{Bag, Id};

use super::{ConflictGraph, Parameters, TxRef};

/// Per-transaction voting state.
struct TxNode {
    tx: TxRef,
    /// Conflicting transactions currently preferred over this one.
    ins: HashSet<Id>,
    /// Conflicting transactions this one is currently preferred over.
    outs: HashSet<Id>,
    /// Consecutive successful polls.
    confidence: u64,
    /// Cumulative successful polls, the tie-breaker between conflicts.
    successful_polls: u64,
    /// Poll index of the most recent successful poll.
    last_poll: u64,
    /// Whether this transaction has ever had a conflict.
    rogue: bool,
}

/// Directed conflict graph over externally owned transactions.
pub struct Directed {
    params: Parameters,
    /// Undecided transactions by id.
    txs: HashMap<Id, TxNode>,
    /// Input id -> undecided transactions consuming it.
    spenders: HashMap<Id, HashSet<Id>>,
    preferences: HashSet<Id>,
    virtuous: HashSet<Id>,
    /// Virtuous transactions still awaiting a decision; drives `quiesce`.
    virtuous_voting: HashSet<Id>,
    /// Number of polls recorded so far.
    current_poll: u64,
}

impl Directed {
    pub fn new(params: Parameters) -> Self {
        Directed {
            params,
            txs: HashMap::new(),
            spenders: HashMap::new(),
            preferences: HashSet::new(),
            virtuous: HashSet::new(),
            virtuous_voting: HashSet::new(),
            current_poll: 0,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Flip the edge `from -> to`: `to` has out-voted `from`.
    fn redirect(&mut self, from: Id, to: Id) {
        if let Some(loser) = self.txs.get_mut(&from) {
            loser.outs.remove(&to);
            loser.ins.insert(to);
        }
        self.preferences.remove(&from);
        if let Some(winner) = self.txs.get_mut(&to) {
            winner.ins.remove(&from);
            winner.outs.insert(from);
            if winner.ins.is_empty() {
                self.preferences.insert(to);
            }
        }
    }

    /// Drop `tx_id` from the spender index.
    fn unindex_inputs(&mut self, tx_id: Id, inputs: &[Id]) {
        for input in inputs {
            if let Some(spenders) = self.spenders.get_mut(input) {
                spenders.remove(&tx_id);
                if spenders.is_empty() {
                    self.spenders.remove(input);
                }
            }
        }
    }

    /// Accept `tx_id` and reject its entire conflict set.
    fn accept_tx(&mut self, tx_id: Id) {
        let Some(node) = self.txs.remove(&tx_id) else {
            return;
        };
        self.preferences.remove(&tx_id);
        self.virtuous.remove(&tx_id);
        self.virtuous_voting.remove(&tx_id);
        let inputs = node.tx.borrow().input_ids();
        self.unindex_inputs(tx_id, &inputs);

        tracing::debug!(tx = %tx_id, confidence = node.confidence, "Transaction accepted");
        node.tx.borrow_mut().accept();

        for conflict_id in node.ins.union(&node.outs) {
            self.reject_tx(*conflict_id);
        }
    }

    /// Reject `tx_id`, unhooking its edges. A surviving neighbour with no
    /// remaining incoming edge becomes preferred.
    fn reject_tx(&mut self, tx_id: Id) {
        let Some(node) = self.txs.remove(&tx_id) else {
            return;
        };
        self.preferences.remove(&tx_id);
        let inputs = node.tx.borrow().input_ids();
        self.unindex_inputs(tx_id, &inputs);

        tracing::debug!(tx = %tx_id, "Transaction rejected");
        node.tx.borrow_mut().reject();

        for neighbour_id in node.ins.union(&node.outs) {
            if let Some(neighbour) = self.txs.get_mut(neighbour_id) {
                neighbour.ins.remove(&tx_id);
                neighbour.outs.remove(&tx_id);
                if neighbour.ins.is_empty() {
                    self.preferences.insert(*neighbour_id);
                }
            }
        }
    }
}

impl ConflictGraph for Directed {
    fn add(&mut self, tx: TxRef) {
        if self.issued(&tx) {
            return;
        }
        let (tx_id, inputs) = {
            let tx = tx.borrow();
            (tx.id(), tx.input_ids())
        };

        let mut conflicts: HashSet<Id> = HashSet::new();
        for input in &inputs {
            if let Some(spenders) = self.spenders.get(input) {
                conflicts.extend(spenders.iter().copied());
            }
        }
        for input in &inputs {
            self.spenders.entry(*input).or_default().insert(tx_id);
        }

        let mut node = TxNode {
            tx,
            ins: HashSet::new(),
            outs: HashSet::new(),
            confidence: 0,
            successful_polls: 0,
            last_poll: 0,
            rogue: !conflicts.is_empty(),
        };

        // Existing spenders were issued first and keep their preference:
        // every edge starts pointing at the newcomer.
        for conflict_id in &conflicts {
            if let Some(conflict) = self.txs.get_mut(conflict_id) {
                if !conflict.rogue {
                    conflict.rogue = true;
                    self.virtuous.remove(conflict_id);
                    self.virtuous_voting.remove(conflict_id);
                }
                conflict.outs.insert(tx_id);
                node.ins.insert(*conflict_id);
            }
        }

        if node.rogue {
            tracing::debug!(tx = %tx_id, conflicts = conflicts.len(), "Rogue transaction issued");
        } else {
            self.virtuous.insert(tx_id);
            self.virtuous_voting.insert(tx_id);
        }
        if node.ins.is_empty() {
            self.preferences.insert(tx_id);
        }
        self.txs.insert(tx_id, node);
    }

    fn issued(&self, tx: &TxRef) -> bool {
        let tx = tx.borrow();
        tx.status().decided() || self.txs.contains_key(&tx.id())
    }

    fn record_poll(&mut self, votes: Bag) {
        self.current_poll += 1;

        // Sorted so that a poll deciding several transactions does so in a
        // deterministic order.
        let mut successful: Vec<Id> = votes.threshold_met().iter().copied().collect();
        successful.sort_unstable();

        for tx_id in successful {
            let Some(node) = self.txs.get_mut(&tx_id) else {
                // Decided since the poll was sampled, or never issued.
                continue;
            };

            // Confidence counts consecutive successful polls; a missed poll
            // in between resets the chain.
            node.confidence = if node.last_poll + 1 == self.current_poll {
                node.confidence + 1
            } else {
                1
            };
            node.last_poll = self.current_poll;
            node.successful_polls += 1;

            let successful_polls = node.successful_polls;
            let confidence = node.confidence;
            let rogue = node.rogue;
            let ins: Vec<Id> = node.ins.iter().copied().collect();

            for conflict_id in ins {
                let outvoted = self
                    .txs
                    .get(&conflict_id)
                    .is_some_and(|conflict| conflict.successful_polls < successful_polls);
                if outvoted {
                    self.redirect(conflict_id, tx_id);
                }
            }

            if (!rogue && confidence >= self.params.beta_virtuous)
                || confidence >= self.params.beta_rogue
            {
                self.accept_tx(tx_id);
            }
        }
    }

    fn preferences(&self) -> &HashSet<Id> {
        &self.preferences
    }

    fn virtuous(&self) -> &HashSet<Id> {
        &self.virtuous
    }

    fn is_virtuous(&self, tx: &TxRef) -> bool {
        let tx = tx.borrow();
        if let Some(node) = self.txs.get(&tx.id()) {
            return !node.rogue;
        }
        // Not yet issued: virtuous iff nothing undecided spends its inputs.
        tx.input_ids()
            .iter()
            .all(|input| !self.spenders.contains_key(input))
    }

    fn quiesce(&self) -> bool {
        self.virtuous_voting.is_empty()
    }

    fn finalized(&self) -> bool {
        self.txs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::tx;
    use super::super::Status;
    use super::*;

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

    /// A poll in which each listed tx met the alpha threshold.
    fn poll(cg: &mut Directed, successful: &[Id]) {
        let alpha = cg.parameters().alpha as u64;
        let mut bag = Bag::new();
        bag.set_threshold(alpha);
        for tx_id in successful {
            bag.add_count(*tx_id, alpha);
        }
        cg.record_poll(bag);
    }

    #[test]
    fn conflict_free_tx_is_virtuous_and_preferred() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        cg.add(t1.clone());

        assert!(cg.issued(&t1));
        assert!(cg.virtuous().contains(&id(1)));
        assert!(cg.preferences().contains(&id(1)));
        assert!(cg.is_virtuous(&t1));
        assert!(!cg.quiesce());
        assert!(!cg.finalized());
    }

    #[test]
    fn shared_input_marks_both_rogue() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        let t2 = tx(2, vec![id(100)]);
        cg.add(t1.clone());
        cg.add(t2.clone());

        assert!(!cg.is_virtuous(&t1));
        assert!(!cg.is_virtuous(&t2));
        assert!(cg.virtuous().is_empty());
        // First spender keeps the preference.
        assert!(cg.preferences().contains(&id(1)));
        assert!(!cg.preferences().contains(&id(2)));
        // No virtuous tx left voting.
        assert!(cg.quiesce());
    }

    #[test]
    fn unissued_tx_virtuous_check_inspects_spenders() {
        let mut cg = Directed::new(params());
        cg.add(tx(1, vec![id(100)]));

        let contested = tx(2, vec![id(100), id(101)]);
        let clean = tx(3, vec![id(101)]);
        assert!(!cg.is_virtuous(&contested));
        assert!(cg.is_virtuous(&clean));
    }

    #[test]
    fn virtuous_tx_accepted_at_beta_virtuous() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        cg.add(t1.clone());

        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Processing);
        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Accepted);
        assert!(cg.quiesce());
        assert!(cg.finalized());
        assert!(cg.preferences().is_empty());
        assert!(cg.virtuous().is_empty());
    }

    #[test]
    fn missed_poll_resets_confidence() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        cg.add(t1.clone());

        poll(&mut cg, &[id(1)]);
        poll(&mut cg, &[]); // chain broken
        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Processing);
        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Accepted);
    }

    #[test]
    fn rogue_tx_needs_beta_rogue() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        let t2 = tx(2, vec![id(100)]);
        cg.add(t1.clone());
        cg.add(t2.clone());

        poll(&mut cg, &[id(1)]);
        poll(&mut cg, &[id(1)]);
        // beta_virtuous reached, but t1 is rogue and needs beta_rogue.
        assert_eq!(t1.borrow().status(), Status::Processing);
        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Accepted);
        // Accepting t1 rejects its conflict.
        assert_eq!(t2.borrow().status(), Status::Rejected);
        assert!(cg.finalized());
    }

    #[test]
    fn successful_polls_flip_preference() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        let t2 = tx(2, vec![id(100)]);
        cg.add(t1);
        cg.add(t2);
        assert!(cg.preferences().contains(&id(1)));

        // t2 out-votes t1.
        poll(&mut cg, &[id(2)]);
        assert!(!cg.preferences().contains(&id(1)));
        assert!(cg.preferences().contains(&id(2)));

        // A tie does not flip back: strictly more successes are required.
        poll(&mut cg, &[id(1)]);
        assert!(cg.preferences().contains(&id(2)));
        assert!(!cg.preferences().contains(&id(1)));
    }

    #[test]
    fn rejection_promotes_surviving_neighbour() {
        let mut cg = Directed::new(params());
        // t2 conflicts with both t1 and t3; t1 and t3 are independent.
        let t1 = tx(1, vec![id(100)]);
        let t2 = tx(2, vec![id(100), id(101)]);
        let t3 = tx(3, vec![id(101)]);
        cg.add(t1.clone());
        cg.add(t2.clone());
        cg.add(t3.clone());

        // Drive t1 to acceptance (rogue, needs beta_rogue = 3).
        poll(&mut cg, &[id(1)]);
        poll(&mut cg, &[id(1)]);
        poll(&mut cg, &[id(1)]);
        assert_eq!(t1.borrow().status(), Status::Accepted);
        assert_eq!(t2.borrow().status(), Status::Rejected);
        // t3 survives, loses its only conflict, and is preferred again.
        assert_eq!(t3.borrow().status(), Status::Processing);
        assert!(cg.preferences().contains(&id(3)));
        // Rogue is sticky: t3 is not virtuous even with t2 gone.
        assert!(!cg.virtuous().contains(&id(3)));
    }

    #[test]
    fn double_add_ignored() {
        let mut cg = Directed::new(params());
        let t1 = tx(1, vec![id(100)]);
        cg.add(t1.clone());
        cg.add(t1.clone());
        assert!(cg.is_virtuous(&t1));
        assert_eq!(cg.preferences().len(), 1);
    }

    #[test]
    fn vote_for_unknown_tx_ignored() {
        let mut cg = Directed::new(params());
        cg.add(tx(1, vec![id(100)]));
        poll(&mut cg, &[id(9)]);
        assert!(!cg.finalized());
    }
}
