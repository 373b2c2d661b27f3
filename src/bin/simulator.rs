//! Firn consensus simulator.
//!
//! A standalone binary that drives a small vertex DAG — including a pair of
//! conflicting transactions — through unanimous polls until every vertex
//! and transaction is decided, logging the frontier evolution along the way.
//!
//! Usage: cargo run --bin simulator

use std::cell::RefCell;
use std::rc::Rc;

use firn::consensus::{Parameters, Status, Topological, Tx, TxRef, Vertex, VertexRef};
use firn::events::{Context, EventLogger};
use firn::ids::{Id, UniqueBag};

const MAX_POLLS: usize = 50;

struct SimTx {
    id: Id,
    inputs: Vec<Id>,
    status: Status,
}

impl Tx for SimTx {
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

struct SimVertex {
    id: Id,
    parents: Vec<VertexRef>,
    txs: Vec<TxRef>,
    status: Status,
    bytes: Vec<u8>,
}

impl Vertex for SimVertex {
    fn id(&self) -> Id {
        self.id
    }
    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
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

fn tx(name: &str, inputs: &[&str]) -> TxRef {
    Rc::new(RefCell::new(SimTx {
        id: Id::digest(name.as_bytes()),
        inputs: inputs.iter().map(|i| Id::digest(i.as_bytes())).collect(),
        status: Status::Processing,
    }))
}

fn vertex(name: &str, parents: Vec<VertexRef>, txs: Vec<TxRef>, status: Status) -> VertexRef {
    Rc::new(RefCell::new(SimVertex {
        id: Id::digest(name.as_bytes()),
        parents,
        txs,
        status,
        bytes: name.as_bytes().to_vec(),
    }))
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let params = Parameters {
        k: 5,
        alpha: 4,
        beta_virtuous: 2,
        beta_rogue: 3,
        namespace: "simulator".to_string(),
    };
    let ctx = Context::new(Id::digest(b"simulator-chain"), Rc::new(EventLogger));

    // genesis <- v1 <- v2 <- {conflict-a, conflict-b}
    let genesis = vertex("genesis", vec![], vec![], Status::Accepted);
    let mut engine =
        Topological::new(ctx, params, vec![genesis.clone()]).expect("default simulator parameters");

    let v1 = vertex("v1", vec![genesis], vec![tx("t1", &["in-1"])], Status::Processing);
    let v2 = vertex("v2", vec![v1.clone()], vec![tx("t2", &["in-2"])], Status::Processing);
    // Two vertices spending the same input: at most one can survive.
    let conflict_a = vertex(
        "conflict-a",
        vec![v2.clone()],
        vec![tx("t3a", &["in-3"])],
        Status::Processing,
    );
    let conflict_b = vertex(
        "conflict-b",
        vec![v2.clone()],
        vec![tx("t3b", &["in-3"])],
        Status::Processing,
    );

    engine.add(v1.clone());
    engine.add(v2.clone());
    engine.add(conflict_a.clone());
    engine.add(conflict_b.clone());

    // Every voter names conflict-a's side of the fork each round; a vote
    // for the tip is a vote for its whole ancestry.
    let favoured = conflict_a.borrow().id();
    let mut polls = 0;
    while !engine.finalized() && polls < MAX_POLLS {
        let mut responses = UniqueBag::new();
        for voter in 0..engine.parameters().k {
            responses.add(favoured, voter);
        }
        engine.record_poll(responses);
        polls += 1;

        tracing::info!(
            poll = polls,
            preferred = engine.preferences().len(),
            virtuous = engine.virtuous().len(),
            orphans = engine.orphans().len(),
            quiesce = engine.quiesce(),
            "Poll applied"
        );
    }

    println!("\nfinalized after {polls} polls");
    for (name, vtx) in [
        ("v1", &v1),
        ("v2", &v2),
        ("conflict-a", &conflict_a),
        ("conflict-b", &conflict_b),
    ] {
        println!("  {:<12} {:?}", name, vtx.borrow().status());
    }
}
