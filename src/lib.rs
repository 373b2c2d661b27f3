//! # Firn
//!
//! A DAG consensus core in the Avalanche protocol family:
//! - **Leaderless, poll-driven consensus** — repeated network samples drive
//!   every vertex and transaction to Accepted or Rejected
//! - **Topological vote aggregation** — one poll response propagates through
//!   the whole reachable ancestry in a single Kahn-style traversal
//! - **Embedded conflict graph** — transaction-level conflicts are resolved
//!   by a directed conflict graph with confidence thresholds
//! - **Frontier tracking** — the preferred, virtuous, and orphan frontiers
//!   are recomputed after every poll for vertex building and quiescence
//!
//! The crate is deliberately transport-free: vertex encoding, signature
//! verification, poll sampling, and persistence live with the caller. The
//! engine consumes shared vertex handles and a stream of poll results, and
//! exposes the decision frontiers in return.

pub mod consensus;
pub mod events;
pub mod ids;

mod metrics;
