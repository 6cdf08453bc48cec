//! ch-prep: In-memory preparation graph for Contraction Hierarchy construction
//!
//! A CH is built by contracting nodes in priority order: for each node the
//! driver enumerates its current neighbors, runs witness searches, inserts
//! shortcuts for unwitnessed paths and removes the node from the search
//! graph. This crate provides the mutable working graph those steps read
//! from and write to:
//!
//! - [`PrepareGraph`] - the facade: base-edge loading, the transition into
//!   the contraction phase, shortcut insertion, disconnection, degree
//!   queries
//! - [`EdgeExplorer`] - direction-filtered cursors over a node's edge list
//! - [`OrigEdgeExplorer`] (edge-based mode) - cursors over a frozen CSR of
//!   the original, pre-contraction edges for turn-cost evaluation and
//!   edge-key derivation
//! - [`TurnCostFunction`] - the turn-cost table compiled into flat arrays
//!
//! Key principle: one record per edge/shortcut, shared by both endpoint
//! slots. Explorers filter shortcuts by direction instead of duplicating
//! records, which halves the shortcut storage.
//!
//! The ordering heuristic, the witness search itself and the final
//! persisted CH are external collaborators; they reach this crate through
//! the [`GraphView`] and [`Weighting`] seams.

pub mod array2d;
pub mod edge;
pub mod graph;
pub mod orig_graph;
pub mod turn_costs;
pub mod weighting;

pub use edge::edge_key;
pub use graph::{EdgeExplorer, PrepareGraph};
pub use orig_graph::OrigEdgeExplorer;
pub use turn_costs::{TurnCostEntry, TurnCostFunction, NO_EDGE};
pub use weighting::{GraphView, InputEdge, Weighting};
