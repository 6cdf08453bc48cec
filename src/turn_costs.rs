//! Compiled turn-cost function
//!
//! Asking the weighting for every turn cost inside the witness-search loop
//! is too slow; reading the whole turn-cost table once and compiling it into
//! flat arrays keyed by via node pays for itself quickly during edge-based
//! preparation. Ranges per via node are small, so the query is a linear scan
//! over a packed pair array that stays in cache.

use anyhow::{bail, Result};
use log::debug;

use crate::weighting::Weighting;

/// Sentinel for "no edge" in turn-cost queries, e.g. at the start of a
/// search where there is no incoming edge yet.
pub const NO_EDGE: u32 = u32::MAX;

/// One `(from_edge, via_node, to_edge, cost)` tuple of the input turn-cost
/// table.
#[derive(Debug, Clone, Copy)]
pub struct TurnCostEntry {
    pub from_edge: u32,
    pub via_node: u32,
    pub to_edge: u32,
    pub cost: f64,
}

/// Turn costs resolved during witness search.
///
/// Node-based preparation uses [`TurnCostFunction::zero`], which returns 0
/// for every query including U-turns.
#[derive(Debug)]
pub enum TurnCostFunction {
    Zero,
    Table(TurnCostTable),
}

impl TurnCostFunction {
    pub fn zero() -> Self {
        TurnCostFunction::Zero
    }

    /// Compiles a turn-cost table for a graph with `nodes` nodes. `entries`
    /// must arrive in non-decreasing via-node order; the U-turn cost is
    /// probed once from the weighting.
    pub fn from_table<W, I>(nodes: u32, weighting: &W, entries: I) -> Result<Self>
    where
        W: Weighting + ?Sized,
        I: IntoIterator<Item = TurnCostEntry>,
    {
        let u_turn_cost = weighting.turn_weight(1, 0, 1);
        let mut edge_pairs: Vec<u64> = Vec::new();
        let mut costs: Vec<f64> = Vec::new();
        let mut first_entry_by_node = vec![0u32; nodes as usize + 1];
        let mut last_node: i64 = -1;
        for entry in entries {
            let via = entry.via_node as i64;
            if via < last_node {
                bail!(
                    "turn cost entries must be ordered by via node, got {} after {}",
                    entry.via_node,
                    last_node
                );
            }
            if entry.via_node >= nodes {
                bail!(
                    "turn cost via node {} out of range for {} nodes",
                    entry.via_node,
                    nodes
                );
            }
            let index = edge_pairs.len() as u32;
            edge_pairs.push((entry.from_edge as u64) | ((entry.to_edge as u64) << 32));
            costs.push(entry.cost);
            if via != last_node {
                // back-fill skipped via nodes so every range is contiguous
                for node in (last_node + 1)..=via {
                    first_entry_by_node[node as usize] = index;
                }
            }
            last_node = via;
        }
        for node in (last_node + 1)..=(nodes as i64) {
            first_entry_by_node[node as usize] = edge_pairs.len() as u32;
        }
        debug!(
            "compiled turn cost table: {} entries, u-turn cost {}",
            edge_pairs.len(),
            u_turn_cost
        );
        Ok(TurnCostFunction::Table(TurnCostTable {
            edge_pairs,
            costs,
            first_entry_by_node,
            u_turn_cost,
        }))
    }

    #[inline]
    pub fn turn_weight(&self, in_edge: u32, via_node: u32, out_edge: u32) -> f64 {
        match self {
            TurnCostFunction::Zero => 0.0,
            TurnCostFunction::Table(table) => table.turn_weight(in_edge, via_node, out_edge),
        }
    }
}

/// Flat-array turn-cost storage: packed `(from, to)` edge pairs and their
/// costs, grouped per via node by a prefix table of length `nodes + 1`.
#[derive(Debug)]
pub struct TurnCostTable {
    /// Low half = from-edge, high half = to-edge.
    edge_pairs: Vec<u64>,
    costs: Vec<f64>,
    first_entry_by_node: Vec<u32>,
    u_turn_cost: f64,
}

impl TurnCostTable {
    fn turn_weight(&self, in_edge: u32, via_node: u32, out_edge: u32) -> f64 {
        if in_edge == NO_EDGE || out_edge == NO_EDGE {
            return 0.0;
        }
        if in_edge == out_edge {
            return self.u_turn_cost;
        }
        let start = self.first_entry_by_node[via_node as usize] as usize;
        let end = self.first_entry_by_node[via_node as usize + 1] as usize;
        for i in start..end {
            let pair = self.edge_pairs[i];
            if (pair & 0xffff_ffff) as u32 == in_edge && (pair >> 32) as u32 == out_edge {
                return self.costs[i];
            }
        }
        0.0
    }
}
