//! Preparation graph facade
//!
//! The mutable working graph of CH preparation. Base edges are loaded while
//! the graph is in the building phase; `prepare_for_contraction` freezes the
//! original-graph side structure and switches to the ready phase, after
//! which the contraction driver interleaves explorer traversals, shortcut
//! insertion and node disconnection.
//!
//! One record per edge/shortcut is shared by both endpoint slots; explorers
//! filter shortcuts by direction instead of duplicating records, which
//! halves the shortcut storage.

use std::sync::Arc;

use anyhow::{bail, Result};
use log::debug;
use rustc_hash::FxHashSet;

use crate::array2d::Array2D;
use crate::edge::{edge_key, BaseEdge, Shortcut};
use crate::orig_graph::{OrigEdgeExplorer, OrigGraph, OrigGraphBuilder};
use crate::turn_costs::TurnCostFunction;
use crate::weighting::{GraphView, Weighting};

/// Rows of the adjacency store start with room for two handles; road-network
/// nodes rarely exceed degree four.
const INITIAL_SLOT_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Ready,
    Closed,
}

/// Graph data structure used for CH preparation.
///
/// Caches all edge weights up front and allows edges that are no longer
/// needed (those adjacent to contracted nodes) to be removed, see
/// [`disconnect`](PrepareGraph::disconnect).
#[derive(Debug)]
pub struct PrepareGraph {
    nodes: u32,
    edges: u32,
    edge_based: bool,
    turn_cost_function: TurnCostFunction,
    /// Edge handles per node. Base edges occupy handles `[0, edges)`,
    /// shortcuts `[edges, edges + shortcuts.len())`; the handle alone
    /// distinguishes the two classes.
    prepare_edges: Array2D<u32>,
    /// Indexed by edge id. `None` for ids that were never materialized
    /// because both directions were forbidden.
    base_edges: Vec<Option<BaseEdge>>,
    /// Indexed by `handle - edges`.
    shortcuts: Vec<Shortcut>,
    orig_graph_builder: Option<OrigGraphBuilder>,
    orig_graph: Option<Arc<OrigGraph>>,
    phase: Phase,
}

impl PrepareGraph {
    /// Preparation graph without turn costs.
    pub fn node_based(nodes: u32, edges: u32) -> Self {
        Self::new(nodes, edges, false, TurnCostFunction::zero())
    }

    /// Preparation graph with turn costs; shortcuts carry original-edge
    /// keys and the original graph is frozen for turn-cost resolution.
    pub fn edge_based(nodes: u32, edges: u32, turn_cost_function: TurnCostFunction) -> Self {
        Self::new(nodes, edges, true, turn_cost_function)
    }

    /// `edges` is the number of base edges of the input graph; `edges - 1`
    /// is the highest edge id that may be added.
    fn new(nodes: u32, edges: u32, edge_based: bool, turn_cost_function: TurnCostFunction) -> Self {
        PrepareGraph {
            nodes,
            edges,
            edge_based,
            turn_cost_function,
            prepare_edges: Array2D::new(nodes as usize, INITIAL_SLOT_CAPACITY),
            base_edges: vec![None; edges as usize],
            shortcuts: Vec::new(),
            orig_graph_builder: edge_based.then(OrigGraphBuilder::default),
            orig_graph: None,
            phase: Phase::Building,
        }
    }

    /// Bulk-loads all edges of `graph` with weights resolved through
    /// `weighting`, then transitions to the ready phase. Fails before any
    /// mutation if the shapes do not match.
    pub fn build_from(
        &mut self,
        graph: &(impl GraphView + ?Sized),
        weighting: &(impl Weighting + ?Sized),
    ) -> Result<()> {
        if graph.node_count() != self.nodes {
            bail!(
                "cannot initialize from the given graph, node counts do not match: {} vs. {}",
                graph.node_count(),
                self.nodes
            );
        }
        if graph.edge_count() != self.edges {
            bail!(
                "cannot initialize from the given graph, edge counts do not match: {} vs. {}",
                graph.edge_count(),
                self.edges
            );
        }
        graph.for_each_edge(&mut |e| {
            let weight_fwd = if e.fwd_access {
                weighting.edge_weight(e.edge, false)
            } else {
                f64::INFINITY
            };
            let weight_bwd = if e.bwd_access {
                weighting.edge_weight(e.edge, true)
            } else {
                f64::INFINITY
            };
            self.add_edge(e.node_a, e.node_b, e.edge, weight_fwd, weight_bwd);
        });
        self.prepare_for_contraction();
        Ok(())
    }

    pub fn node_count(&self) -> u32 {
        self.nodes
    }

    /// The number of base edges this graph was created for; shortcut
    /// handles start here.
    pub fn original_edge_count(&self) -> u32 {
        self.edges
    }

    pub fn shortcut_count(&self) -> u32 {
        self.shortcuts.len() as u32
    }

    pub fn degree(&self, node: u32) -> usize {
        self.prepare_edges.size(node as usize)
    }

    /// Adds a base edge. A direction with a non-finite weight is forbidden;
    /// if both directions are forbidden the edge is not materialized at all.
    pub fn add_edge(&mut self, from: u32, to: u32, edge: u32, weight_fwd: f64, weight_bwd: f64) {
        self.check_building("add_edge");
        let fwd = weight_fwd.is_finite();
        let bwd = weight_bwd.is_finite();
        if !fwd && !bwd {
            return;
        }
        debug_assert!(!fwd || weight_fwd >= 0.0);
        debug_assert!(!bwd || weight_bwd >= 0.0);
        // narrowed to f32; a finite weight beyond f32 range would silently
        // become an access change
        let weight_ab = weight_fwd as f32;
        let weight_ba = weight_bwd as f32;
        debug_assert_eq!(fwd, weight_ab.is_finite(), "edge weight overflows f32");
        debug_assert_eq!(bwd, weight_ba.is_finite(), "edge weight overflows f32");
        self.base_edges[edge as usize] = Some(BaseEdge {
            node_a: from,
            node_b: to,
            weight_ab,
            weight_ba,
        });
        self.prepare_edges.add(from as usize, edge);
        if from != to {
            self.prepare_edges.add(to as usize, edge);
        }
        if let Some(builder) = &mut self.orig_graph_builder {
            builder.add_edge(from, to, edge, fwd, bwd);
        }
    }

    /// Adds a directed shortcut `from -> to` and returns its handle.
    /// Handles are assigned monotonically starting at the base edge count.
    /// The original-edge keys are ignored for node-based graphs.
    #[allow(clippy::too_many_arguments)]
    pub fn add_shortcut(
        &mut self,
        from: u32,
        to: u32,
        orig_key_first: u32,
        orig_key_last: u32,
        skipped1: u32,
        skipped2: u32,
        weight: f64,
        orig_edge_count: u32,
    ) -> u32 {
        self.check_ready("add_shortcut");
        debug_assert!(weight.is_finite());
        let handle = self.edges + self.shortcuts.len() as u32;
        self.shortcuts.push(Shortcut {
            node_a: from,
            node_b: to,
            weight,
            skipped1,
            skipped2,
            orig_edge_count,
            orig_keys: self.edge_based.then_some((orig_key_first, orig_key_last)),
        });
        self.prepare_edges.add(from as usize, handle);
        if from != to {
            self.prepare_edges.add(to as usize, handle);
        }
        handle
    }

    /// Freezes the original graph (edge-based mode) and enables shortcut
    /// insertion, explorers and disconnection.
    pub fn prepare_for_contraction(&mut self) {
        self.check_building("prepare_for_contraction");
        self.orig_graph = self
            .orig_graph_builder
            .take()
            .map(|builder| Arc::new(builder.build(self.nodes)));
        self.phase = Phase::Ready;
        debug!(
            "prepare graph ready: {} nodes, {} edge slots",
            self.nodes, self.edges
        );
    }

    pub fn out_edge_explorer(&self) -> EdgeExplorer {
        self.check_ready("out_edge_explorer");
        EdgeExplorer::new(false)
    }

    pub fn in_edge_explorer(&self) -> EdgeExplorer {
        self.check_ready("in_edge_explorer");
        EdgeExplorer::new(true)
    }

    pub fn out_orig_edge_explorer(&self) -> OrigEdgeExplorer {
        self.check_ready("out_orig_edge_explorer");
        OrigEdgeExplorer::new(self.orig_graph(), false)
    }

    pub fn in_orig_edge_explorer(&self) -> OrigEdgeExplorer {
        self.check_ready("in_orig_edge_explorer");
        OrigEdgeExplorer::new(self.orig_graph(), true)
    }

    fn orig_graph(&self) -> Arc<OrigGraph> {
        match &self.orig_graph {
            Some(graph) => Arc::clone(graph),
            None => panic!("original edge explorers are not available for node-based graphs"),
        }
    }

    pub fn turn_weight(&self, in_edge: u32, via_node: u32, out_edge: u32) -> f64 {
        if self.phase == Phase::Closed {
            panic!("turn_weight cannot be called after close()");
        }
        self.turn_cost_function
            .turn_weight(in_edge, via_node, out_edge)
    }

    /// Removes every edge referenced by `node` from the slots of its
    /// neighbors and empties `node`'s slot. Returns the distinct neighbors
    /// in the order the connecting edges were originally added; the
    /// contraction driver relies on this order for reproducible priority
    /// updates.
    pub fn disconnect(&mut self, node: u32) -> Vec<u32> {
        self.check_ready("disconnect");
        let mut seen: FxHashSet<u32> = FxHashSet::default();
        let mut neighbors = Vec::with_capacity(self.degree(node));
        for i in 0..self.prepare_edges.size(node as usize) {
            let handle = self.prepare_edges.get(node as usize, i);
            let (node_a, node_b) = self.edge_nodes(handle);
            let adj = if node_b == node { node_a } else { node_b };
            if adj == node {
                // loop, only referenced from this slot
                continue;
            }
            self.prepare_edges.remove(adj as usize, handle);
            if seen.insert(adj) {
                neighbors.push(adj);
            }
        }
        self.prepare_edges.clear(node as usize);
        neighbors
    }

    /// Releases all storage. The graph accepts no further operations.
    pub fn close(&mut self) {
        self.check_ready("close");
        self.prepare_edges = Array2D::new(0, INITIAL_SLOT_CAPACITY);
        self.base_edges = Vec::new();
        self.shortcuts = Vec::new();
        self.orig_graph = None;
        self.phase = Phase::Closed;
    }

    fn edge_nodes(&self, handle: u32) -> (u32, u32) {
        if handle < self.edges {
            let e = self.base_edge(handle);
            (e.node_a, e.node_b)
        } else {
            let s = &self.shortcuts[(handle - self.edges) as usize];
            (s.node_a, s.node_b)
        }
    }

    fn base_edge(&self, handle: u32) -> &BaseEdge {
        self.base_edges[handle as usize]
            .as_ref()
            .expect("edge handle does not refer to a materialized base edge")
    }

    fn shortcut_mut(&mut self, handle: u32) -> &mut Shortcut {
        assert!(
            handle >= self.edges,
            "base edges cannot be mutated (prepare edge {handle})"
        );
        &mut self.shortcuts[(handle - self.edges) as usize]
    }

    fn edge_view(&self, handle: u32) -> EdgeView {
        if handle < self.edges {
            let e = self.base_edge(handle);
            EdgeView {
                handle,
                is_shortcut: false,
                node_a: e.node_a,
                node_b: e.node_b,
                weight_ab: e.weight_ab as f64,
                weight_ba: e.weight_ba as f64,
                skipped1: 0,
                skipped2: 0,
                orig_edge_count: 1,
                keys: KeyView::Base { edge: handle },
            }
        } else {
            let s = &self.shortcuts[(handle - self.edges) as usize];
            EdgeView {
                handle,
                is_shortcut: true,
                node_a: s.node_a,
                node_b: s.node_b,
                weight_ab: s.weight,
                weight_ba: s.weight,
                skipped1: s.skipped1,
                skipped2: s.skipped2,
                orig_edge_count: s.orig_edge_count,
                keys: match s.orig_keys {
                    Some((first, last)) => KeyView::Shortcut { first, last },
                    None => KeyView::NodeBased,
                },
            }
        }
    }

    fn check_ready(&self, operation: &str) {
        match self.phase {
            Phase::Ready => {}
            Phase::Building => {
                panic!("{operation} requires prepare_for_contraction() to be called first")
            }
            Phase::Closed => panic!("{operation} cannot be called after close()"),
        }
    }

    fn check_building(&self, operation: &str) {
        match self.phase {
            Phase::Building => {}
            Phase::Ready => {
                panic!("{operation} cannot be called after prepare_for_contraction()")
            }
            Phase::Closed => panic!("{operation} cannot be called after close()"),
        }
    }
}

/// Copied projection of the record an [`EdgeExplorer`] is positioned on.
#[derive(Debug, Clone, Copy)]
struct EdgeView {
    handle: u32,
    is_shortcut: bool,
    node_a: u32,
    node_b: u32,
    weight_ab: f64,
    weight_ba: f64,
    skipped1: u32,
    skipped2: u32,
    orig_edge_count: u32,
    keys: KeyView,
}

#[derive(Debug, Clone, Copy)]
enum KeyView {
    /// Base edge: keys are derived from the edge id and node ordering.
    Base { edge: u32 },
    /// Edge-based shortcut: the stored pair, independent of orientation.
    Shortcut { first: u32, last: u32 },
    /// Node-based shortcut: querying keys is a programmer error.
    NodeBased,
}

/// Stateful cursor over one node's edge list.
///
/// Base edges are always emitted (access is encoded in the per-direction
/// weights, consumers filter); shortcuts are emitted only in their
/// direction: forward explorers yield a shortcut at its `from` endpoint,
/// reverse explorers at its `to` endpoint.
///
/// The explorer holds no borrow of the graph: `next` takes `&PrepareGraph`
/// and the setters `&mut PrepareGraph`, so the contraction loop can mutate
/// other nodes' slots between calls. Mutating the slot under an unfinished
/// iteration is not supported.
#[derive(Debug)]
pub struct EdgeExplorer {
    reverse: bool,
    node: u32,
    next_index: usize,
    current: Option<EdgeView>,
}

impl EdgeExplorer {
    fn new(reverse: bool) -> Self {
        EdgeExplorer {
            reverse,
            node: 0,
            next_index: 0,
            current: None,
        }
    }

    pub fn set_base_node(&mut self, node: u32) -> &mut Self {
        self.node = node;
        self.next_index = 0;
        self.current = None;
        self
    }

    /// Advances to the next yieldable edge; returns false when the slot is
    /// exhausted.
    pub fn next(&mut self, graph: &PrepareGraph) -> bool {
        while self.next_index < graph.prepare_edges.size(self.node as usize) {
            let handle = graph.prepare_edges.get(self.node as usize, self.next_index);
            self.next_index += 1;
            let view = graph.edge_view(handle);
            let yields = !view.is_shortcut
                || (!self.reverse && view.node_a == self.node)
                || (self.reverse && view.node_b == self.node);
            if yields {
                self.current = Some(view);
                return true;
            }
        }
        self.current = None;
        false
    }

    pub fn base_node(&self) -> u32 {
        self.node
    }

    pub fn adj_node(&self) -> u32 {
        let c = self.current();
        if c.node_a == self.node {
            c.node_b
        } else {
            c.node_a
        }
    }

    pub fn prepare_edge(&self) -> u32 {
        self.current().handle
    }

    pub fn is_shortcut(&self) -> bool {
        self.current().is_shortcut
    }

    /// Weight of the current edge seen from the base node: base-to-adj for
    /// forward explorers, adj-to-base for reverse explorers.
    pub fn weight(&self) -> f64 {
        let c = self.current();
        if (c.node_a == self.node) != self.reverse {
            c.weight_ab
        } else {
            c.weight_ba
        }
    }

    pub fn orig_edge_key_first(&self) -> u32 {
        let c = self.current();
        match c.keys {
            KeyView::Base { edge } => {
                if c.node_a == self.node {
                    edge_key(edge, c.node_a, c.node_b)
                } else {
                    edge_key(edge, c.node_b, c.node_a)
                }
            }
            KeyView::Shortcut { first, .. } => first,
            KeyView::NodeBased => {
                panic!("original edge keys are not supported for node-based shortcuts")
            }
        }
    }

    pub fn orig_edge_key_last(&self) -> u32 {
        let c = self.current();
        match c.keys {
            KeyView::Base { .. } => self.orig_edge_key_first(),
            KeyView::Shortcut { last, .. } => last,
            KeyView::NodeBased => {
                panic!("original edge keys are not supported for node-based shortcuts")
            }
        }
    }

    pub fn skipped1(&self) -> u32 {
        let c = self.current();
        assert!(c.is_shortcut, "skipped edges are not stored for base edges");
        c.skipped1
    }

    pub fn skipped2(&self) -> u32 {
        let c = self.current();
        assert!(c.is_shortcut, "skipped edges are not stored for base edges");
        c.skipped2
    }

    pub fn orig_edge_count(&self) -> u32 {
        self.current().orig_edge_count
    }

    pub fn set_skipped_edges(&mut self, graph: &mut PrepareGraph, skipped1: u32, skipped2: u32) {
        let handle = self.current().handle;
        let shortcut = graph.shortcut_mut(handle);
        shortcut.skipped1 = skipped1;
        shortcut.skipped2 = skipped2;
        let current = self.current_mut();
        current.skipped1 = skipped1;
        current.skipped2 = skipped2;
    }

    pub fn set_weight(&mut self, graph: &mut PrepareGraph, weight: f64) {
        debug_assert!(weight.is_finite());
        let handle = self.current().handle;
        graph.shortcut_mut(handle).weight = weight;
        let current = self.current_mut();
        current.weight_ab = weight;
        current.weight_ba = weight;
    }

    pub fn set_orig_edge_count(&mut self, graph: &mut PrepareGraph, orig_edge_count: u32) {
        let handle = self.current().handle;
        graph.shortcut_mut(handle).orig_edge_count = orig_edge_count;
        self.current_mut().orig_edge_count = orig_edge_count;
    }

    fn current(&self) -> &EdgeView {
        self.current
            .as_ref()
            .expect("explorer is not positioned on an edge, call next() first")
    }

    fn current_mut(&mut self) -> &mut EdgeView {
        self.current
            .as_mut()
            .expect("explorer is not positioned on an edge, call next() first")
    }
}
