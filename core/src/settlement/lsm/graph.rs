//! Payment-flow graph for multilateral cycle detection.
//!
//! Vertices are agents with queued flows; edges aggregate Queue-2 remainders
//! per ordered pair. Cycle candidates are found by Tarjan SCC prefiltering
//! plus bounded DFS enumeration. Everything iterates in sorted order:
//! vertices are indexed lexicographically and each simple cycle is produced
//! exactly once, anchored at its smallest vertex.

use crate::model::world::World;
use crate::money::Cents;
use std::collections::{BTreeMap, BTreeSet};

/// Aggregated flow on one ordered pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeData {
    pub amount: Cents,
    /// Constituent transaction ids, FIFO by queue entry.
    pub tx_ids: Vec<String>,
}

/// Directed multigraph of queued flows, aggregated per ordered pair.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    agent_to_index: BTreeMap<String, usize>,
    index_to_agent: Vec<String>,
    adj: BTreeMap<usize, BTreeMap<usize, EdgeData>>,
}

impl FlowGraph {
    /// Snapshot the current Queue-2 state.
    pub fn from_queue(world: &World) -> Self {
        let mut graph = Self::default();

        let mut agent_set: BTreeSet<String> = BTreeSet::new();
        for entry in world.queue2() {
            if let Some(tx) = world.transaction(&entry.tx_id) {
                if tx.is_live() {
                    agent_set.insert(tx.sender_id().to_string());
                    agent_set.insert(tx.receiver_id().to_string());
                }
            }
        }
        for (idx, agent_id) in agent_set.iter().enumerate() {
            graph.agent_to_index.insert(agent_id.clone(), idx);
            graph.index_to_agent.push(agent_id.clone());
        }

        for entry in world.queue2() {
            if let Some(tx) = world.transaction(&entry.tx_id) {
                if !tx.is_live() {
                    continue;
                }
                let from = graph.agent_to_index[tx.sender_id()];
                let to = graph.agent_to_index[tx.receiver_id()];
                let edge = graph
                    .adj
                    .entry(from)
                    .or_default()
                    .entry(to)
                    .or_insert(EdgeData {
                        amount: 0,
                        tx_ids: Vec::new(),
                    });
                edge.amount += tx.remaining_amount();
                edge.tx_ids.push(entry.tx_id.clone());
            }
        }

        graph
    }

    pub fn vertex_count(&self) -> usize {
        self.index_to_agent.len()
    }

    pub fn agent_name(&self, idx: usize) -> &str {
        &self.index_to_agent[idx]
    }

    pub fn edge(&self, from: usize, to: usize) -> Option<&EdgeData> {
        self.adj.get(&from).and_then(|n| n.get(&to))
    }

    /// Out-neighbors in ascending index order.
    pub fn out_neighbors(&self, vertex: usize) -> Vec<usize> {
        self.adj
            .get(&vertex)
            .map(|n| n.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Tarjan strongly-connected components, deterministic by vertex order.
pub fn tarjan_sccs(graph: &FlowGraph) -> Vec<usize> {
    struct State<'g> {
        graph: &'g FlowGraph,
        counter: usize,
        indices: Vec<Option<usize>>,
        lowlinks: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        scc_of: Vec<usize>,
        scc_count: usize,
    }

    fn connect(v: usize, state: &mut State) {
        state.indices[v] = Some(state.counter);
        state.lowlinks[v] = state.counter;
        state.counter += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for w in state.graph.out_neighbors(v) {
            if state.indices[w].is_none() {
                connect(w, state);
                state.lowlinks[v] = state.lowlinks[v].min(state.lowlinks[w]);
            } else if state.on_stack[w] {
                state.lowlinks[v] = state.lowlinks[v].min(state.indices[w].unwrap());
            }
        }

        if Some(state.lowlinks[v]) == state.indices[v] {
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack[w] = false;
                state.scc_of[w] = state.scc_count;
                if w == v {
                    break;
                }
            }
            state.scc_count += 1;
        }
    }

    let n = graph.vertex_count();
    let mut state = State {
        graph,
        counter: 0,
        indices: vec![None; n],
        lowlinks: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        scc_of: vec![0; n],
        scc_count: 0,
    };
    for v in 0..n {
        if state.indices[v].is_none() {
            connect(v, &mut state);
        }
    }
    state.scc_of
}

/// A simple directed cycle candidate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleCandidate {
    /// Vertex path in cycle order, smallest vertex first, not closed.
    pub path: Vec<usize>,
}

impl CycleCandidate {
    /// Agent names along the cycle, closed (first repeated last).
    pub fn closed_agent_path(&self, graph: &FlowGraph) -> Vec<String> {
        let mut agents: Vec<String> = self
            .path
            .iter()
            .map(|&v| graph.agent_name(v).to_string())
            .collect();
        agents.push(graph.agent_name(self.path[0]).to_string());
        agents
    }
}

/// Enumerate simple cycles of length 3..=`max_len`.
///
/// Each cycle is anchored at its smallest vertex and explored with strictly
/// larger intermediate vertices, so every directed cycle appears exactly
/// once. Candidates are returned sorted lexicographically by their sorted
/// agent tuple (path tuple as tie-break), which fixes the settlement order.
pub fn enumerate_cycles(graph: &FlowGraph, max_len: usize) -> Vec<CycleCandidate> {
    let n = graph.vertex_count();
    if n == 0 || max_len < 3 {
        return Vec::new();
    }
    let scc_of = tarjan_sccs(graph);
    let mut found = Vec::new();

    for start in 0..n {
        let mut path = vec![start];
        let mut on_path = vec![false; n];
        on_path[start] = true;
        dfs(graph, &scc_of, start, start, &mut path, &mut on_path, max_len, &mut found);
    }

    // Lexicographic by sorted vertex tuple, then path.
    let mut keyed: Vec<(Vec<String>, Vec<String>, CycleCandidate)> = found
        .into_iter()
        .map(|c| {
            let path_names: Vec<String> = c
                .path
                .iter()
                .map(|&v| graph.agent_name(v).to_string())
                .collect();
            let mut sorted_names = path_names.clone();
            sorted_names.sort();
            (sorted_names, path_names, c)
        })
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, _, c)| c).collect()
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    graph: &FlowGraph,
    scc_of: &[usize],
    start: usize,
    current: usize,
    path: &mut Vec<usize>,
    on_path: &mut [bool],
    max_len: usize,
    found: &mut Vec<CycleCandidate>,
) {
    for next in graph.out_neighbors(current) {
        if scc_of[next] != scc_of[start] {
            continue;
        }
        if next == start {
            if path.len() >= 3 {
                found.push(CycleCandidate { path: path.clone() });
            }
            continue;
        }
        // Anchor at the smallest vertex: intermediates must be larger.
        if next < start || on_path[next] || path.len() >= max_len {
            continue;
        }
        path.push(next);
        on_path[next] = true;
        dfs(graph, scc_of, start, next, path, on_path, max_len, found);
        on_path[next] = false;
        path.pop();
    }
}

/// Net position per cycle member: inflow minus outflow along cycle edges.
pub fn cycle_net_positions(graph: &FlowGraph, cycle: &CycleCandidate) -> BTreeMap<String, Cents> {
    let mut net: BTreeMap<String, Cents> = BTreeMap::new();
    let len = cycle.path.len();
    for i in 0..len {
        let from = cycle.path[i];
        let to = cycle.path[(i + 1) % len];
        let amount = graph.edge(from, to).map(|e| e.amount).unwrap_or(0);
        *net.entry(graph.agent_name(from).to_string()).or_insert(0) -= amount;
        *net.entry(graph.agent_name(to).to_string()).or_insert(0) += amount;
    }
    net
}
