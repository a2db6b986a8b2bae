//! Branch CFG model built from a line-oriented dump
//!
//! Each dump line reads `start [trueTarget [falseTarget]]`. A line with
//! two targets makes `start` a two-way branch and triggers derivation of
//! its probability pair right away, so the pair exists before any search
//! asks for it. Lines whose first token is not a node id are skipped.

use crate::cfg::probability::{CountSource, NoInformationPolicy, ProbabilityModel};
use crate::cfg::{EdgeType, NodeId};
use anyhow::{Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Outgoing edges of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Successors {
    /// Non-branching control node
    Single(NodeId),
    /// Two-way branch, ordered (true, false)
    Branch { on_true: NodeId, on_false: NodeId },
}

impl Successors {
    /// Targets in dump order
    pub fn targets(&self) -> Vec<NodeId> {
        match *self {
            Successors::Single(next) => vec![next],
            Successors::Branch { on_true, on_false } => vec![on_true, on_false],
        }
    }
}

/// Branch CFG with per-outcome probabilities
///
/// The graph is immutable once built; traversal state lives in the search
/// session, so several sessions may share one graph.
#[derive(Debug, Clone)]
pub struct BranchGraph {
    graph: DiGraph<NodeId, EdgeType>,
    index: HashMap<NodeId, NodeIndex>,
    successors: HashMap<NodeId, Successors>,
    probabilities: ProbabilityModel,
    skipped_lines: usize,
}

/// Counts describing a parsed graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub branches: usize,
    pub exempt_branches: usize,
    pub terminals: usize,
    pub skipped_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachable_from_root: Option<usize>,
}

impl BranchGraph {
    /// Parse a CFG dump
    ///
    /// The last successor definition of a node wins. A redefinition drops
    /// the node's old branch pair and derives a new one if it is still a
    /// branch, so a node is a branch exactly when it carries a pair.
    pub fn parse(text: &str, counts: &dyn CountSource, policy: NoInformationPolicy) -> Self {
        let mut order: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut successors: HashMap<NodeId, Successors> = HashMap::new();
        let mut probabilities = ProbabilityModel::new(policy);
        let mut skipped_lines = 0usize;

        let mut touch = |id: NodeId, order: &mut Vec<NodeId>| {
            if seen.insert(id) {
                order.push(id);
            }
        };

        for line in text.lines() {
            let mut tokens = line.split_whitespace();
            let start = match tokens.next() {
                Some(token) => match token.parse::<NodeId>() {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::debug!(line, "skipping CFG line with non-numeric start");
                        skipped_lines += 1;
                        continue;
                    }
                },
                None => continue,
            };
            touch(start, &mut order);

            let on_true = match tokens.next().map(str::parse::<NodeId>) {
                Some(Ok(id)) => id,
                _ => continue,
            };
            touch(on_true, &mut order);

            let on_false = match tokens.next().map(str::parse::<NodeId>) {
                Some(Ok(id)) => {
                    touch(id, &mut order);
                    Some(id)
                }
                _ => None,
            };

            let next = match on_false {
                Some(on_false) => Successors::Branch { on_true, on_false },
                None => Successors::Single(on_true),
            };
            match successors.insert(start, next) {
                Some(previous) if previous == next => continue,
                Some(_) => {
                    tracing::debug!(start, "successor definition replaced");
                    probabilities.forget_branch(start);
                }
                None => {}
            }
            if let Some(on_false) = on_false {
                probabilities.derive_branch(start, on_true, on_false, counts);
            }
        }

        if skipped_lines > 0 {
            tracing::warn!(skipped_lines, "skipped malformed CFG lines");
        }

        let mut graph = DiGraph::with_capacity(order.len(), successors.len() * 2);
        let mut index = HashMap::with_capacity(order.len());
        for &id in &order {
            index.insert(id, graph.add_node(id));
        }
        for &id in &order {
            let from = index[&id];
            match successors.get(&id) {
                Some(Successors::Single(next)) => {
                    graph.add_edge(from, index[next], EdgeType::Fallthrough);
                }
                Some(Successors::Branch { on_true, on_false }) => {
                    graph.add_edge(from, index[on_true], EdgeType::TrueBranch);
                    graph.add_edge(from, index[on_false], EdgeType::FalseBranch);
                }
                None => {}
            }
        }

        Self {
            graph,
            index,
            successors,
            probabilities,
            skipped_lines,
        }
    }

    /// Load and parse a CFG dump from disk
    pub fn load(path: &Path, counts: &dyn CountSource, policy: NoInformationPolicy) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read CFG dump {}", path.display()))?;
        let graph = Self::parse(&text, counts, policy);
        tracing::info!(
            path = %path.display(),
            nodes = graph.node_count(),
            branches = graph.branch_count(),
            "parsed CFG"
        );
        Ok(graph)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.index.contains_key(&node)
    }

    pub fn successors(&self, node: NodeId) -> Option<Successors> {
        self.successors.get(&node).copied()
    }

    pub fn is_branch(&self, node: NodeId) -> bool {
        matches!(self.successors(node), Some(Successors::Branch { .. }))
    }

    /// A node with no outgoing edges
    pub fn is_terminal(&self, node: NodeId) -> bool {
        !self.successors.contains_key(&node)
    }

    pub fn probabilities(&self) -> &ProbabilityModel {
        &self.probabilities
    }

    /// Outcome probability of a node, 1.0 when it is not a branch outcome
    pub fn outcome_probability(&self, node: NodeId) -> f64 {
        self.probabilities.outcome(node).unwrap_or(1.0)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn branch_count(&self) -> usize {
        self.probabilities.branch_count()
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Node ids in first-reference order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().map(move |idx| self.graph[idx])
    }

    /// Underlying petgraph graph
    pub fn petgraph(&self) -> &DiGraph<NodeId, EdgeType> {
        &self.graph
    }

    /// All nodes reachable from `root` along CFG edges, root included
    pub fn reachable_from(&self, root: NodeId) -> Vec<NodeId> {
        let start = match self.index.get(&root) {
            Some(&idx) => idx,
            None => return vec![],
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut reachable = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            reachable.push(self.graph[idx]);
        }
        reachable
    }

    pub fn summary(&self, root: Option<NodeId>) -> GraphSummary {
        GraphSummary {
            nodes: self.node_count(),
            edges: self.edge_count(),
            branches: self.branch_count(),
            exempt_branches: self.probabilities.exempt_count(),
            terminals: self.node_ids().filter(|&n| self.is_terminal(n)).count(),
            skipped_lines: self.skipped_lines,
            reachable_from_root: root.map(|r| self.reachable_from(r).len()),
        }
    }
}
