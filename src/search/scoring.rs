//! Path probability computation
//!
//! A path's probability is the product of the outcome probability of
//! every node on it. When a dependent-line filter is active, only nodes
//! whose source line is dependent contribute a factor.
//!
//! Both strategies multiply the factors left to right starting from 1.0,
//! so they produce bit-identical results.

use crate::cfg::{BranchGraph, DependentLines, NodeId, SourceMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default bound on cached prefixes
pub const DEFAULT_MEMO_CAPACITY: usize = 1_000_000;

/// How path probabilities are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProbabilityStrategy {
    /// Recompute the full product for every path
    #[default]
    Direct,
    /// Reuse products of previously seen prefixes
    Memoized,
}

/// Per-node probability factor
#[derive(Debug, Clone, Copy)]
pub struct NodeFactors<'a> {
    graph: &'a BranchGraph,
    lines: &'a SourceMap,
    dependent: Option<&'a DependentLines>,
}

impl<'a> NodeFactors<'a> {
    pub fn new(graph: &'a BranchGraph, lines: &'a SourceMap, dependent: Option<&'a DependentLines>) -> Self {
        // An empty filter is the same as no filter
        let dependent = dependent.filter(|d| !d.is_empty());
        Self {
            graph,
            lines,
            dependent,
        }
    }

    pub fn factor(&self, node: NodeId) -> f64 {
        match self.dependent {
            None => self.graph.outcome_probability(node),
            Some(dependent) => match self.lines.line_of(node) {
                Some(line) if dependent.contains(line) => self.graph.outcome_probability(node),
                _ => 1.0,
            },
        }
    }
}

/// Computes the joint probability of emitted paths
#[derive(Debug)]
pub enum PathScorer {
    Direct,
    Memoized(PrefixMemo),
}

impl PathScorer {
    pub fn new(strategy: ProbabilityStrategy, memo_capacity: usize) -> Self {
        match strategy {
            ProbabilityStrategy::Direct => PathScorer::Direct,
            ProbabilityStrategy::Memoized => PathScorer::Memoized(PrefixMemo::new(memo_capacity)),
        }
    }

    pub fn score(&mut self, factors: &NodeFactors<'_>, nodes: &[NodeId]) -> f64 {
        match self {
            PathScorer::Direct => direct_probability(factors, nodes),
            PathScorer::Memoized(memo) => memo.probability(factors, nodes),
        }
    }

    /// Number of paths that reused a cached prefix
    pub fn memo_hits(&self) -> usize {
        match self {
            PathScorer::Direct => 0,
            PathScorer::Memoized(memo) => memo.hits(),
        }
    }
}

/// Product of every node factor, left to right
pub fn direct_probability(factors: &NodeFactors<'_>, nodes: &[NodeId]) -> f64 {
    let mut probability = 1.0;
    for &node in nodes {
        probability *= factors.factor(node);
    }
    probability
}

/// Cache of prefix products
///
/// DFS siblings share long prefixes, so most of a new path's product is
/// usually already known. The cache is cleared when it reaches capacity.
#[derive(Debug)]
pub struct PrefixMemo {
    cache: HashMap<Vec<NodeId>, f64>,
    capacity: usize,
    hits: usize,
    clears: usize,
}

impl PrefixMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: HashMap::new(),
            capacity: capacity.max(1),
            hits: 0,
            clears: 0,
        }
    }

    pub fn probability(&mut self, factors: &NodeFactors<'_>, nodes: &[NodeId]) -> f64 {
        // Longest cached prefix
        let mut known = 0;
        let mut probability = 1.0;
        for end in (1..=nodes.len()).rev() {
            if let Some(&cached) = self.cache.get(&nodes[..end]) {
                known = end;
                probability = cached;
                break;
            }
        }

        if known > 0 {
            self.hits += 1;
        }
        if known == nodes.len() {
            return probability;
        }

        if self.cache.len() + (nodes.len() - known) > self.capacity {
            tracing::debug!(entries = self.cache.len(), "prefix memo full, clearing");
            self.cache.clear();
            self.clears += 1;
        }

        for end in known + 1..=nodes.len() {
            probability *= factors.factor(nodes[end - 1]);
            self.cache.insert(nodes[..end].to_vec(), probability);
        }
        probability
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Times the cache was dropped for reaching capacity
    pub fn clears(&self) -> usize {
        self.clears
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{CountTable, NoInformationPolicy};

    /// 1 -> {2 | 3}, 2 -> {4 | 5}, with skewed counts
    fn create_skewed_graph() -> BranchGraph {
        let counts = CountTable::new()
            .with_record(1, 3, 4, false)
            .with_record(2, 1, 10, false);
        BranchGraph::parse("1 2 3\n2 4 5\n", &counts, NoInformationPolicy::Neutral)
    }

    #[test]
    fn test_direct_probability() {
        let graph = create_skewed_graph();
        let lines = SourceMap::whole_graph();
        let factors = NodeFactors::new(&graph, &lines, None);

        assert_eq!(direct_probability(&factors, &[1, 2, 4]), 0.75 * 0.1);
        assert_eq!(direct_probability(&factors, &[1, 3]), 0.25);
        assert_eq!(direct_probability(&factors, &[]), 1.0);
    }

    #[test]
    fn test_memo_matches_direct() {
        let graph = create_skewed_graph();
        let lines = SourceMap::whole_graph();
        let factors = NodeFactors::new(&graph, &lines, None);
        let mut memo = PrefixMemo::new(DEFAULT_MEMO_CAPACITY);

        let paths: [&[NodeId]; 5] = [&[1, 2, 4], &[1, 2, 5], &[1, 3], &[1, 2], &[1, 2, 4]];
        for path in paths {
            let direct = direct_probability(&factors, path);
            let memoized = memo.probability(&factors, path);
            assert_eq!(direct.to_bits(), memoized.to_bits());
        }
        assert_eq!(memo.hits(), 4);
    }

    #[test]
    fn test_memo_clears_at_capacity() {
        let graph = create_skewed_graph();
        let lines = SourceMap::whole_graph();
        let factors = NodeFactors::new(&graph, &lines, None);
        let mut memo = PrefixMemo::new(3);

        memo.probability(&factors, &[1, 2, 4]);
        assert_eq!(memo.len(), 3);
        let p = memo.probability(&factors, &[1, 3]);
        assert_eq!(p, 0.25);
        assert_eq!(memo.clears(), 1);
        assert!(memo.len() <= 3);
    }

    #[test]
    fn test_dependent_filter() {
        let graph = create_skewed_graph();
        let lines = SourceMap::default()
            .with_line(2, 20)
            .with_line(3, 30)
            .with_line(4, 40);
        let dependent = DependentLines::new([30, 40]);
        let factors = NodeFactors::new(&graph, &lines, Some(&dependent));

        // node 2 (line 20) is not dependent, node 4 (line 40) is
        assert_eq!(direct_probability(&factors, &[2, 4]), 0.1);
        assert_eq!(direct_probability(&factors, &[3]), 0.25);
    }

    #[test]
    fn test_empty_dependent_set_is_no_filter() {
        let graph = create_skewed_graph();
        let lines = SourceMap::default();
        let dependent = DependentLines::parse("");
        let factors = NodeFactors::new(&graph, &lines, Some(&dependent));
        assert_eq!(factors.factor(3), 0.25);
    }

    #[test]
    fn test_scorer_strategies() {
        let graph = create_skewed_graph();
        let lines = SourceMap::whole_graph();
        let factors = NodeFactors::new(&graph, &lines, None);

        let mut direct = PathScorer::new(ProbabilityStrategy::Direct, 10);
        let mut memoized = PathScorer::new(ProbabilityStrategy::Memoized, 10);
        for path in [&[1u64, 2, 5][..], &[1, 2, 4][..]] {
            assert_eq!(direct.score(&factors, path), memoized.score(&factors, path));
        }
        assert_eq!(direct.memo_hits(), 0);
        assert_eq!(memoized.memo_hits(), 1);
    }
}
