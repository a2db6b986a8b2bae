//! Path records and their line format
//!
//! A record prints as `nodeID->nodeID->...->(line->line->...->) : probability`.
//! Nodes without a known source line print `-1` in the line list.

use crate::cfg::{LineNo, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One emitted path with its joint probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Line-bearing nodes in execution order
    pub nodes: Vec<NodeId>,
    /// Source line of each node, aligned with `nodes`
    pub lines: Vec<Option<LineNo>>,
    /// Joint probability of the path
    pub probability: f64,
}

impl PathRecord {
    pub fn new(nodes: Vec<NodeId>, lines: Vec<Option<LineNo>>, probability: f64) -> Self {
        debug_assert_eq!(nodes.len(), lines.len());
        Self {
            nodes,
            lines,
            probability,
        }
    }

    /// Number of nodes on the path
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node sequence rendered as `a->b->c->`
    ///
    /// This string is what near-duplicate detection compares.
    pub fn node_key(&self) -> String {
        render_nodes(&self.nodes)
    }

    /// Line sequence rendered as `10->12->`
    pub fn line_key(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Some(line) => out.push_str(&line.to_string()),
                None => out.push_str("-1"),
            }
            out.push_str("->");
        }
        out
    }

    /// Content hash of the node sequence
    pub fn path_id(&self) -> String {
        hash_path(&self.nodes)
    }

    /// Parse one record line
    ///
    /// Returns None for lines that are not records (blank lines, headers,
    /// truncated writes).
    pub fn parse(line: &str) -> Option<Self> {
        let (path, probability) = line.trim().rsplit_once(" : ")?;
        let probability = probability.trim().parse::<f64>().ok()?;

        let (nodes, lines) = path.split_once('(')?;
        let lines = lines.strip_suffix(')')?;

        let nodes = split_arrows(nodes)
            .map(|token| token.parse::<NodeId>().ok())
            .collect::<Option<Vec<_>>>()?;
        let lines = split_arrows(lines)
            .map(|token| match token.parse::<i64>() {
                Ok(-1) => Some(None),
                Ok(line) => LineNo::try_from(line).ok().map(Some),
                Err(_) => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if nodes.len() != lines.len() {
            return None;
        }
        Some(Self::new(nodes, lines, probability))
    }
}

impl fmt::Display for PathRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) : {:?}",
            self.node_key(),
            self.line_key(),
            self.probability
        )
    }
}

fn split_arrows(s: &str) -> impl Iterator<Item = &str> {
    s.split("->").map(str::trim).filter(|t| !t.is_empty())
}

/// Render a node sequence as `a->b->c->`
pub fn render_nodes(nodes: &[NodeId]) -> String {
    let mut out = String::with_capacity(nodes.len() * 8);
    for node in nodes {
        out.push_str(&node.to_string());
        out.push_str("->");
    }
    out
}

/// Compute BLAKE3 hash of a node sequence
///
/// The hash includes the path length so that a sequence and its
/// zero-extended variant never collide.
pub fn hash_path(nodes: &[NodeId]) -> String {
    let mut hasher = blake3::Hasher::new();

    hasher.update(&(nodes.len() as u64).to_le_bytes());
    for &node in nodes {
        hasher.update(&node.to_le_bytes());
    }

    hasher.finalize().to_hex().to_string()
}
