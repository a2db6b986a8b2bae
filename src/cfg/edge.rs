//! Edge classification for branch CFG edges

use serde::{Deserialize, Serialize};

/// Type of control flow edge between two CFG nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// First target of a two-way branch (condition holds)
    TrueBranch,
    /// Second target of a two-way branch (condition fails)
    FalseBranch,
    /// Only successor of a non-branching node
    Fallthrough,
}

impl EdgeType {
    /// Color for DOT visualization
    pub fn dot_color(&self) -> &'static str {
        match self {
            EdgeType::TrueBranch => "green",
            EdgeType::FalseBranch => "red",
            EdgeType::Fallthrough => "black",
        }
    }

    /// Label for DOT visualization
    pub fn dot_label(&self) -> &'static str {
        match self {
            EdgeType::TrueBranch => "T",
            EdgeType::FalseBranch => "F",
            EdgeType::Fallthrough => "",
        }
    }

    /// Whether this edge leaves a two-way branch
    pub fn is_branch(&self) -> bool {
        matches!(self, EdgeType::TrueBranch | EdgeType::FalseBranch)
    }
}
