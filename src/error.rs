//! Library error types

use crate::cfg::NodeId;
use thiserror::Error;

/// Fatal configuration errors, reported before any traversal starts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreachError {
    #[error("root node {0} is not in the graph")]
    RootNotFound(NodeId),

    #[error("unknown function '{0}' (not in the function map)")]
    UnknownFunction(String),

    #[error("max depth must be at least 1")]
    ZeroMaxDepth,

    #[error("loop bound must be at least 1")]
    ZeroLoopBound,

    #[error("similarity threshold {0} is out of range (0-100)")]
    InvalidSimilarity(u8),

    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
}

impl PreachError {
    /// Error category name used in JSON error responses
    pub fn category(&self) -> &'static str {
        match self {
            PreachError::RootNotFound(_) => "RootNotFound",
            PreachError::UnknownFunction(_) => "FunctionNotFound",
            PreachError::ZeroMaxDepth
            | PreachError::ZeroLoopBound
            | PreachError::InvalidSimilarity(_)
            | PreachError::ZeroChunkSize => "InvalidConfig",
        }
    }
}
