//! Rare-path search engine
//!
//! A search walks the branch graph depth-first from a root node, visiting
//! the rarer outcome of each branch first, and emits one record per
//! complete (or depth-truncated) path with its joint probability.
//!
//! All mutable traversal state lives in a [`SearchSession`], so several
//! searches may share one graph concurrently.

pub mod cancel;
pub mod scoring;
pub mod session;

use crate::cfg::{BranchGraph, DependentLines, FunctionTable, NodeId, SourceMap};
use crate::error::PreachError;
use crate::paths::DEFAULT_SIMILARITY_THRESHOLD;
use crate::storage::{PathRecordStore, RecordSink, DEFAULT_CHUNK_SIZE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub use cancel::{CancelToken, StopReason};
pub use scoring::{
    direct_probability, NodeFactors, PathScorer, PrefixMemo, ProbabilityStrategy,
    DEFAULT_MEMO_CAPACITY,
};
pub use session::{SearchSession, SessionStats};

/// How call-entry edges are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    /// Never follow call edges; callees are opaque
    Intra,
    /// Follow call edges as plain edges, never return into the caller
    Inter,
    /// Follow calls and return to the call site when the callee ends
    #[default]
    IntraInter,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Intra => "intra",
            AnalysisMode::Inter => "inter",
            AnalysisMode::IntraInter => "intra-inter",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub mode: AnalysisMode,
    /// Maximum number of line-bearing nodes per path
    pub max_depth: usize,
    /// Times a node may be open on the current path
    pub loop_bound: usize,
    /// Wall-clock budget; None runs to exhaustion
    pub time_budget: Option<Duration>,
    pub strategy: ProbabilityStrategy,
    pub memo_capacity: usize,
    /// Suppress near-duplicates of the previous emitted path
    pub inline_dedup: bool,
    pub similarity_threshold: u8,
    /// Paths more probable than this are not emitted
    pub max_probability: Option<f64>,
    /// Records per chunk file
    pub chunk_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::IntraInter,
            max_depth: 60,
            loop_bound: 1,
            time_budget: None,
            strategy: ProbabilityStrategy::Direct,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            inline_dedup: true,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_probability: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SearchConfig {
    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_loop_bound(mut self, loop_bound: usize) -> Self {
        self.loop_bound = loop_bound;
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_strategy(mut self, strategy: ProbabilityStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn with_inline_dedup(mut self, enabled: bool) -> Self {
        self.inline_dedup = enabled;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: u8) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_probability(mut self, ceiling: Option<f64>) -> Self {
        self.max_probability = ceiling;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<(), PreachError> {
        if self.max_depth == 0 {
            return Err(PreachError::ZeroMaxDepth);
        }
        if self.loop_bound == 0 {
            return Err(PreachError::ZeroLoopBound);
        }
        if self.similarity_threshold > 100 {
            return Err(PreachError::InvalidSimilarity(self.similarity_threshold));
        }
        if self.chunk_size == 0 {
            return Err(PreachError::ZeroChunkSize);
        }
        Ok(())
    }
}

/// Read-only inputs shared by every session over the same graph
#[derive(Debug, Clone, Copy)]
pub struct SearchInputs<'a> {
    pub graph: &'a BranchGraph,
    pub lines: &'a SourceMap,
    pub functions: &'a FunctionTable,
    pub dependent: Option<&'a DependentLines>,
}

impl<'a> SearchInputs<'a> {
    pub fn new(graph: &'a BranchGraph, lines: &'a SourceMap, functions: &'a FunctionTable) -> Self {
        Self {
            graph,
            lines,
            functions,
            dependent: None,
        }
    }

    pub fn with_dependent(mut self, dependent: Option<&'a DependentLines>) -> Self {
        self.dependent = dependent;
        self
    }
}

/// Where a search starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    Node(NodeId),
    Function(String),
}

impl Root {
    /// Resolve to a node id present in the graph
    pub fn resolve(&self, graph: &BranchGraph, functions: &FunctionTable) -> Result<NodeId, PreachError> {
        let node = match self {
            Root::Node(node) => *node,
            Root::Function(name) => functions
                .entry_of(name)
                .ok_or_else(|| PreachError::UnknownFunction(name.clone()))?,
        };
        if graph.contains(node) {
            Ok(node)
        } else {
            Err(PreachError::RootNotFound(node))
        }
    }
}

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    Exhausted,
    TimeBudget,
    Cancelled,
}

impl From<Option<StopReason>> for Termination {
    fn from(reason: Option<StopReason>) -> Self {
        match reason {
            None => Termination::Exhausted,
            Some(StopReason::TimeBudget) => Termination::TimeBudget,
            Some(StopReason::Cancelled) => Termination::Cancelled,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Exhausted => "exhausted",
            Termination::TimeBudget => "time-budget",
            Termination::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Summary of a finished search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub mode: AnalysisMode,
    pub root: NodeId,
    pub started_at: String,
    /// Paths that reached emission
    pub emitted: usize,
    /// Dropped as near-duplicates of the previous path
    pub suppressed: usize,
    /// Replaced the previous path as a longer near-duplicate
    pub replaced: usize,
    /// Above the probability ceiling
    pub filtered: usize,
    pub memo_hits: usize,
    pub records_written: usize,
    pub chunks: Vec<String>,
    pub elapsed_ms: u64,
    pub termination: Termination,
}

/// Run one search from `root`, writing records into `sink`
///
/// Fails before any traversal if the configuration is invalid or the root
/// is not in the graph. Time-budget expiry and cancellation are normal
/// terminations: everything buffered is flushed before returning.
pub fn run_search(
    inputs: SearchInputs<'_>,
    root: NodeId,
    config: &SearchConfig,
    sink: &mut dyn RecordSink,
    cancel: CancelToken,
) -> Result<SearchReport> {
    config.validate()?;
    if !inputs.graph.contains(root) {
        return Err(PreachError::RootNotFound(root).into());
    }

    let cancel = match config.time_budget {
        Some(budget) => cancel.with_budget(budget),
        None => cancel,
    };

    let session = SearchSession::new(inputs, config, sink, cancel);
    session.run(root)
}

/// Run one search into a chunked record store under `out_dir`
pub fn run_search_to_dir(
    inputs: SearchInputs<'_>,
    root: NodeId,
    config: &SearchConfig,
    out_dir: &Path,
    cancel: CancelToken,
) -> Result<SearchReport> {
    config.validate()?;
    let mut store = PathRecordStore::create(out_dir, config.chunk_size)?;
    let mut report = run_search(inputs, root, config, &mut store, cancel)?;
    report.chunks = store
        .chunks()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    Ok(report)
}
