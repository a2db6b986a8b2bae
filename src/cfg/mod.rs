// Branch CFG model shared by the search engine and the selector

pub mod edge;
pub mod export;
pub mod graph;
pub mod probability;
pub mod source;

pub use edge::EdgeType;
pub use export::{export_dot, export_json, GraphExport};
pub use graph::{BranchGraph, GraphSummary, Successors};
pub use probability::{
    derive_probability, BranchProbability, ConstraintDir, CountLookup, CountRecord, CountSource,
    CountTable, NoCounts, NoInformationPolicy, ProbabilityModel,
};
pub use source::{DependentLines, FunctionTable, LineNo, SourceMap};

/// Node identifier assigned by the CFG dump
pub type NodeId = u64;
