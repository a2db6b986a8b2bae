// Preach: probabilistic rare-path search
//
// Branch-level CFGs annotated with outcome probabilities, a depth-first
// rare-path search engine, chunked path record storage and a rarity
// selector.

pub mod cfg;
pub mod cli;
pub mod error;
pub mod output;
pub mod paths;
pub mod search;
pub mod select;
pub mod storage;

pub use cfg::{BranchGraph, NodeId};
pub use error::PreachError;
pub use paths::PathRecord;
pub use search::{run_search, run_search_to_dir, AnalysisMode, SearchConfig, SearchReport};
pub use select::{select_rarest, SelectorConfig};
