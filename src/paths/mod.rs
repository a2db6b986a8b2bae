//! Emitted path records and near-duplicate detection

pub mod record;
pub mod similarity;

pub use record::{hash_path, render_nodes, PathRecord};
pub use similarity::{
    is_near_duplicate, similarity_ratio, InlineDedup, Verdict, DEFAULT_SIMILARITY_THRESHOLD,
};
