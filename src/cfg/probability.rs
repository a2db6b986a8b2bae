//! Branch probability model
//!
//! Every two-way branch gets one `(p_true, p_false)` pair, derived once at
//! graph construction time from an external model-count record. The pair
//! is stored against the two *outcome* nodes, because a path is a sequence
//! of outcomes and its probability is the product of their entries.
//!
//! Branches the solver could not measure are pinned to `1.0/1.0`. That pair
//! is not a distribution: it marks the branch as exempt, so it neither
//! deflates a path's probability nor biases the visiting order.

use crate::cfg::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Probability of each outcome of a single branch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchProbability {
    /// Probability that the true outcome is taken
    pub on_true: f64,
    /// Probability that the false outcome is taken
    pub on_false: f64,
}

impl BranchProbability {
    /// Both outcomes pinned to 1.0
    pub const EXEMPT: Self = Self {
        on_true: 1.0,
        on_false: 1.0,
    };

    /// Coin-flip pair used by the uniform no-information policy
    pub const UNIFORM: Self = Self {
        on_true: 0.5,
        on_false: 0.5,
    };

    /// Derive the pair from a satisfying count over a domain size
    ///
    /// A degenerate domain (size 1) and a ratio of 1.0 or more both yield
    /// the exempt pair, so results never leave `[0, 1]`.
    pub fn from_counts(satisfying: u128, domain: u128) -> Self {
        if domain <= 1 {
            return Self::EXEMPT;
        }
        let on_true = satisfying as f64 / domain as f64;
        if on_true >= 1.0 {
            return Self::EXEMPT;
        }
        Self {
            on_true,
            on_false: 1.0 - on_true,
        }
    }

    /// Check if this is the exempt pair
    pub fn is_exempt(&self) -> bool {
        self.on_true == 1.0 && self.on_false == 1.0
    }
}

/// One model-count record: `satisfyingCount,domainSize,unknownFlag`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecord {
    pub satisfying: u128,
    pub domain: u128,
    pub unknown: bool,
}

impl CountRecord {
    /// Record for a branch the solver gave up on
    pub fn unknown() -> Self {
        Self {
            satisfying: 0,
            domain: 0,
            unknown: true,
        }
    }

    /// Parse a count line
    ///
    /// Malformed fields never fail: they produce a record with the unknown
    /// flag set. A zero domain is treated the same way.
    pub fn parse(line: &str) -> Self {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() < 3 {
            return Self::unknown();
        }

        let satisfying = fields[0].parse::<u128>();
        let domain = fields[1].parse::<u128>();
        let unknown = parse_flag(fields[2]);

        match (satisfying, domain, unknown) {
            (Ok(satisfying), Ok(domain), Some(unknown)) if domain > 0 => Self {
                satisfying,
                domain,
                unknown,
            },
            _ => Self::unknown(),
        }
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// What the count collaborator knows about a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLookup {
    /// No record exists for this branch
    Missing,
    /// The branch condition does not involve relevant input bytes
    Irrelevant,
    /// A model-count record is available
    Record(CountRecord),
}

/// Policy for branches that have no count record at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NoInformationPolicy {
    /// Both outcomes 1.0
    #[default]
    Neutral,
    /// Both outcomes 0.5 (historical variant)
    Uniform,
}

/// Derive the probability pair for one branch
pub fn derive_probability(lookup: &CountLookup, policy: NoInformationPolicy) -> BranchProbability {
    match lookup {
        CountLookup::Missing => match policy {
            NoInformationPolicy::Neutral => BranchProbability::EXEMPT,
            NoInformationPolicy::Uniform => BranchProbability::UNIFORM,
        },
        CountLookup::Irrelevant => BranchProbability::EXEMPT,
        CountLookup::Record(record) if record.unknown => BranchProbability::EXEMPT,
        CountLookup::Record(record) => {
            BranchProbability::from_counts(record.satisfying, record.domain)
        }
    }
}

/// Source of per-branch model-count information
pub trait CountSource {
    /// Look up the count information for the branch at `branch`
    fn lookup(&self, branch: NodeId) -> CountLookup;
}

/// Count source that knows nothing; every branch is `Missing`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCounts;

impl CountSource for NoCounts {
    fn lookup(&self, _branch: NodeId) -> CountLookup {
        CountLookup::Missing
    }
}

/// In-memory count source
#[derive(Debug, Clone, Default)]
pub struct CountTable {
    records: HashMap<NodeId, CountRecord>,
    irrelevant: HashSet<NodeId>,
}

impl CountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a count record for a branch
    pub fn with_record(mut self, branch: NodeId, satisfying: u128, domain: u128, unknown: bool) -> Self {
        self.records.insert(
            branch,
            CountRecord {
                satisfying,
                domain,
                unknown,
            },
        );
        self
    }

    /// Mark a branch as irrelevant to the tainted input
    pub fn with_irrelevant(mut self, branch: NodeId) -> Self {
        self.irrelevant.insert(branch);
        self
    }
}

impl CountSource for CountTable {
    fn lookup(&self, branch: NodeId) -> CountLookup {
        if self.irrelevant.contains(&branch) {
            return CountLookup::Irrelevant;
        }
        match self.records.get(&branch) {
            Some(record) => CountLookup::Record(*record),
            None => CountLookup::Missing,
        }
    }
}

/// Branch-constraints directory laid out by the solver pipeline
///
/// For branch `N` the directory may hold `branch_N.smt2` (the branch
/// constraint) and `branch_N.count` (the model-count record).
#[derive(Debug, Clone)]
pub struct ConstraintDir {
    root: PathBuf,
    irrelevant_symbols: Vec<String>,
}

impl ConstraintDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            irrelevant_symbols: Vec::new(),
        }
    }

    /// Symbols whose declaration marks a branch as irrelevant
    pub fn with_irrelevant_symbols(mut self, symbols: Vec<String>) -> Self {
        self.irrelevant_symbols = symbols;
        self
    }

    pub fn constraint_path(&self, branch: NodeId) -> PathBuf {
        self.root.join(format!("branch_{}.smt2", branch))
    }

    pub fn count_path(&self, branch: NodeId) -> PathBuf {
        self.root.join(format!("branch_{}.count", branch))
    }

    fn declares_irrelevant_symbol(&self, branch: NodeId) -> bool {
        if self.irrelevant_symbols.is_empty() {
            return false;
        }
        let path = self.constraint_path(branch);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return false,
        };
        text.lines().any(|line| {
            line.contains("declare-fun")
                && self.irrelevant_symbols.iter().any(|s| line.contains(s.as_str()))
        })
    }
}

impl CountSource for ConstraintDir {
    fn lookup(&self, branch: NodeId) -> CountLookup {
        if self.declares_irrelevant_symbol(branch) {
            return CountLookup::Irrelevant;
        }

        let path = self.count_path(branch);
        if !path.exists() {
            return CountLookup::Missing;
        }
        match fs::read_to_string(&path) {
            Ok(text) => {
                let first = text.lines().next().unwrap_or("");
                CountLookup::Record(CountRecord::parse(first))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable count record");
                CountLookup::Record(CountRecord::unknown())
            }
        }
    }
}

/// Per-outcome probabilities for the whole graph
#[derive(Debug, Clone, Default)]
pub struct ProbabilityModel {
    outcomes: HashMap<NodeId, f64>,
    branches: HashMap<NodeId, BranchProbability>,
    policy: NoInformationPolicy,
}

impl ProbabilityModel {
    pub fn new(policy: NoInformationPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Derive and store the pair for a branch, once per branch node
    ///
    /// Returns false if the branch already had a pair; the stored values
    /// are left untouched in that case.
    pub fn derive_branch(
        &mut self,
        branch: NodeId,
        on_true: NodeId,
        on_false: NodeId,
        source: &dyn CountSource,
    ) -> bool {
        if self.branches.contains_key(&branch) {
            return false;
        }
        let pair = derive_probability(&source.lookup(branch), self.policy);
        self.branches.insert(branch, pair);
        self.outcomes.insert(on_true, pair.on_true);
        self.outcomes.insert(on_false, pair.on_false);
        true
    }

    /// Drop the pair of a branch that was redefined
    ///
    /// Outcome probabilities already stored stay in place; a new
    /// derivation overwrites the ones it touches.
    pub fn forget_branch(&mut self, branch: NodeId) {
        self.branches.remove(&branch);
    }

    /// Probability stored for an outcome node
    pub fn outcome(&self, node: NodeId) -> Option<f64> {
        self.outcomes.get(&node).copied()
    }

    /// Pair stored for a branch node
    pub fn branch(&self, node: NodeId) -> Option<BranchProbability> {
        self.branches.get(&node).copied()
    }

    pub fn has_branch(&self, node: NodeId) -> bool {
        self.branches.contains_key(&node)
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Number of branches carrying the exempt pair
    pub fn exempt_count(&self) -> usize {
        self.branches.values().filter(|p| p.is_exempt()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_exempt() {
        let pair = derive_probability(&CountLookup::Missing, NoInformationPolicy::Neutral);
        assert_eq!(pair, BranchProbability::EXEMPT);
    }

    #[test]
    fn test_missing_record_uniform_policy() {
        let pair = derive_probability(&CountLookup::Missing, NoInformationPolicy::Uniform);
        assert_eq!(pair.on_true, 0.5);
        assert_eq!(pair.on_false, 0.5);
    }

    #[test]
    fn test_irrelevant_is_exempt_under_both_policies() {
        for policy in [NoInformationPolicy::Neutral, NoInformationPolicy::Uniform] {
            let pair = derive_probability(&CountLookup::Irrelevant, policy);
            assert!(pair.is_exempt());
        }
    }

    #[test]
    fn test_record_ratio() {
        let record = CountRecord::parse("3,4,False");
        let pair = derive_probability(&CountLookup::Record(record), NoInformationPolicy::Neutral);
        assert_eq!(pair.on_true, 0.75);
        assert_eq!(pair.on_false, 0.25);
    }

    #[test]
    fn test_unknown_flag_is_exempt() {
        let record = CountRecord::parse("3,4,True");
        assert!(record.unknown);
        let pair = derive_probability(&CountLookup::Record(record), NoInformationPolicy::Uniform);
        assert!(pair.is_exempt());
    }

    #[test]
    fn test_degenerate_domain_is_exempt() {
        let pair = BranchProbability::from_counts(0, 1);
        assert!(pair.is_exempt());
        assert!(!pair.on_true.is_nan());
    }

    #[test]
    fn test_ratio_at_or_above_one_is_clamped() {
        assert!(BranchProbability::from_counts(4, 4).is_exempt());
        assert!(BranchProbability::from_counts(9, 4).is_exempt());
    }

    #[test]
    fn test_zero_satisfying_count() {
        let pair = BranchProbability::from_counts(0, 256);
        assert_eq!(pair.on_true, 0.0);
        assert_eq!(pair.on_false, 1.0);
    }

    #[test]
    fn test_malformed_records_are_unknown() {
        assert!(CountRecord::parse("").unknown);
        assert!(CountRecord::parse("abc,4,False").unknown);
        assert!(CountRecord::parse("1,2").unknown);
        assert!(CountRecord::parse("1,0,False").unknown);
        assert!(CountRecord::parse("1,2,maybe").unknown);
    }

    #[test]
    fn test_record_parse_tolerates_whitespace() {
        let record = CountRecord::parse(" 1 , 4294967296 , False\n");
        assert!(!record.unknown);
        assert_eq!(record.satisfying, 1);
        assert_eq!(record.domain, 4_294_967_296);
    }

    #[test]
    fn test_model_derives_once_per_branch() {
        let table = CountTable::new().with_record(1, 1, 4, false);
        let mut model = ProbabilityModel::new(NoInformationPolicy::Neutral);

        assert!(model.derive_branch(1, 2, 3, &table));
        let other = CountTable::new().with_record(1, 3, 4, false);
        assert!(!model.derive_branch(1, 2, 3, &other));

        assert_eq!(model.outcome(2), Some(0.25));
        assert_eq!(model.outcome(3), Some(0.75));
        assert_eq!(model.branch_count(), 1);
    }

    #[test]
    fn test_constraint_dir_lookup() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("branch_7.count"), "1,4,False\n").unwrap();
        fs::write(
            dir.path().join("branch_8.smt2"),
            "(declare-fun xmlCtxt () Int)\n(assert (> xmlCtxt 0))\n",
        )
        .unwrap();
        fs::write(dir.path().join("branch_8.count"), "1,4,False\n").unwrap();

        let source = ConstraintDir::new(dir.path()).with_irrelevant_symbols(vec!["xml".to_string()]);

        assert_eq!(
            source.lookup(7),
            CountLookup::Record(CountRecord {
                satisfying: 1,
                domain: 4,
                unknown: false
            })
        );
        assert_eq!(source.lookup(8), CountLookup::Irrelevant);
        assert_eq!(source.lookup(9), CountLookup::Missing);
    }

    #[test]
    fn test_constraint_dir_without_symbols_ignores_declarations() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("branch_8.smt2"), "(declare-fun xml () Int)\n").unwrap();
        fs::write(dir.path().join("branch_8.count"), "1,2,False\n").unwrap();

        let source = ConstraintDir::new(dir.path());
        assert!(matches!(source.lookup(8), CountLookup::Record(_)));
    }
}
