//! Source-level side tables for the branch CFG
//!
//! Three line-oriented inputs live next to the CFG dump:
//!
//! - the branch statement table, mapping each branch outcome node to a
//!   `file:line` location and the branch's condition text
//! - the dependent-line file, listing tainted source lines
//! - the function map, listing `name entryNodeID` pairs
//!
//! All three are parsed tolerantly: rows that do not fit are skipped.

use crate::cfg::NodeId;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Source line number (1-indexed)
pub type LineNo = u32;

/// Header prefix of the branch statement table
const STATEMENT_HEADER: &str = "Expression";

/// Outcome-node to source-line mapping plus branch conditions
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    lines: HashMap<NodeId, LineNo>,
    conditions: HashMap<NodeId, String>,
    whole_graph: bool,
}

impl SourceMap {
    /// Map in which every node is line-bearing but has no known line
    ///
    /// Used when no statement table is available, so paths still carry
    /// every node they visit.
    pub fn whole_graph() -> Self {
        Self {
            whole_graph: true,
            ..Self::default()
        }
    }

    /// Parse a branch statement table
    ///
    /// Rows are `", "`-separated: condition text at field 0, true and
    /// false outcome node ids at fields 2 and 3, and `file:line` strings
    /// for the two outcomes at fields 6 and 7.
    pub fn parse(text: &str) -> Self {
        let mut map = Self::default();
        let mut skipped = 0usize;

        for row in text.lines() {
            if row.starts_with(STATEMENT_HEADER) || row.trim().is_empty() {
                continue;
            }
            if !map.parse_row(row) {
                tracing::debug!(row, "skipping malformed statement row");
                skipped += 1;
            }
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped malformed branch statement rows");
        }
        map
    }

    fn parse_row(&mut self, row: &str) -> bool {
        let fields: Vec<&str> = row.split(", ").collect();
        if fields.len() < 8 {
            return false;
        }

        let on_true = fields[2].trim().parse::<NodeId>();
        let on_false = fields[3].trim().parse::<NodeId>();
        let (on_true, on_false) = match (on_true, on_false) {
            (Ok(t), Ok(f)) => (t, f),
            _ => return false,
        };

        if let Some(line) = parse_location_line(fields[6]) {
            self.lines.insert(on_true, line);
        }
        if let Some(line) = parse_location_line(fields[7]) {
            self.lines.insert(on_false, line);
        }

        let condition = fields[0].trim();
        self.conditions.insert(on_true, format!("({})", condition));
        self.conditions.insert(on_false, format!("(not ({}))", condition));
        true
    }

    /// Load a statement table from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read branch statements {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Insert a single mapping
    pub fn with_line(mut self, node: NodeId, line: LineNo) -> Self {
        self.lines.insert(node, line);
        self
    }

    /// Whether the node is recorded in emitted paths
    pub fn is_line_bearing(&self, node: NodeId) -> bool {
        self.whole_graph || self.lines.contains_key(&node)
    }

    /// Source line of the node, if known
    pub fn line_of(&self, node: NodeId) -> Option<LineNo> {
        self.lines.get(&node).copied()
    }

    /// Branch condition for an outcome node, negated for false outcomes
    pub fn condition_of(&self, node: NodeId) -> Option<&str> {
        self.conditions.get(&node).map(String::as_str)
    }

    /// Conjunction of the conditions along a node sequence
    pub fn path_condition(&self, nodes: &[NodeId]) -> String {
        nodes
            .iter()
            .filter_map(|&n| self.condition_of(n))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn parse_location_line(location: &str) -> Option<LineNo> {
    let (_, line) = location.trim().rsplit_once(':')?;
    line.trim().parse().ok()
}

/// Tainted source lines
///
/// When non-empty, only branch outcomes on these lines contribute to a
/// path's probability.
#[derive(Debug, Clone, Default)]
pub struct DependentLines {
    lines: HashSet<LineNo>,
}

impl DependentLines {
    pub fn new(lines: impl IntoIterator<Item = LineNo>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }

    /// Parse a whitespace-separated list of line numbers
    pub fn parse(text: &str) -> Self {
        let mut lines = HashSet::new();
        for token in text.split_whitespace() {
            match token.parse::<LineNo>() {
                Ok(line) => {
                    lines.insert(line);
                }
                Err(_) => tracing::debug!(token, "skipping non-numeric dependent line"),
            }
        }
        Self { lines }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dependent lines {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn contains(&self, line: LineNo) -> bool {
        self.lines.contains(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Function entry points of the flattened CFG
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    by_name: HashMap<String, NodeId>,
    entries: HashSet<NodeId>,
}

impl FunctionTable {
    /// Parse `name entryNodeID` rows
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for row in text.lines() {
            let mut tokens = row.split_whitespace();
            let (name, entry) = match (tokens.next(), tokens.next()) {
                (Some(name), Some(entry)) => (name, entry),
                _ => continue,
            };
            match entry.parse::<NodeId>() {
                Ok(entry) => table.insert(name, entry),
                Err(_) => tracing::debug!(row, "skipping malformed function map row"),
            }
        }
        table
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read function map {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Register a function; the first entry seen for a name wins
    pub fn insert(&mut self, name: &str, entry: NodeId) {
        self.entries.insert(entry);
        self.by_name.entry(name.to_string()).or_insert(entry);
    }

    pub fn with_function(mut self, name: &str, entry: NodeId) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn is_entry(&self, node: NodeId) -> bool {
        self.entries.contains(&node)
    }

    pub fn entry_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATEMENTS: &str = "\
Expression, Branch, True, False, Kind, Func, TrueLoc, FalseLoc
x > 3, 1, 2, 3, if, main, main.c:10, main.c:12
len == 0, 4, 5, 6, if, main, main.c:20, main.c:22
broken row
y < 2, 7, nine, 8, if, main, main.c:30, main.c:31
";

    #[test]
    fn test_statement_lines() {
        let map = SourceMap::parse(STATEMENTS);

        assert_eq!(map.line_of(2), Some(10));
        assert_eq!(map.line_of(3), Some(12));
        assert_eq!(map.line_of(5), Some(20));
        assert_eq!(map.line_of(6), Some(22));
        assert_eq!(map.len(), 4);
        assert!(map.is_line_bearing(2));
        assert!(!map.is_line_bearing(1));
    }

    #[test]
    fn test_statement_conditions() {
        let map = SourceMap::parse(STATEMENTS);

        assert_eq!(map.condition_of(2), Some("(x > 3)"));
        assert_eq!(map.condition_of(3), Some("(not (x > 3))"));
        assert_eq!(map.path_condition(&[2, 6]), "(x > 3) and (not (len == 0))");
    }

    #[test]
    fn test_whole_graph_map() {
        let map = SourceMap::whole_graph();
        assert!(map.is_line_bearing(42));
        assert_eq!(map.line_of(42), None);
    }

    #[test]
    fn test_dependent_lines_parse() {
        let deps = DependentLines::parse("10 12\n20 abc  30");
        assert_eq!(deps.len(), 4);
        assert!(deps.contains(10));
        assert!(deps.contains(30));
        assert!(!deps.contains(11));
    }

    #[test]
    fn test_function_table() {
        let table = FunctionTable::parse("main 1\nparse 40\nbad\nhelper x\nparse 99\n");

        assert_eq!(table.entry_of("main"), Some(1));
        assert_eq!(table.entry_of("parse"), Some(40));
        assert!(table.is_entry(99));
        assert!(!table.is_entry(2));
        assert_eq!(table.entry_of("helper"), None);
        assert_eq!(table.len(), 3);
    }
}
