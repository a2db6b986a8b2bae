//! Recursive search session
//!
//! The session owns every piece of mutable traversal state: open counts
//! per node, the current path, the simulated call stack and the memoized
//! terminal-to-return mapping. The graph and side tables are borrowed
//! read-only.

use super::{AnalysisMode, SearchConfig, SearchInputs, SearchReport, Termination};
use crate::cfg::{NodeId, Successors};
use crate::paths::{InlineDedup, PathRecord, Verdict};
use crate::search::cancel::{CancelToken, StopReason};
use crate::search::scoring::{NodeFactors, PathScorer};
use crate::storage::RecordSink;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Instant;

/// Counters collected while searching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub emitted: usize,
    pub suppressed: usize,
    pub replaced: usize,
    pub filtered: usize,
}

/// One in-flight search
pub struct SearchSession<'a> {
    inputs: SearchInputs<'a>,
    config: &'a SearchConfig,
    factors: NodeFactors<'a>,
    scorer: PathScorer,
    dedup: Option<InlineDedup>,
    sink: &'a mut dyn RecordSink,
    cancel: CancelToken,

    open: HashMap<NodeId, usize>,
    path: Vec<NodeId>,
    call_stack: Vec<NodeId>,
    return_map: HashMap<NodeId, NodeId>,

    stats: SessionStats,
    stopped: Option<StopReason>,
}

impl<'a> SearchSession<'a> {
    pub fn new(
        inputs: SearchInputs<'a>,
        config: &'a SearchConfig,
        sink: &'a mut dyn RecordSink,
        cancel: CancelToken,
    ) -> Self {
        let factors = NodeFactors::new(inputs.graph, inputs.lines, inputs.dependent);
        let dedup = config
            .inline_dedup
            .then(|| InlineDedup::new(config.similarity_threshold));

        Self {
            inputs,
            config,
            factors,
            scorer: PathScorer::new(config.strategy, config.memo_capacity),
            dedup,
            sink,
            cancel,
            open: HashMap::new(),
            path: Vec::new(),
            call_stack: Vec::new(),
            return_map: HashMap::new(),
            stats: SessionStats::default(),
            stopped: None,
        }
    }

    /// Search from `root` until exhaustion or cancellation, then flush
    pub fn run(mut self, root: NodeId) -> Result<SearchReport> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        tracing::info!(
            root,
            mode = %self.config.mode,
            max_depth = self.config.max_depth,
            "search started"
        );

        let outcome = self.visit(root);

        // Flush even when the traversal failed part-way
        let flushed = self.finish();
        outcome?;
        flushed?;

        let termination = Termination::from(self.stopped);
        let report = SearchReport {
            mode: self.config.mode,
            root,
            started_at,
            emitted: self.stats.emitted,
            suppressed: self.stats.suppressed,
            replaced: self.stats.replaced,
            filtered: self.stats.filtered,
            memo_hits: self.scorer.memo_hits(),
            records_written: self.sink.records_written(),
            chunks: Vec::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            termination,
        };

        tracing::info!(
            emitted = report.emitted,
            written = report.records_written,
            termination = %termination,
            "search finished"
        );
        tracing::debug!(memo_hits = report.memo_hits, "probability memo");
        Ok(report)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(record) = self.dedup.as_mut().and_then(InlineDedup::take_pending) {
            self.sink.write(record)?;
        }
        self.sink.flush()
    }

    fn is_closed(&self, node: NodeId) -> bool {
        self.open.get(&node).copied().unwrap_or(0) >= self.config.loop_bound
    }

    fn is_call_entry(&self, node: NodeId) -> bool {
        self.inputs.functions.is_entry(node)
    }

    fn visit(&mut self, node: NodeId) -> Result<()> {
        if self.stopped.is_some() {
            return Ok(());
        }
        if let Some(reason) = self.cancel.check() {
            tracing::info!(reason = ?reason, "search stopping");
            self.stopped = Some(reason);
            return Ok(());
        }

        *self.open.entry(node).or_insert(0) += 1;
        let line_bearing = self.inputs.lines.is_line_bearing(node);
        if line_bearing {
            self.path.push(node);
        }

        let result = if line_bearing && self.path.len() >= self.config.max_depth {
            self.emit()
        } else {
            self.expand(node)
        };

        if line_bearing {
            self.path.pop();
        }
        if let Some(count) = self.open.get_mut(&node) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&node);
            }
        }
        result
    }

    fn follow(&mut self, next: NodeId) -> Result<()> {
        if self.is_closed(next) {
            return Ok(());
        }
        self.visit(next)
    }

    fn expand(&mut self, node: NodeId) -> Result<()> {
        match self.inputs.graph.successors(node) {
            None => self.at_terminal(node),
            Some(Successors::Single(next)) => {
                if self.config.mode == AnalysisMode::Intra && self.is_call_entry(next) {
                    // Opaque callee: the path ends at the call
                    self.emit()
                } else {
                    self.follow(next)
                }
            }
            Some(Successors::Branch { on_true, on_false }) => self.branch(on_true, on_false),
        }
    }

    fn branch(&mut self, on_true: NodeId, on_false: NodeId) -> Result<()> {
        let call_true = self.is_call_entry(on_true);
        let call_false = self.is_call_entry(on_false);

        match self.config.mode {
            AnalysisMode::Intra => match (call_true, call_false) {
                (true, true) => self.emit(),
                (true, false) => self.follow(on_false),
                (false, true) => self.follow(on_true),
                (false, false) => self.follow_by_rarity(on_true, on_false),
            },
            AnalysisMode::Inter => self.follow_by_rarity(on_true, on_false),
            AnalysisMode::IntraInter => match (call_true, call_false) {
                (true, false) => self.call(on_true, on_false),
                (false, true) => self.call(on_false, on_true),
                _ => self.follow_by_rarity(on_true, on_false),
            },
        }
    }

    /// Visit the less probable outcome first
    fn follow_by_rarity(&mut self, on_true: NodeId, on_false: NodeId) -> Result<()> {
        let graph = self.inputs.graph;
        let (first, second) =
            if graph.outcome_probability(on_true) > graph.outcome_probability(on_false) {
                (on_false, on_true)
            } else {
                (on_true, on_false)
            };
        self.follow(first)?;
        self.follow(second)
    }

    /// Enter `callee`, returning to `return_to` when it terminates
    fn call(&mut self, callee: NodeId, return_to: NodeId) -> Result<()> {
        self.call_stack.push(return_to);
        let result = self.follow(callee);
        self.call_stack.pop();
        result
    }

    fn at_terminal(&mut self, node: NodeId) -> Result<()> {
        if self.config.mode == AnalysisMode::IntraInter {
            if let Some(return_to) = self.call_stack.pop() {
                self.return_map.insert(node, return_to);
                let result = self.resume(return_to);
                self.call_stack.push(return_to);
                return result;
            }
            if let Some(&return_to) = self.return_map.get(&node) {
                return self.resume(return_to);
            }
        }
        self.emit()
    }

    /// Continue at a return site, or end the path if it is already open
    fn resume(&mut self, return_to: NodeId) -> Result<()> {
        if self.is_closed(return_to) {
            self.emit()
        } else {
            self.visit(return_to)
        }
    }

    fn emit(&mut self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        self.stats.emitted += 1;

        let probability = self.scorer.score(&self.factors, &self.path);
        if let Some(ceiling) = self.config.max_probability {
            if probability > ceiling {
                self.stats.filtered += 1;
                return Ok(());
            }
        }

        let lines = self
            .path
            .iter()
            .map(|&node| self.inputs.lines.line_of(node))
            .collect();
        let record = PathRecord::new(self.path.clone(), lines, probability);

        let record = match self.dedup.as_mut() {
            None => Some(record),
            Some(dedup) => {
                let (verdict, finalized) = dedup.offer(record);
                match verdict {
                    Verdict::Kept => {}
                    Verdict::Replaced => self.stats.replaced += 1,
                    Verdict::Suppressed => self.stats.suppressed += 1,
                }
                finalized
            }
        };

        if let Some(record) = record {
            self.sink.write(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BranchGraph, CountTable, FunctionTable, NoCounts, NoInformationPolicy, SourceMap};
    use crate::storage::MemorySink;

    fn search(
        graph: &BranchGraph,
        functions: &FunctionTable,
        root: NodeId,
        config: &SearchConfig,
    ) -> (Vec<PathRecord>, SearchReport) {
        let lines = SourceMap::whole_graph();
        let inputs = SearchInputs::new(graph, &lines, functions);
        let mut sink = MemorySink::new();
        let report = SearchSession::new(inputs, config, &mut sink, CancelToken::never())
            .run(root)
            .unwrap();
        (sink.into_records(), report)
    }

    fn node_paths(records: &[PathRecord]) -> Vec<Vec<NodeId>> {
        records.iter().map(|r| r.nodes.clone()).collect()
    }

    fn plain() -> SearchConfig {
        SearchConfig::default()
            .with_mode(AnalysisMode::Intra)
            .with_inline_dedup(false)
    }

    #[test]
    fn test_rarer_outcome_first() {
        let counts = CountTable::new().with_record(1, 3, 4, false);
        let graph = BranchGraph::parse("1 2 3\n", &counts, NoInformationPolicy::Neutral);
        let (records, report) = search(&graph, &FunctionTable::default(), 1, &plain());

        assert_eq!(node_paths(&records), vec![vec![1, 3], vec![1, 2]]);
        assert_eq!(records[0].probability, 0.25);
        assert_eq!(records[1].probability, 0.75);
        assert_eq!(report.emitted, 2);
        assert_eq!(report.termination, Termination::Exhausted);
    }

    #[test]
    fn test_equal_outcomes_go_true_first() {
        let graph = BranchGraph::parse("1 2 3\n", &NoCounts, NoInformationPolicy::Neutral);
        let (records, _) = search(&graph, &FunctionTable::default(), 1, &plain());
        assert_eq!(node_paths(&records), vec![vec![1, 2], vec![1, 3]]);
    }

    #[test]
    fn test_loop_is_not_reentered() {
        // 1 -> 2 -> {1 | 3}
        let graph = BranchGraph::parse("1 2\n2 1 3\n", &NoCounts, NoInformationPolicy::Neutral);
        let (records, _) = search(&graph, &FunctionTable::default(), 1, &plain());
        assert_eq!(node_paths(&records), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_loop_bound_two_unrolls_once() {
        let graph = BranchGraph::parse("1 2\n2 1 3\n", &NoCounts, NoInformationPolicy::Neutral);
        let config = plain().with_loop_bound(2);
        let (records, _) = search(&graph, &FunctionTable::default(), 1, &config);
        assert_eq!(
            node_paths(&records),
            vec![vec![1, 2, 1, 2, 3], vec![1, 2, 3]]
        );
    }

    #[test]
    fn test_depth_cutoff_truncates() {
        let graph = BranchGraph::parse("1 2\n2 3\n3 4\n", &NoCounts, NoInformationPolicy::Neutral);
        let config = plain().with_max_depth(2);
        let (records, _) = search(&graph, &FunctionTable::default(), 1, &config);
        assert_eq!(node_paths(&records), vec![vec![1, 2]]);
    }

    #[test]
    fn test_intra_skips_callee() {
        // 1 -> {10 (call) | 2}, 10 -> 11
        let graph = BranchGraph::parse("1 10 2\n10 11\n", &NoCounts, NoInformationPolicy::Neutral);
        let functions = FunctionTable::default().with_function("callee", 10);
        let (records, _) = search(&graph, &functions, 1, &plain());
        assert_eq!(node_paths(&records), vec![vec![1, 2]]);
    }

    #[test]
    fn test_inter_follows_both_sides() {
        let graph = BranchGraph::parse("1 10 2\n10 11\n", &NoCounts, NoInformationPolicy::Neutral);
        let functions = FunctionTable::default().with_function("callee", 10);
        let config = plain().with_mode(AnalysisMode::Inter);
        let (records, _) = search(&graph, &functions, 1, &config);
        assert_eq!(node_paths(&records), vec![vec![1, 10, 11], vec![1, 2]]);
    }

    #[test]
    fn test_intra_inter_returns_to_call_site() {
        let graph = BranchGraph::parse("1 10 2\n10 11\n2 3\n", &NoCounts, NoInformationPolicy::Neutral);
        let functions = FunctionTable::default().with_function("callee", 10);
        let config = plain().with_mode(AnalysisMode::IntraInter);
        let (records, _) = search(&graph, &functions, 1, &config);
        assert_eq!(node_paths(&records), vec![vec![1, 10, 11, 2, 3]]);
    }

    #[test]
    fn test_probability_ceiling_filters() {
        let counts = CountTable::new().with_record(1, 3, 4, false);
        let graph = BranchGraph::parse("1 2 3\n", &counts, NoInformationPolicy::Neutral);
        let config = plain().with_max_probability(Some(0.5));
        let (records, report) = search(&graph, &FunctionTable::default(), 1, &config);

        assert_eq!(node_paths(&records), vec![vec![1, 3]]);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.emitted, 2);
    }

    #[test]
    fn test_cancelled_before_start() {
        let graph = BranchGraph::parse("1 2 3\n", &NoCounts, NoInformationPolicy::Neutral);
        let lines = SourceMap::whole_graph();
        let functions = FunctionTable::default();
        let inputs = SearchInputs::new(&graph, &lines, &functions);
        let config = plain();
        let mut sink = MemorySink::new();
        let cancel = CancelToken::never().with_deadline(Instant::now());

        let report = SearchSession::new(inputs, &config, &mut sink, cancel)
            .run(1)
            .unwrap();
        assert_eq!(report.termination, Termination::TimeBudget);
        assert_eq!(report.records_written, 0);
    }
}
