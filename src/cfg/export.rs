//! Branch CFG export to DOT and JSON formats

use crate::cfg::{BranchGraph, EdgeType, FunctionTable, NodeId, SourceMap};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Export the graph to DOT format for Graphviz
///
/// Branch nodes are drawn as diamonds, function entries are filled, and
/// each branch edge is labelled with its outcome probability.
pub fn export_dot(graph: &BranchGraph, lines: &SourceMap, functions: &FunctionTable) -> String {
    let mut dot = String::from("digraph CFG {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    let g = graph.petgraph();
    for idx in g.node_indices() {
        let id = g[idx];
        let label = match lines.line_of(id) {
            Some(line) => format!("{}\\nline {}", id, line),
            None => id.to_string(),
        };

        let mut attrs = Vec::new();
        if graph.is_branch(id) {
            attrs.push("shape=diamond");
        }
        if functions.is_entry(id) {
            attrs.push("fillcolor=lightgreen, style=filled");
        } else if graph.is_terminal(id) {
            attrs.push("fillcolor=lightcoral, style=filled");
        }
        let extra = if attrs.is_empty() {
            String::new()
        } else {
            format!(" {}", attrs.join(", "))
        };

        writeln!(dot, "  \"{}\" [label=\"{}\"{}];", id, label, extra).ok();
    }

    dot.push('\n');
    for edge in g.edge_indices() {
        let (from, to) = match g.edge_endpoints(edge) {
            Some(endpoints) => endpoints,
            None => continue,
        };
        let edge_type = g[edge];
        let target = g[to];
        let label = if edge_type.is_branch() {
            format!(
                ", label=\"{} {}\"",
                edge_type.dot_label(),
                graph.outcome_probability(target)
            )
        } else {
            String::new()
        };

        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [color={}, style={}{}];",
            g[from],
            target,
            edge_type.dot_color(),
            if edge_type == EdgeType::Fallthrough {
                "dashed"
            } else {
                "solid"
            },
            label
        )
        .ok();
    }

    dot.push_str("}\n");
    dot
}

/// Complete graph export for JSON serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: NodeId,
    pub kind: String,
    pub line: Option<u32>,
    pub probability: Option<f64>,
    pub function_entry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeType,
}

/// Export the graph to a serializable node/edge dump
pub fn export_json(graph: &BranchGraph, lines: &SourceMap, functions: &FunctionTable) -> GraphExport {
    let g = graph.petgraph();

    let nodes = g
        .node_indices()
        .map(|idx| {
            let id = g[idx];
            let kind = if graph.is_branch(id) {
                "branch"
            } else if graph.is_terminal(id) {
                "terminal"
            } else {
                "control"
            };
            NodeExport {
                id,
                kind: kind.to_string(),
                line: lines.line_of(id),
                probability: graph.probabilities().outcome(id),
                function_entry: functions.is_entry(id),
            }
        })
        .collect();

    let edges = g
        .edge_indices()
        .filter_map(|edge| {
            let (from, to) = g.edge_endpoints(edge)?;
            Some(EdgeExport {
                from: g[from],
                to: g[to],
                kind: g[edge],
            })
        })
        .collect();

    GraphExport { nodes, edges }
}
