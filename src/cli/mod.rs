// CLI command definitions

use crate::cfg::{NoInformationPolicy, NodeId};
use crate::paths::DEFAULT_SIMILARITY_THRESHOLD;
use crate::search::{AnalysisMode, ProbabilityStrategy};
use crate::select::DEFAULT_TOP;
use crate::storage::DEFAULT_CHUNK_SIZE;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Environment variable naming the record directory
pub const OUT_DIR_ENV: &str = "PREACH_OUT_DIR";

/// Default record directory
pub const DEFAULT_OUT_DIR: &str = "./logs";

/// Preach - probabilistic rare-path search over branch CFGs
///
/// Enumerates execution paths through a branch-level control-flow graph,
/// scores each with the joint probability of its branch outcomes, and
/// selects the rarest for downstream test generation.
#[derive(Parser, Debug, Clone)]
#[command(name = "preach")]
#[command(author, version, about)]
#[command(long_about = "Preach searches a branch-level CFG for rare execution paths.

Each branch outcome carries a probability derived from model counts of its
constraint (satisfying values / domain size). A search walks the graph
depth-first, rarer outcomes first, and writes every path with its joint
probability into chunked record files. The selector then deduplicates the
records and picks the N least probable paths.")]
pub struct Cli {
    /// Output format
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Search for rare paths from a root node or function
    Search(SearchArgs),

    /// Select the rarest distinct paths from record files
    Select(SelectArgs),

    /// Parse the CFG and summarize or export it
    Cfg(CfgArgs),
}

/// Graph inputs shared by `search` and `cfg`
#[derive(Args, Debug, Clone)]
pub struct GraphArgs {
    /// CFG dump (`start [true [false]]` per line)
    #[arg(long)]
    pub cfg: PathBuf,

    /// Branch constraints directory (branch_<id>.smt2 / branch_<id>.count)
    #[arg(long)]
    pub constraints: Option<PathBuf>,

    /// Branch statement table [default: <constraints>/branch_statements]
    #[arg(long)]
    pub statements: Option<PathBuf>,

    /// Function map [default: <cfg>_func_map]
    #[arg(long)]
    pub function_map: Option<PathBuf>,

    /// Symbol marking a branch as irrelevant when declared in its constraint
    #[arg(long = "irrelevant-symbol")]
    pub irrelevant_symbols: Vec<String>,

    /// Probabilities for branches without a count record
    #[arg(long, value_enum, default_value_t = NoInformationPolicy::Neutral)]
    pub unknown_policy: NoInformationPolicy,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Tainted source lines; only their branches contribute probability
    #[arg(long)]
    pub dependent_lines: Option<PathBuf>,

    /// How call edges are treated
    #[arg(long, value_enum, default_value_t = AnalysisMode::IntraInter)]
    pub mode: AnalysisMode,

    /// Wall-clock budget in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    pub time_budget: u64,

    /// Maximum line-bearing nodes per path
    #[arg(long, default_value_t = 60)]
    pub max_depth: usize,

    /// Times a node may be open on one path
    #[arg(long, default_value_t = 1)]
    pub loop_bound: usize,

    /// Root node id
    #[arg(long, conflicts_with = "function", required_unless_present = "function")]
    pub root: Option<NodeId>,

    /// Root function name (looked up in the function map)
    #[arg(long)]
    pub function: Option<String>,

    /// Path probability computation
    #[arg(long, value_enum, default_value_t = ProbabilityStrategy::Direct)]
    pub strategy: ProbabilityStrategy,

    /// Record directory
    #[arg(long, env = "PREACH_OUT_DIR")]
    pub out_dir: Option<String>,

    /// Records per chunk file
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Near-duplicate similarity threshold (0-100)
    #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    pub similarity: u8,

    /// Keep near-duplicates of the previous path
    #[arg(long)]
    pub no_inline_dedup: bool,

    /// Only record paths at most this probable
    #[arg(long)]
    pub max_probability: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
pub struct SelectArgs {
    /// Record files or record directories
    #[arg(long, required = true, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Number of paths to select
    #[arg(long, default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Near-duplicate similarity threshold (0-100)
    #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    pub similarity: u8,

    /// Deduplicate within each file only
    #[arg(long)]
    pub per_chunk: bool,

    /// Write the selection to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Print node sequences only
    #[arg(long)]
    pub nodes_only: bool,

    /// Branch statement table, to print each path's condition
    #[arg(long)]
    pub statements: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct CfgArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Count nodes reachable from this node
    #[arg(long, conflicts_with = "function")]
    pub root: Option<NodeId>,

    /// Count nodes reachable from this function's entry
    #[arg(long)]
    pub function: Option<String>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<CfgFormat>,
}

/// CFG output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgFormat {
    /// Human-readable text
    Human,
    /// Graphviz DOT format
    Dot,
    /// JSON export
    Json,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Resolve the record directory from multiple sources
///
/// Priority: CLI arg > PREACH_OUT_DIR env var > default "./logs"
pub fn resolve_out_dir(cli_dir: Option<String>) -> String {
    match cli_dir {
        Some(dir) => dir,
        None => std::env::var(OUT_DIR_ENV).unwrap_or_else(|_| DEFAULT_OUT_DIR.to_string()),
    }
}

/// Default statement table location inside a constraints directory
pub fn default_statements_path(constraints: &std::path::Path) -> PathBuf {
    constraints.join("branch_statements")
}

/// Default function map location next to the CFG dump
pub fn default_function_map_path(cfg: &std::path::Path) -> PathBuf {
    let mut name = cfg.as_os_str().to_owned();
    name.push("_func_map");
    PathBuf::from(name)
}

// ============================================================================
// Command Handlers
// ============================================================================

pub mod cmds {
    use super::*;
    use crate::cfg::{
        export_dot, export_json, BranchGraph, ConstraintDir, CountSource, DependentLines,
        FunctionTable, NoCounts, SourceMap,
    };
    use crate::error::PreachError;
    use crate::output::{self, JsonError, JsonResponse};
    use crate::paths::PathRecord;
    use crate::search::{run_search_to_dir, CancelToken, Root, SearchConfig, SearchInputs, SearchReport};
    use crate::select::{select_from_inputs, SelectorConfig};
    use anyhow::{Context, Result};
    use serde::Serialize;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    /// Stack size for the search thread; the DFS recurses once per node
    const SEARCH_STACK_SIZE: usize = 1 << 30;

    /// Print an error in the requested format and exit
    fn fail(format: OutputFormat, err: JsonError) -> ! {
        let code = err.exit_code();
        match format {
            OutputFormat::Human => {
                output::error(&err.message);
                if let Some(hint) = &err.remediation {
                    output::info(&format!("Hint: {}", hint));
                }
            }
            OutputFormat::Json => println!("{}", JsonResponse::new(err).to_json()),
            OutputFormat::Pretty => println!("{}", JsonResponse::new(err).to_pretty_json()),
        }
        std::process::exit(code);
    }

    fn fail_config(format: OutputFormat, err: &PreachError) -> ! {
        fail(format, JsonError::from_preach_error(err))
    }

    fn require_exists(format: OutputFormat, path: &Path) {
        if !path.exists() {
            fail(format, JsonError::input_not_found(&path.display().to_string()));
        }
    }

    fn emit<T: Serialize>(format: OutputFormat, data: T) {
        match format {
            OutputFormat::Json => println!("{}", JsonResponse::new(data).to_json()),
            _ => println!("{}", JsonResponse::new(data).to_pretty_json()),
        }
    }

    /// Graph and side tables loaded from disk
    struct LoadedGraph {
        graph: BranchGraph,
        lines: SourceMap,
        functions: FunctionTable,
    }

    fn load_graph(args: &GraphArgs, format: OutputFormat) -> Result<LoadedGraph> {
        require_exists(format, &args.cfg);

        let counts: Box<dyn CountSource> = match &args.constraints {
            Some(dir) => {
                require_exists(format, dir);
                Box::new(ConstraintDir::new(dir).with_irrelevant_symbols(args.irrelevant_symbols.clone()))
            }
            None => {
                tracing::warn!("no constraints directory; every branch is unmeasured");
                Box::new(NoCounts)
            }
        };
        let graph = BranchGraph::load(&args.cfg, counts.as_ref(), args.unknown_policy)?;

        let statements = match (&args.statements, &args.constraints) {
            (Some(path), _) => {
                require_exists(format, path);
                Some(path.clone())
            }
            (None, Some(dir)) => Some(default_statements_path(dir)).filter(|p| p.exists()),
            (None, None) => None,
        };
        let lines = match statements {
            Some(path) => SourceMap::load(&path)?,
            None => {
                tracing::warn!("no branch statement table; recording every node");
                SourceMap::whole_graph()
            }
        };

        let functions = match &args.function_map {
            Some(path) => {
                require_exists(format, path);
                FunctionTable::load(path)?
            }
            None => {
                let path = default_function_map_path(&args.cfg);
                if path.exists() {
                    FunctionTable::load(&path)?
                } else {
                    FunctionTable::default()
                }
            }
        };

        Ok(LoadedGraph {
            graph,
            lines,
            functions,
        })
    }

    pub fn search(args: SearchArgs, cli: &Cli) -> Result<()> {
        let format = cli.output;

        let config = SearchConfig::default()
            .with_mode(args.mode)
            .with_max_depth(args.max_depth)
            .with_loop_bound(args.loop_bound)
            .with_time_budget((args.time_budget > 0).then(|| Duration::from_secs(args.time_budget)))
            .with_strategy(args.strategy)
            .with_inline_dedup(!args.no_inline_dedup)
            .with_similarity_threshold(args.similarity)
            .with_max_probability(args.max_probability)
            .with_chunk_size(args.chunk_size);
        if let Err(e) = config.validate() {
            fail_config(format, &e);
        }

        let loaded = load_graph(&args.graph, format)?;
        let dependent = match &args.dependent_lines {
            Some(path) => {
                require_exists(format, path);
                Some(DependentLines::load(path)?)
            }
            None => None,
        };

        let root = match (&args.root, &args.function) {
            (Some(node), _) => Root::Node(*node),
            (None, Some(name)) => Root::Function(name.clone()),
            (None, None) => output::exit_usage("Either --root or --function is required"),
        };
        let root = match root.resolve(&loaded.graph, &loaded.functions) {
            Ok(node) => node,
            Err(e) => fail_config(format, &e),
        };

        let out_dir = PathBuf::from(resolve_out_dir(args.out_dir.clone()));
        let inputs = SearchInputs::new(&loaded.graph, &loaded.lines, &loaded.functions)
            .with_dependent(dependent.as_ref());

        let report = std::thread::scope(|scope| -> Result<SearchReport> {
            std::thread::Builder::new()
                .name("preach-search".to_string())
                .stack_size(SEARCH_STACK_SIZE)
                .spawn_scoped(scope, || {
                    run_search_to_dir(inputs, root, &config, &out_dir, CancelToken::never())
                })
                .context("Failed to spawn search thread")?
                .join()
                .map_err(|_| anyhow::anyhow!("search thread panicked"))?
        });

        let report = match report {
            Ok(report) => report,
            Err(e) => fail(format, JsonError::search_failed(&format!("{:#}", e))),
        };

        match format {
            OutputFormat::Human => print_search_report(&report, &out_dir),
            _ => emit(format, &report),
        }
        Ok(())
    }

    fn print_search_report(report: &SearchReport, out_dir: &Path) {
        output::header(&format!("Search from node {} ({})", report.root, report.mode));
        println!("  Paths emitted:     {}", report.emitted);
        println!("  Near-duplicates:   {} suppressed, {} replaced", report.suppressed, report.replaced);
        println!("  Above ceiling:     {}", report.filtered);
        println!("  Memo hits:         {}", report.memo_hits);
        println!("  Records written:   {}", report.records_written);
        println!("  Chunk files:       {}", report.chunks.len());
        println!("  Elapsed:           {} ms", report.elapsed_ms);
        println!("  Termination:       {}", report.termination);
        println!();
        output::success(&format!(
            "{} records in {}",
            report.records_written,
            out_dir.display()
        ));
    }

    /// One selected path as shown in JSON output
    #[derive(Debug, Serialize)]
    struct SelectedPath {
        nodes: String,
        lines: String,
        probability: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    }

    #[derive(Debug, Serialize)]
    struct SelectResponse {
        files: usize,
        records_read: usize,
        after_dedup: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        out: Option<String>,
        selected: Vec<SelectedPath>,
    }

    fn render_selected(record: &PathRecord, nodes_only: bool) -> String {
        if nodes_only {
            record.node_key()
        } else {
            record.to_string()
        }
    }

    pub fn select(args: SelectArgs, cli: &Cli) -> Result<()> {
        let format = cli.output;

        if args.similarity > 100 {
            fail_config(format, &PreachError::InvalidSimilarity(args.similarity));
        }
        for input in &args.input {
            require_exists(format, input);
        }
        let statements = match &args.statements {
            Some(path) => {
                require_exists(format, path);
                Some(SourceMap::load(path)?)
            }
            None => None,
        };

        let config = SelectorConfig::default()
            .with_top(args.top)
            .with_similarity_threshold(args.similarity)
            .with_per_chunk(args.per_chunk);
        let selection = select_from_inputs(&args.input, &config)?;

        if let Some(out) = &args.out {
            let mut text = String::new();
            for record in &selection.selected {
                text.push_str(&render_selected(record, args.nodes_only));
                text.push('\n');
            }
            fs::write(out, text).with_context(|| format!("Failed to write {}", out.display()))?;
        }

        match format {
            OutputFormat::Human => {
                if args.out.is_none() {
                    for record in &selection.selected {
                        println!("{}", render_selected(record, args.nodes_only));
                        if let Some(map) = &statements {
                            let condition = map.path_condition(&record.nodes);
                            if !condition.is_empty() {
                                println!("    {}", condition);
                            }
                        }
                    }
                }
                output::info(&format!(
                    "{} records from {} files, {} after dedup, {} selected",
                    selection.records_read,
                    selection.files,
                    selection.after_dedup,
                    selection.selected.len()
                ));
                if let Some(out) = &args.out {
                    output::success(&format!("Selection written to {}", out.display()));
                }
            }
            _ => {
                let selected = selection
                    .selected
                    .iter()
                    .map(|record| SelectedPath {
                        nodes: record.node_key(),
                        lines: record.line_key(),
                        probability: record.probability,
                        condition: statements
                            .as_ref()
                            .map(|map| map.path_condition(&record.nodes)),
                    })
                    .collect();
                emit(
                    format,
                    SelectResponse {
                        files: selection.files,
                        records_read: selection.records_read,
                        after_dedup: selection.after_dedup,
                        out: args.out.as_ref().map(|p| p.display().to_string()),
                        selected,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn cfg(args: CfgArgs, cli: &Cli) -> Result<()> {
        let format = cli.output;
        let loaded = load_graph(&args.graph, format)?;

        let root = match (&args.root, &args.function) {
            (Some(node), _) => Some(Root::Node(*node)),
            (None, Some(name)) => Some(Root::Function(name.clone())),
            (None, None) => None,
        };
        let root = match root.map(|r| r.resolve(&loaded.graph, &loaded.functions)) {
            Some(Ok(node)) => Some(node),
            Some(Err(e)) => fail_config(format, &e),
            None => None,
        };

        let cfg_format = args.format.unwrap_or(match format {
            OutputFormat::Human => CfgFormat::Human,
            _ => CfgFormat::Json,
        });

        match cfg_format {
            CfgFormat::Dot => {
                print!("{}", export_dot(&loaded.graph, &loaded.lines, &loaded.functions));
            }
            CfgFormat::Json => {
                let export = export_json(&loaded.graph, &loaded.lines, &loaded.functions);
                emit(format, export);
            }
            CfgFormat::Human => {
                let summary = loaded.graph.summary(root);
                output::header(&format!("CFG {}", args.graph.cfg.display()));
                println!("  Nodes:           {}", summary.nodes);
                println!("  Edges:           {}", summary.edges);
                println!("  Branches:        {} ({} unmeasured)", summary.branches, summary.exempt_branches);
                println!("  Terminals:       {}", summary.terminals);
                println!("  Functions:       {}", loaded.functions.len());
                println!("  Line-bearing:    {}", loaded.lines.len());
                if summary.skipped_lines > 0 {
                    println!("  Skipped lines:   {}", summary.skipped_lines);
                }
                if let (Some(node), Some(reachable)) = (root, summary.reachable_from_root) {
                    println!("  Reachable from {}: {}", node, reachable);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_out_dir_precedence() {
        // Env var manipulation stays in one test so cases cannot race
        std::env::remove_var(OUT_DIR_ENV);
        assert_eq!(resolve_out_dir(None), "./logs");
        assert_eq!(resolve_out_dir(Some("/custom/logs".to_string())), "/custom/logs");

        std::env::set_var(OUT_DIR_ENV, "/env/logs");
        assert_eq!(resolve_out_dir(None), "/env/logs");
        assert_eq!(resolve_out_dir(Some("/cli/logs".to_string())), "/cli/logs");
        std::env::remove_var(OUT_DIR_ENV);
    }

    #[test]
    fn test_default_side_table_paths() {
        assert_eq!(
            default_function_map_path(std::path::Path::new("data/libxml2.cfg")),
            PathBuf::from("data/libxml2.cfg_func_map")
        );
        assert_eq!(
            default_statements_path(std::path::Path::new("constraints")),
            PathBuf::from("constraints/branch_statements")
        );
    }

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::try_parse_from([
            "preach", "search", "--cfg", "g.cfg", "--root", "7", "--mode", "intra",
            "--strategy", "memoized", "--irrelevant-symbol", "xml",
        ])
        .unwrap();
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.root, Some(7));
                assert_eq!(args.mode, AnalysisMode::Intra);
                assert_eq!(args.strategy, ProbabilityStrategy::Memoized);
                assert_eq!(args.graph.irrelevant_symbols, vec!["xml".to_string()]);
                assert_eq!(args.max_depth, 60);
                assert_eq!(args.chunk_size, 5000);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_search_requires_root_or_function() {
        assert!(Cli::try_parse_from(["preach", "search", "--cfg", "g.cfg"]).is_err());
        assert!(Cli::try_parse_from([
            "preach", "search", "--cfg", "g.cfg", "--root", "1", "--function", "main"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_select_args() {
        let cli = Cli::try_parse_from([
            "preach", "--output", "json", "select", "--input", "logs", "--input", "more",
            "--top", "5", "--nodes-only",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Select(args) => {
                assert_eq!(args.input.len(), 2);
                assert_eq!(args.top, 5);
                assert!(args.nodes_only);
                assert!(!args.per_chunk);
            }
            _ => panic!("expected select"),
        }
    }
}
