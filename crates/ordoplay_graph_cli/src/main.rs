// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ordoplay_graph` - evaluate `OrdoPlay` dataflow graph documents from the
//! command line.
//!
//! Documents are RON files holding a graph's nodes, explicit property values
//! and arcs. Every built-in node type is available.

use clap::{Parser, Subcommand};
use ordoplay_dataflow::config::CONFIG_FILE_NAME;
use ordoplay_dataflow::graphs::create_builtin_registry;
use ordoplay_dataflow::{
    GraphDocument, GraphError, GraphId, NodeId, RegistryError, Value, Workspace, WorkspaceConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ordoplay_graph")]
#[command(about = "Evaluate OrdoPlay dataflow graph documents", version)]
struct Cli {
    /// Workspace configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one output of a node
    Eval {
        /// Graph document
        document: PathBuf,
        /// Node ID
        node: NodeId,
        /// Output label
        output: String,
    },
    /// Evaluate every output of every node and report failures
    Check {
        /// Graph document
        document: PathBuf,
    },
    /// List the outputs of a node type
    Outputs {
        /// Node type tag
        node_type: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("Failed to format value: {0}")]
    Format(#[from] ron::Error),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("{0} output(s) failed")]
    Failures(usize),
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "ordoplay_dataflow=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Eval {
            document,
            node,
            output,
        } => {
            let (workspace, _) = open(&cli.config, &document)?;
            let value = workspace.get_or_compute(node, &output)?;
            println!("{}", format_value(&value)?);
            Ok(())
        }
        Commands::Check { document } => {
            let (workspace, graph) = open(&cli.config, &document)?;
            check(&workspace, graph)
        }
        Commands::Outputs { node_type } => {
            let registry = create_builtin_registry()?;
            let descriptor = registry
                .get(&node_type)
                .ok_or(CliError::UnknownNodeType(node_type))?;
            for output in &descriptor.outputs {
                let cached = if output.cacheable { "" } else { " (uncached)" };
                println!(
                    "{}: {} <- [{}]{}",
                    output.name,
                    output.kind,
                    output.arguments.join(", "),
                    cached
                );
            }
            Ok(())
        }
    }
}

/// Workspace holding the document's graph
fn open(config: &Path, document: &Path) -> Result<(Workspace, GraphId), CliError> {
    let config = WorkspaceConfig::load_or_default(config)?;
    let document = GraphDocument::load(document)?;
    let workspace = Workspace::new(create_builtin_registry()?, config);
    let graph = workspace.load_document(&document)?;
    tracing::info!(
        "Loaded '{}': {} nodes, {} connections",
        document.name,
        document.nodes.len(),
        document.connections.len()
    );
    Ok((workspace, graph))
}

fn check(workspace: &Workspace, graph: GraphId) -> Result<(), CliError> {
    let mut failures = 0;
    let mut evaluated = 0;
    for node in workspace.nodes(graph)? {
        let node_type = workspace.node_type_of(node)?;
        let Some(descriptor) = workspace.registry().get(&node_type) else {
            continue;
        };
        for output in &descriptor.outputs {
            evaluated += 1;
            match workspace.get_or_compute(node, &output.name) {
                Ok(_) => {}
                Err(GraphError::Computation(err)) => {
                    failures += 1;
                    for root in err.root_causes() {
                        println!("{node_type} {node}:{} failed at {root}", output.name);
                    }
                }
                Err(err) => {
                    failures += 1;
                    println!("{node_type} {node}:{}: {err}", output.name);
                }
            }
        }
    }

    let stats = workspace.cache_stats();
    tracing::info!(
        "Checked {} outputs ({} cached, {} hits)",
        evaluated,
        stats.entries,
        stats.hits
    );
    if failures > 0 {
        return Err(CliError::Failures(failures));
    }
    println!("All {evaluated} outputs evaluated");
    Ok(())
}

fn format_value(value: &Value) -> Result<String, ron::Error> {
    ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
}
