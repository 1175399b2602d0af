// crates/weavecli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use weavecore::{ExecutionEvent, Graph, LogKind, Value};
use weaveruntime::{Engine, EngineConfig, NodeRegistry, RunOptions};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave graph engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pause before every node; press Enter to step, `q` to stop
        #[arg(short, long)]
        debug: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            debug,
            verbose,
        } => {
            init_tracing(verbose);
            run_graph(&file, input, config.as_deref(), debug).await?;
        }

        Commands::Validate { file } => {
            init_tracing(false);
            validate_graph(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);
    registry
}

fn load_graph(file: &Path) -> Result<Graph> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading graph {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing graph {}", file.display()))
}

fn load_config(file: Option<&Path>) -> Result<EngineConfig> {
    let Some(file) = file else {
        return Ok(EngineConfig::default());
    };
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading config {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing config {}", file.display()))
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { trigger_count, .. } => {
            println!("▶️  Run started with {} trigger(s)", trigger_count);
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            attempts,
            ..
        } => {
            if attempts > 1 {
                println!(
                    "  ✅ Node {} completed in {}ms after {} attempts",
                    node_id, duration_ms, attempts
                );
            } else {
                println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
            }
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeRetrying {
            node_id,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!(
                "  🔁 Node {} retry #{} in {}ms: {}",
                node_id, attempt, delay_ms, error
            );
        }
        ExecutionEvent::Log { entry, .. } => {
            let icon = match entry.kind {
                LogKind::Info => "ℹ️ ",
                LogKind::Success => "✔️ ",
                LogKind::Warning => "⚠️ ",
                LogKind::Error => "❗",
                LogKind::Debug => "🔎",
            };
            match entry.data {
                Some(data) => println!(
                    "     {} [{}] {} {}",
                    icon,
                    entry.node_name,
                    entry.message,
                    data.to_text()
                ),
                None => println!("     {} [{}] {}", icon, entry.node_name, entry.message),
            }
        }
        ExecutionEvent::RunCompleted {
            success,
            duration_ms,
            ..
        } => {
            if success {
                println!("✨ Run completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Run failed after {}ms", duration_ms);
            }
        }
    }
}

async fn run_graph(
    file: &Path,
    input: Option<String>,
    config: Option<&Path>,
    debug: bool,
) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());

    let graph = load_graph(file)?;
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!();

    let input = match input {
        Some(raw) => {
            let json: serde_json::Value =
                serde_json::from_str(&raw).context("input must be valid JSON")?;
            Value::from(json)
        }
        None => Value::Null,
    };

    let engine = Engine::with_registry(Arc::new(registry()), load_config(config)?);
    engine.validate(&graph)?;

    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let control = engine.control();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Stopping run");
            control.stop();
        }
    });

    let stepper = debug.then(|| {
        println!("🐞 Debug mode: press Enter to run the next node, `q` to stop");
        let control = engine.control();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().eq_ignore_ascii_case("q") {
                    control.stop();
                    break;
                }
                control.step();
            }
        })
    });

    let options = if debug {
        RunOptions::debug()
    } else {
        RunOptions::default()
    };
    let report = engine.run(graph, input, options).await?;

    // let the listener drain what is already buffered
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();
    interrupt.abort();
    if let Some(stepper) = stepper {
        stepper.abort();
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!("   Nodes run: {}", report.results.len());
    println!("   Duration: {}ms", report.duration_ms);

    if let Some(output) = &report.output {
        println!();
        println!("📤 Output:");
        println!("{}", serde_json::to_string_pretty(&output.to_json())?);
    }

    if let Some(error) = &report.error {
        anyhow::bail!("run failed: {}", error);
    }
    Ok(())
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let graph = load_graph(file)?;
    let engine = Engine::new(registry());
    engine.validate(&graph)?;

    let triggers = engine.registry().trigger_nodes(&graph).len();
    println!("✅ Graph is valid:");
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!("   Triggers: {}", triggers);

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({}, {:?})", node_type, metadata.category, metadata.kind);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
    println!();
    println!("Generation nodes (ai.generate, ai.agent) need a text provider and are");
    println!("registered by hosts that embed the engine.");
}
