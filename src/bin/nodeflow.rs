//! Run a flow document with the built-in nodes and print terminal results.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use nodeflow::{
    builtin_registry, init_tracing, FlowConfig, FlowDocument, FlowRuntime, LoggingObserver,
};

/// Run a node flow and print the results of its terminal nodes as JSON.
#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(version, about, long_about = None)]
struct Args {
    /// Flow document (YAML, or JSON by extension)
    flow: PathBuf,

    /// Engine configuration file (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the node list, with merged results, to this file
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FlowConfig::from_file(path)?,
        None => FlowConfig::default(),
    }
    .with_env_overrides()?;

    let registry = builtin_registry();
    let mut graph = FlowDocument::from_file(&args.flow)
        .with_context(|| format!("loading {}", args.flow.display()))?
        .assemble(&registry)?;

    let runtime = FlowRuntime::with_observer(config, Arc::new(LoggingObserver));
    let results = runtime.execute(&mut graph).await?;

    println!("{}", serde_json::to_string_pretty(&results)?);

    if let Some(path) = &args.output {
        let document = FlowDocument::from_graph(&graph);
        std::fs::write(path, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if results.iter().any(|r| r.error.is_some()) {
        std::process::exit(1);
    }
    Ok(())
}
