mod config;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meshsight_common::init_tracing;
use meshsight_crawler::mock::demo_mesh;
use meshsight_crawler::{Crawler, HttpGateway, Transport};
use meshsight_exporters::{
    MuninExporter, collect_rows, render_dot, render_table, take_snapshot, to_json,
};

use crate::config::MeshsightConfig;

/// Topology and health monitor for VESNA sensor meshes.
#[derive(Parser, Debug)]
#[command(name = "meshsight")]
#[command(about = "Crawl a VESNA mesh and report its topology and health", long_about = None)]
struct Args {
    /// Path to the configuration file (JSON5 format).
    #[arg(short, long, default_value = "meshsight.json5")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Crawl the built-in scripted mesh instead of the gateway.
    #[arg(long)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the node table.
    Table,
    /// Write the topology as a Graphviz digraph.
    Dot {
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Refresh Munin configuration and value files.
    Munin {
        /// Output directory (overrides munin.output_dir).
        #[arg(short = 'd', long)]
        output_dir: Option<PathBuf>,
    },
    /// Write a JSON snapshot of every node and reading.
    Json {
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The demo mesh needs no gateway, so its config file is optional
    let config = if args.demo && !args.config.exists() {
        MeshsightConfig::default()
    } else {
        MeshsightConfig::load(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    };

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_tracing(&logging).context("Failed to initialize tracing")?;

    config.validate().context("Invalid configuration")?;

    let coordinator: Arc<dyn Transport> = if args.demo {
        tracing::info!("Using the built-in demo mesh");
        Arc::new(demo_mesh())
    } else {
        let gateway = config
            .gateway
            .clone()
            .context("The gateway section is required unless --demo is given")?;
        tracing::info!(
            url = %gateway.base_url,
            cluster = gateway.cluster_id,
            "Using testbed gateway"
        );
        Arc::new(HttpGateway::new(gateway).context("Failed to create gateway client")?)
    };

    let mut map = Crawler::new(coordinator, config.crawl.clone()).crawl().await;

    match args.command {
        Command::Table => {
            let rows = collect_rows(&mut map).await;
            write_output(None, &render_table(&rows))?;
        }
        Command::Dot { output } => {
            write_output(output.as_deref(), &render_dot(&map))?;
        }
        Command::Munin { output_dir } => {
            let dir = output_dir.unwrap_or_else(|| config.munin.output_dir.clone());
            MuninExporter::new(&dir)
                .export(&mut map)
                .await
                .with_context(|| format!("Failed to export Munin files to {:?}", dir))?;
        }
        Command::Json { output } => {
            let snapshot = take_snapshot(&mut map).await;
            let json = to_json(&snapshot).context("Failed to serialize snapshot")?;
            write_output(output.as_deref(), &(json + "\n"))?;
        }
    }

    Ok(())
}

/// Write to `path`, or to stdout when no path is given.
fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {:?}", path))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(contents.as_bytes())
                .context("Failed to write to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
    }
    Ok(())
}
