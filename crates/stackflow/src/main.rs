mod commands;
mod loader;
mod template;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Project;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(
    about = "Declare a stack of resources, provision it in dependency order",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Stack file (default: discovered from the current directory)
    #[arg(short, long, global = true, env = "STACKFLOW_FILE")]
    file: Option<PathBuf>,

    /// Stage to select (dev, live, ...)
    #[arg(short, long, global = true, env = "STACKFLOW_STAGE")]
    stage: Option<String>,

    /// Maximum number of operations in flight
    #[arg(short, long, global = true)]
    concurrency: Option<usize>,

    /// Provisioning backend
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Simulated)]
    backend: BackendKind,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Instances kept in the state directory, no real infrastructure
    Simulated,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stack file and its dependency graph
    Validate,
    /// Show what apply would change
    Plan,
    /// Create, update, replace and delete resources to match the stack
    Apply {
        /// Apply without stopping after the plan
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every resource recorded for the stack
    Destroy {
        /// Destroy without stopping after the plan
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the stack's exports from the last run
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the dependency waves
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.backend {
        BackendKind::Simulated => tracing::debug!("Using the simulated backend"),
    }

    let project = Project::open(cli.file.as_deref(), cli.stage.as_deref(), cli.concurrency)?;

    match cli.command {
        Commands::Validate => commands::validate::handle(&project).await,
        Commands::Plan => commands::plan::handle(&project).await,
        Commands::Apply { yes } => commands::apply::handle(&project, yes).await,
        Commands::Destroy { yes } => commands::destroy::handle(&project, yes).await,
        Commands::Outputs { json } => commands::outputs::handle(&project, json).await,
        Commands::Graph => commands::graph::handle(&project).await,
    }
}
