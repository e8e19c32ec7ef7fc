mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::cicd::CicdSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "specweave",
    about = "SpecWeave CI/CD failure monitor",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .specweave/ or .git/)
    #[arg(long, global = true, env = "SPECWEAVE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor CI/CD workflow runs and track failures
    Cicd {
        #[command(subcommand)]
        subcommand: CicdSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Cicd {
            subcommand: CicdSubcommand::Start { .. },
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Cicd { subcommand } => cmd::cicd::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
