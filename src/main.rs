//! Coalesce command-line entry point.

use clap::{Parser, Subcommand};
use coalesce::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// Coalesce: cluster knowledge fragments and consolidate them into knowledge units
#[derive(Parser, Debug)]
#[command(name = "coalesce")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one clustering session over a fragments file
    Cluster(cli::ClusterArgs),
    /// Find fragments similar to a stored fragment or a vector
    Similar(cli::SimilarArgs),
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coalesce=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = if let Some(path) = &args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    match args.command {
        Command::Cluster(cluster_args) => cli::run_cluster(config, cluster_args, args.json).await,
        Command::Similar(similar_args) => cli::run_similar(config, similar_args, args.json).await,
        Command::Config => cli::run_config(&config, args.json),
    }
}
