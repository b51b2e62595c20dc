//! `ade` binary: runs the HTTP control plane, the durable-queue worker
//! pool, or one-off admin operations, depending on the subcommand.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ade", about = "ADE control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Server,
    /// Run the durable-queue worker pool.
    Worker,
    /// One-off administrative operations.
    Admin {
        #[command(subcommand)]
        command: commands::admin::AdminCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server => commands::server::run().await,
        Commands::Worker => commands::worker::run().await,
        Commands::Admin { command } => commands::admin::run(command).await,
    }
}
