mod cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "wisp",
    about = "Local emulator for serverless function packages — routes, rebuilds, and invocations",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a project's actions locally, rebuilding sources on change
    RunLocal {
        /// Path to the project manifest (YAML)
        manifest: PathBuf,

        /// Port to listen on
        #[arg(long, default_value = "3233")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::RunLocal { manifest, port } => cmd::run_local::run(&manifest, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
