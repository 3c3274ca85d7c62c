use std::io::IsTerminal;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "retrobbs", about = "Multi-user text bulletin board server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub server (default)
    Serve,

    /// One-shot maintenance: reap idle sessions, sweep expired key-values
    Reap,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Reap) => retrobbs_hub::run_reap(),
        Some(Commands::Serve) | None => retrobbs_hub::run_hub().await,
    };

    if let Err(e) = result {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
