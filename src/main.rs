use anyhow::Context;
use clap::Parser;
use std::process;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use udpgrm_activate::cli::{commands, Cli};

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[!] Failed to set tracing subscriber: {}", e);
    }

    debug!("Starting udpgrm-activate v{}", env!("CARGO_PKG_VERSION"));

    let result = commands::handle_activate(&cli)
        .with_context(|| format!("activation of {} on {} failed", cli.name, cli.address));

    if let Err(e) = result {
        eprintln!("[!] {:#}", e);
        process::exit(1);
    }
}
