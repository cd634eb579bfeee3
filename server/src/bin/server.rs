//! sockd server binary.

use clap::Parser;
use sockd::config::{Config, DEFAULT_CONFIG};
use sockd::{Server, logging, signal};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sockd")]
#[command(about = "PING/QUIT server with backpressured connection admission")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", DEFAULT_CONFIG);
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No config file specified. Pass a path or use --print-config");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = signal::install_signal_handler()?;
    let server = Server::start(&config)?;
    server.run_until(&shutdown)
}
