// Bio-entropy guided proof-of-work engine - CLI

use bio_mining::cli::{Cli, CliHandler, EXIT_BIO, EXIT_CONFIG};
use bio_mining::config::EngineConfig;
use bio_mining::engine::EngineError;
use clap::Parser;

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Error: {}", err);
                std::process::exit(EXIT_CONFIG);
            }
        },
        None => EngineConfig::default(),
    };

    let mut handler = match CliHandler::new(config) {
        Ok(handler) => handler,
        Err(err) => {
            eprintln!("Error initializing: {}", err);
            let code = match err {
                EngineError::Config(_) => EXIT_CONFIG,
                EngineError::Bio(_) => EXIT_BIO,
            };
            std::process::exit(code);
        }
    };

    std::process::exit(handler.handle(cli.command));
}
