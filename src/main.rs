use chancery::cli;
use chancery::core::config::ConfigLoader;
use chancery::logging;
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::process;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match ConfigLoader::load_from_dir(&cwd) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {}", err);
            process::exit(1);
        }
    };

    let _logging_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = cli::run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}
