use std::{env, process};

use clap::Parser;
use console::style;
use log::{error, info};

use pagestamp::{App, Cli, Result, Settings, StampError};

pub fn initialize_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    info!("Logger initialized");
}

async fn run(cli: Cli) -> Result<()> {
    let settings_path = cli
        .config
        .or_else(Settings::default_path)
        .ok_or_else(|| StampError::ConfigError {
            message: "No settings location available; pass --config".to_string(),
        })?;
    let graph = match cli.graph {
        Some(path) => path,
        None => env::current_dir()?,
    };

    App::new(settings_path, graph).run(cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(1);
    }
}
