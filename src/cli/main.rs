use std::path::PathBuf;

use clap::Parser;

use crate::Commands;

/// Main CLI application arguments and command structure
#[derive(Parser)]
#[clap(
    version,
    about = "Keeps created/updated properties current on the pages of a graph"
)]
pub struct Cli {
    /// Path to the settings file
    #[clap(short = 'c', long, value_parser)]
    pub config: Option<PathBuf>,

    /// Graph folder holding pages/ and journals/; defaults to the current directory
    #[clap(short, long, value_parser)]
    pub graph: Option<PathBuf>,

    /// Verbose output mode
    #[clap(short, long)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}
