//! Page timestamp engine library
//!
//! Keeps `created::` and `updated::` properties in the first block of each
//! page current as the user edits. Hosts plug in through [`Host`]; a graph
//! folder host and an in-memory host are included.

pub mod analyzer;
mod cache;
mod cli;
mod config;
mod date_format;
pub mod editor;
mod errors;
mod gate;
mod graph;
mod history;
mod host;
mod memory;
mod types;
mod watcher;

// Re-export key components
pub use analyzer::{classify, Shape, StampKeys};
pub use cache::*;
pub use cli::*;
pub use config::*;
pub use date_format::*;
pub use editor::{plan, Edit, Stamps};
pub use errors::*;
pub use gate::*;
pub use graph::*;
pub use history::*;
pub use host::*;
pub use memory::*;
pub use types::*;
pub use watcher::*;
