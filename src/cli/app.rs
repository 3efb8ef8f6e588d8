//! Command handlers for the pagestamp binary.
use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use console::style;
use log::{debug, info};

use crate::{
    ChangeGate, Commands, GitHistory, GraphStore, GraphWatcher, HistoryCommand, Outcome,
    Result, Settings, Stamper,
};

/// CLI application handler
pub struct App {
    /// Where settings are read from and written to
    settings_path: PathBuf,

    /// Root of the graph folder
    graph: PathBuf,
}

impl App {
    pub fn new(settings_path: PathBuf, graph: PathBuf) -> Self {
        Self {
            settings_path,
            graph,
        }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Watch => self.watch().await,
            Commands::Stamp { page } => self.stamp(&page).await,
            Commands::Config { show, reset } => self.config(show, reset),
        }
    }

    fn settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path)
    }

    fn stamper(&self, settings: &Settings) -> Result<(Arc<GraphStore>, Stamper<GraphStore>)> {
        let store = Arc::new(GraphStore::open(&self.graph, settings)?);
        let history = settings
            .use_external_history_for_creation_time
            .then(|| Arc::new(GitHistory::new(&self.graph)) as Arc<dyn HistoryCommand>);
        let stamper = Stamper::new(Arc::clone(&store), settings, history);
        Ok((store, stamper))
    }

    async fn watch(&self) -> Result<()> {
        let settings = self.settings()?;
        let (store, stamper) = self.stamper(&settings)?;
        let gate = Arc::new(ChangeGate::start(Arc::new(stamper)));
        let mut watcher = GraphWatcher::start(store, Arc::clone(&gate))?;

        println!(
            "Watching {} (press {} to stop)",
            style(self.graph.display()).bold(),
            style("Ctrl-C").cyan()
        );
        tokio::signal::ctrl_c().await?;

        info!("Shutting down");
        watcher.stop().await;
        gate.stop().await;
        Ok(())
    }

    async fn stamp(&self, name: &str) -> Result<()> {
        let settings = self.settings()?;
        let (store, stamper) = self.stamper(&settings)?;
        let page = store.find_page(name)?;
        debug!("Stamping page {} ({})", page.name, page.id);

        let outcome = stamper
            .evaluate(&page.id, Utc::now().timestamp_millis())
            .await?;
        let summary = match outcome {
            Outcome::Updated(_) | Outcome::Inserted => style("stamped").green(),
            Outcome::Skipped => style("up to date").dim(),
            _ => style("skipped").yellow(),
        };
        println!("{}: {} ({:?})", style(&page.name).bold(), summary, outcome);
        Ok(())
    }

    fn config(&self, show: bool, reset: bool) -> Result<()> {
        if reset {
            Settings::default().save(&self.settings_path)?;
            println!("Settings reset at {}", self.settings_path.display());
        }
        if show || !reset {
            let settings = self.settings()?;
            println!("{}", style(self.settings_path.display()).cyan());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Ok(())
    }
}
