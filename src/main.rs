use std::sync::Arc;

use app::{App, Flags};
use config::Config;
use iced::{Application, Settings};
use reconciler::SharedStore;
use store::LocalStore;

mod app;
mod catalog;
mod config;
mod counts;
mod decklist;
mod error;
mod export;
mod life;
mod models;
mod reconciler;
mod store;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::new();
    let store: SharedStore = match &config.data_file {
        Some(path) => {
            let runtime = tokio::runtime::Runtime::new()?;
            Arc::new(runtime.block_on(LocalStore::open(path))?)
        }
        None => Arc::new(LocalStore::in_memory()),
    };

    App::run(Settings::with_flags(Flags { config, store }))?;
    Ok(())
}
