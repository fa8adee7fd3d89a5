use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod exec;
mod llm;
mod pipeline;
mod prompt;
mod record;
mod source;
mod store;
mod util;
mod validate;
mod value;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::pipeline::QueryPipeline;
use crate::store::{DuckDbConnectionManager, RecordStore};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = CliArgs::parse();

    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Initializing query history store at {}",
        config.database.connection_string
    );
    let manager = DuckDbConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(manager)?;
    let store = RecordStore::new(pool);
    store.init()?;

    info!("Initializing LLM gateway with backend: {}", config.llm.backend);
    let llm = Arc::new(LlmManager::new(&config.llm)?);

    let pipeline = QueryPipeline::new(store, llm, config.pipeline.clone());
    let app_state = Arc::new(AppState::new(config.clone(), pipeline));

    info!(
        "Starting tabletalk server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web.clone(), app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}
