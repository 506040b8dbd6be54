use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

mod config;
mod db;
mod error;
mod llm;
mod services;
mod streaming;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::build_pool;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

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
        "Opening DuckDB database at {}",
        config.database.connection_string
    );
    let pool = build_pool(&config.database.connection_string, config.database.pool_size as u32)?;

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;

    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, pool, llm_manager));

    if let Err(e) = app_state.contexts.setup().await {
        warn!("Failed to prepare contexts table: {}", e);
    }

    // Warm the schema cache; requests rebuild it on demand if this fails
    let started = Instant::now();
    match app_state.schema_manager.build_schema().await {
        Ok(schema) => info!(
            "Schema mapped in {:?} ({} chars)",
            started.elapsed(),
            schema.len()
        ),
        Err(e) => error!("Failed to map schema: {}", e),
    }

    info!("Starting server on {}:{}", web_config.host, web_config.port);
    match web::run_server(web_config, app_state).await {
        Ok(()) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
