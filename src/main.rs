use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod history;
mod llm;
mod schema;
mod util;
mod visual;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::history::HistoryRecorder;
use crate::llm::TranslationClient;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration; logging depends on it
    let config = match AppConfig::new(&args) {
        Ok(config) => {
            init_tracing(&config.log);
            config
        }
        Err(e) => {
            init_tracing(&Default::default());
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Ensure data directory exists
    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    info!(
        "Initializing translation client with backend: {}",
        config.llm.backend
    );
    let translator = TranslationClient::from_config(&config.llm, config.assisted_llm.as_ref())?;

    info!("Initializing history store: {}", config.history.backend);
    let history = HistoryRecorder::from_config(&config.history)?;

    let app_state = Arc::new(AppState::new(config.clone(), translator, history));

    // Start the web server
    info!("Starting textql server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
