use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::executor::{DuckDbExecutor, QueryExecutor};
use crate::db::multi_db_pool::MultiDbConnectionManager;
use crate::db::registry::DatabaseRegistry;
use crate::history::HistoryRecorder;
use crate::llm::TranslationClient;

/// Shared application state for the web server. Holds collaborators only;
/// nothing in here is mutated per request.
pub struct AppState {
    pub config: AppConfig,
    pub translator: TranslationClient,
    pub executor: Arc<dyn QueryExecutor>,
    pub multi_db_manager: Arc<MultiDbConnectionManager>,
    pub registry: DatabaseRegistry,
    pub history: Arc<HistoryRecorder>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        translator: TranslationClient,
        history: HistoryRecorder,
    ) -> Self {
        let multi_db_manager = Arc::new(MultiDbConnectionManager::new(
            config.database.read_only,
            config.database.max_open_databases,
        ));
        let executor = Arc::new(DuckDbExecutor::new(
            Arc::clone(&multi_db_manager),
            Duration::from_secs(config.database.execute_timeout_secs),
        ));
        let registry = DatabaseRegistry::new(&config.data_dir);

        Self {
            config,
            translator,
            executor,
            multi_db_manager,
            registry,
            history: Arc::new(history),
            startup_time: chrono::Utc::now(),
        }
    }
}
