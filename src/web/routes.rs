use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Translation endpoints
            .route("/text-to-sql/simple", post(handlers::api::text_to_sql_simple))
            .route("/text-to-sql/complex", post(handlers::api::text_to_sql_complex))
            .route("/text-to-sql/gpt", post(handlers::api::text_to_sql_gpt))
            // Query endpoints
            .route("/database/execute-sql", post(handlers::api::execute_sql))
            .route("/database/nl-query", post(handlers::api::nl_query))
            // Schema
            .route("/database/schema", get(handlers::api::get_schema))
            .route("/database/diagram", get(handlers::api::get_diagram))
            // Per-user databases
            .route("/database/custom/list", get(handlers::api::list_databases))
            .route("/database/custom/add", post(handlers::api::add_database))
            .route("/database/custom/delete", delete(handlers::api::delete_database))
            // Audit history
            .route(
                "/history",
                get(handlers::api::list_history).delete(handlers::api::clear_history),
            )
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
