use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::executor::{connect, ResultSet};
use crate::db::introspect::introspect;
use crate::db::registry::{DatabaseInfo, RegistryError};
use crate::history::{AttemptGuard, HistoryPage, HistoryQuery, QueryKind};
use crate::llm::{prompt, BackendRef, Strategy};
use crate::schema::wire::WireSchema;
use crate::visual::{self, DiagramSpec, TabularSpec};
use crate::web::context::RequestContext;
use crate::web::error::ApiError;
use crate::web::state::AppState;

// Translation types

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub query: String,
    #[serde(default)]
    pub schema: Option<WireSchema>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub sql_query: String,
}

// Query types

#[derive(Debug, Deserialize)]
pub struct ExecuteSqlRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteSqlResponse {
    pub result: ResultSet,
}

#[derive(Debug, Deserialize)]
pub struct NlQueryRequest {
    pub query: String,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Serialize)]
pub struct NlQueryResponse {
    pub sql_query: String,
    pub result: TabularSpec,
}

// Schema types

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub status: &'static str,
    pub schema: WireSchema,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiagramResponse {
    pub diagram: DiagramSpec,
    pub mermaid: String,
}

// Database management types

#[derive(Debug, Deserialize)]
pub struct AddDatabaseRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseNameParams {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DatabaseListResponse {
    pub databases: Vec<DatabaseInfo>,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub assisted_backend: bool,
}

// Translation endpoints

pub async fn text_to_sql_simple(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    translate_with(&state, ctx, payload, Strategy::Simple).await
}

pub async fn text_to_sql_complex(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    translate_with(&state, ctx, payload, Strategy::Complex).await
}

pub async fn text_to_sql_gpt(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    translate_with(&state, ctx, payload, Strategy::ModelAssisted).await
}

/// Builds the prompt for `strategy`, translates it and records the attempt
/// as natural language whatever the outcome.
async fn translate_with(
    state: &AppState,
    ctx: RequestContext,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
    strategy: Strategy,
) -> Result<Json<TranslateResponse>, ApiError> {
    info!("Translating with {:?} strategy for {}", strategy, ctx.user_id);
    let (attempt, payload) = open_attempt(
        state,
        &ctx,
        QueryKind::NaturalLanguage,
        payload,
        |p: &TranslateRequest| &p.query,
    )
    .await?;

    let schema = payload.schema.map(WireSchema::into_model);
    let prompt = prompt::build(&payload.query, schema.as_ref(), strategy);

    match state.translator.translate(&prompt, BackendRef::from(strategy)).await {
        Ok(sql_query) => {
            attempt.succeed(json!({ "sql_query": sql_query })).await;
            Ok(Json(TranslateResponse { sql_query }))
        }
        Err(e) => {
            error!("Translation failed: {}", e);
            attempt.fail(&e).await;
            Err(e.into())
        }
    }
}

/// Starts the history record for an attempt, then checks the body. A body
/// that failed to parse or carries an empty query ends the attempt as failed,
/// with whatever query text could be read.
async fn open_attempt<T>(
    state: &AppState,
    ctx: &RequestContext,
    kind: QueryKind,
    payload: Result<Json<T>, JsonRejection>,
    query_of: impl Fn(&T) -> &String,
) -> Result<(AttemptGuard, T), ApiError> {
    let query_text = payload
        .as_ref()
        .map(|Json(p)| query_of(p).clone())
        .unwrap_or_default();
    let attempt = state.history.begin(
        ctx.user_id.clone(),
        ctx.database.id.clone(),
        kind,
        query_text,
    );

    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            let err = ApiError::from(rejection);
            warn!("Rejected request body from {}: {}", ctx.user_id, err);
            attempt.fail(&err).await;
            return Err(err);
        }
    };

    if query_of(&payload).trim().is_empty() {
        let err = ApiError::bad_request("query must not be empty");
        attempt.fail(&err).await;
        return Err(err);
    }

    Ok((attempt, payload))
}

// Query execution

pub async fn execute_sql(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<ExecuteSqlRequest>, JsonRejection>,
) -> Result<Json<ExecuteSqlResponse>, ApiError> {
    info!("Executing SQL for {} on {}", ctx.user_id, ctx.database.id);
    let (attempt, payload) = open_attempt(
        &state,
        &ctx,
        QueryKind::RawSql,
        payload,
        |p: &ExecuteSqlRequest| &p.query,
    )
    .await?;

    match state.executor.execute(&payload.query, &ctx.database).await {
        Ok(result) => {
            let recorded = serde_json::to_value(&result).unwrap_or_else(|e| {
                warn!("Result not serializable for history: {}", e);
                serde_json::Value::Null
            });
            attempt.succeed(recorded).await;
            Ok(Json(ExecuteSqlResponse { result }))
        }
        Err(e) => {
            error!("SQL execution failed: {}", e);
            attempt.fail(&e).await;
            Err(e.into())
        }
    }
}

/// Question in, rows out: introspect, prompt, translate, execute.
pub async fn nl_query(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<NlQueryRequest>, JsonRejection>,
) -> Result<Json<NlQueryResponse>, ApiError> {
    let (attempt, payload) = open_attempt(
        &state,
        &ctx,
        QueryKind::NaturalLanguage,
        payload,
        |p: &NlQueryRequest| &p.query,
    )
    .await?;
    let strategy = payload.strategy.unwrap_or(Strategy::Complex);
    info!("Natural language query with {:?} strategy for {}", strategy, ctx.user_id);

    let schema = match introspect(&state.multi_db_manager, &ctx.database).await {
        Ok(schema) => schema,
        Err(e) => {
            error!("Schema introspection failed: {}", e);
            let err = ApiError::from(e);
            attempt.fail(&err).await;
            return Err(err);
        }
    };

    let prompt = prompt::build(&payload.query, Some(&schema), strategy);
    let sql_query = match state.translator.translate(&prompt, BackendRef::from(strategy)).await {
        Ok(sql) => sql,
        Err(e) => {
            error!("Translation failed: {}", e);
            attempt.fail(&e).await;
            return Err(e.into());
        }
    };

    match state.executor.execute(&sql_query, &ctx.database).await {
        Ok(result) => {
            let tabular = visual::render_result(&sql_query, &result);
            attempt
                .succeed(json!({ "sql_query": sql_query, "row_count": result.row_count }))
                .await;
            Ok(Json(NlQueryResponse {
                sql_query,
                result: tabular,
            }))
        }
        Err(e) => {
            error!("Generated SQL failed: {}", e);
            attempt.fail(&e).await;
            Err(e.into())
        }
    }
}

// Schema

pub async fn get_schema(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<SchemaResponse>, ApiError> {
    let schema = introspect(&state.multi_db_manager, &ctx.database)
        .await
        .inspect_err(|e| error!("Schema introspection failed: {}", e))?;

    let message = schema
        .is_empty()
        .then(|| "No tables found in the database".to_string());

    Ok(Json(SchemaResponse {
        status: "success",
        schema: WireSchema::from(&schema),
        message,
    }))
}

pub async fn get_diagram(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<DiagramResponse>, ApiError> {
    let schema = introspect(&state.multi_db_manager, &ctx.database)
        .await
        .inspect_err(|e| error!("Schema introspection failed: {}", e))?;

    let diagram = visual::render_schema(&schema);
    let mermaid = diagram.to_mermaid();
    Ok(Json(DiagramResponse { diagram, mermaid }))
}

// History

pub async fn list_history(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<HistoryPage>, ApiError> {
    let Query(params) = params?;
    let query = HistoryQuery::from_pairs(&params)?;
    let page = state
        .history
        .list(&ctx.user_id, query.pagination, &query.filter)
        .await
        .inspect_err(|e| error!("Failed to fetch history for {}: {}", ctx.user_id, e))?;
    Ok(Json(page))
}

pub async fn clear_history(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .history
        .clear(&ctx.user_id)
        .await
        .inspect_err(|e| error!("Failed to clear history for {}: {}", ctx.user_id, e))?;
    Ok(Json(json!({
        "message": "History cleared successfully",
        "deleted": deleted,
    })))
}

// Database management

pub async fn list_databases(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<DatabaseListResponse>, ApiError> {
    let databases = state
        .registry
        .list(&ctx.user_id)
        .inspect_err(|e| error!("Failed to list databases for {}: {}", ctx.user_id, e))?;
    Ok(Json(DatabaseListResponse { databases }))
}

/// Creates an empty named database for the caller.
pub async fn add_database(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<AddDatabaseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DatabaseInfo>), ApiError> {
    let Json(payload) = payload?;
    if state.config.database.read_only {
        return Err(ApiError::forbidden("databases are opened read-only"));
    }

    let database = state.registry.prepare_new(&ctx.user_id, &payload.name)?;
    let connections = Arc::clone(&state.multi_db_manager);
    let target = database.clone();
    // Opening the file creates it
    tokio::task::spawn_blocking(move || connect(&connections, &target).map(drop))
        .await
        .map_err(|e| {
            error!("Task join error: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("database task failed: {}", e),
            )
        })??;

    info!("Created database {} for {}", database.id, ctx.user_id);
    let size_bytes = std::fs::metadata(&database.path).map(|m| m.len()).unwrap_or(0);
    Ok((
        StatusCode::CREATED,
        Json(DatabaseInfo {
            default: database.id == ctx.user_id.as_str(),
            id: database.id,
            size_bytes,
        }),
    ))
}

pub async fn delete_database(
    state: State<Arc<AppState>>,
    ctx: RequestContext,
    params: Result<Query<DatabaseNameParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(params) = params?;
    let database = state.registry.resolve(&ctx.user_id, Some(&params.name))?;

    if !state.multi_db_manager.detach(&database) {
        warn!("Database {} of {} is busy; not deleting", database.id, ctx.user_id);
        return Err(RegistryError::InUse(database.id).into());
    }
    state
        .registry
        .remove(&database)
        .inspect_err(|e| error!("Failed to delete database {}: {}", database.id, e))?;

    Ok(Json(json!({
        "message": "Database deleted successfully",
        "id": database.id,
    })))
}

// System status

pub async fn system_status(state: State<Arc<AppState>>) -> Json<SystemStatus> {
    let uptime = chrono::Utc::now() - state.startup_time;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
        assisted_backend: state.config.assisted_llm.is_some(),
    })
}
