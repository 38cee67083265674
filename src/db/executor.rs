use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::db::multi_db_pool::{LeasedConnection, MultiDbConnectionManager};
use crate::db::registry::DatabaseRef;

/// Tabular outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    SyntaxError(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("database connection lost: {0}")]
    ConnectionLost(String),
    #[error("query did not finish within {0:?}")]
    Timeout(Duration),
    /// The statement parsed but failed while running (constraints, casts, ...)
    #[error("{0}")]
    Statement(String),
}

impl ExecutionError {
    /// Classifies a DuckDB error by the error class it reports.
    fn from_duckdb(err: duckdb::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();

        if lower.contains("parser error")
            || lower.contains("syntax error")
            || lower.contains("catalog error")
            || lower.contains("binder error")
        {
            ExecutionError::SyntaxError(message)
        } else if lower.contains("permission error")
            || lower.contains("read-only")
            || lower.contains("read only")
        {
            ExecutionError::PermissionDenied(message)
        } else if lower.contains("io error") || lower.contains("connection error") {
            ExecutionError::ConnectionLost(message)
        } else {
            ExecutionError::Statement(message)
        }
    }
}

/// Runs SQL against a user database. Read and write statements are both
/// passed through untouched.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, connection: &DatabaseRef)
        -> Result<ResultSet, ExecutionError>;
}

pub struct DuckDbExecutor {
    connections: Arc<MultiDbConnectionManager>,
    timeout: Duration,
}

impl DuckDbExecutor {
    pub fn new(connections: Arc<MultiDbConnectionManager>, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
        }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbExecutor {
    async fn execute(
        &self,
        sql: &str,
        connection: &DatabaseRef,
    ) -> Result<ResultSet, ExecutionError> {
        info!("Executing SQL against database {}", connection.id);
        debug!("SQL: {}", sql);

        let connections = Arc::clone(&self.connections);
        let database = connection.clone();
        let sql = sql.to_string();

        // DuckDB is synchronous; keep it off the async workers
        let task =
            tokio::task::spawn_blocking(move || run_statements(&connections, &database, &sql));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!("Task join error: {}", join_err);
                Err(ExecutionError::ConnectionLost(format!(
                    "database task failed: {}",
                    join_err
                )))
            }
            Err(_) => {
                error!("Query on {} timed out after {:?}", connection.id, self.timeout);
                Err(ExecutionError::Timeout(self.timeout))
            }
        }
    }
}

/// Opens a connection, reporting any failure as a lost connection.
pub(crate) fn connect(
    connections: &MultiDbConnectionManager,
    database: &DatabaseRef,
) -> Result<LeasedConnection, ExecutionError> {
    connections.connect(database).map_err(|e| {
        error!("Failed to open database at {}: {}", database.path.display(), e);
        ExecutionError::ConnectionLost(e.to_string())
    })
}

fn run_statements(
    connections: &MultiDbConnectionManager,
    database: &DatabaseRef,
    sql: &str,
) -> Result<ResultSet, ExecutionError> {
    let start_time = Instant::now();
    let conn = connect(connections, database)?;

    let statements = split_statements(sql);
    let Some((last, leading)) = statements.split_last() else {
        return Err(ExecutionError::SyntaxError("empty query".to_string()));
    };

    for statement in leading {
        conn.execute_batch(statement)
            .map_err(ExecutionError::from_duckdb)?;
    }

    let mut stmt = conn.prepare(last).map_err(ExecutionError::from_duckdb)?;
    let arrow_batch = stmt.query_arrow([]).map_err(ExecutionError::from_duckdb)?;

    let schema = arrow_batch.get_schema();
    let columns = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();

    let record_batches: Vec<RecordBatch> = arrow_batch.collect();
    let rows = batches_to_rows(&columns, &record_batches)?;
    let row_count = rows.len();
    let execution_time_ms = start_time.elapsed().as_millis() as u64;

    info!(
        "Query executed successfully. Row count: {}, Execution time: {}ms",
        row_count, execution_time_ms
    );

    Ok(ResultSet {
        columns,
        rows,
        row_count,
        execution_time_ms,
    })
}

/// Converts record batches into JSON rows ordered like `columns`.
fn batches_to_rows(
    columns: &[String],
    batches: &[RecordBatch],
) -> Result<Vec<Vec<serde_json::Value>>, ExecutionError> {
    let batch_refs: Vec<&RecordBatch> = batches.iter().filter(|b| b.num_rows() > 0).collect();
    if batch_refs.is_empty() {
        return Ok(Vec::new());
    }

    let serialize_error =
        |e: &dyn std::fmt::Display| ExecutionError::Statement(format!("failed to serialize result: {}", e));

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    writer.write_batches(&batch_refs).map_err(|e| serialize_error(&e))?;
    writer.finish().map_err(|e| serialize_error(&e))?;
    let buffer = writer.into_inner();

    let objects: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(&buffer).map_err(|e| serialize_error(&e))?;

    Ok(objects
        .into_iter()
        .map(|mut object| {
            columns
                .iter()
                .map(|c| object.remove(c).unwrap_or(serde_json::Value::Null))
                .collect()
        })
        .collect())
}

/// Splits on `;` outside quotes and drops `--` comments and empty statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    // Skip to end of line
                    for next in chars.by_ref() {
                        if next == '\n' {
                            current.push('\n');
                            break;
                        }
                    }
                }
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }

    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    statements
}
