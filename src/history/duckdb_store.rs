use async_trait::async_trait;
use chrono::DateTime;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use r2d2::Pool;
use std::path::Path;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::filter::{SortField, SortKey};
use super::{HistoryEntry, HistoryError, HistoryFilter, HistoryStore, Pagination, QueryKind};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::registry::UserId;

const CREATE_SQL: &str = "
    CREATE SEQUENCE IF NOT EXISTS query_history_seq;
    CREATE TABLE IF NOT EXISTS query_history (
        seq BIGINT NOT NULL DEFAULT nextval('query_history_seq'),
        id VARCHAR NOT NULL,
        user_id VARCHAR NOT NULL,
        database_ref VARCHAR NOT NULL,
        query_type VARCHAR NOT NULL,
        query VARCHAR NOT NULL,
        result VARCHAR NOT NULL,
        success BOOLEAN NOT NULL,
        ts_micros BIGINT NOT NULL
    );";

const SELECT_COLUMNS: &str =
    "id, user_id, database_ref, query_type, query, result, success, ts_micros";

/// History kept in its own DuckDB file, shared through an r2d2 pool.
pub struct DuckDbHistoryStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbHistoryStore {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HistoryError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        Self::with_manager(DuckDBConnectionManager::open(path)?, pool_size)
    }

    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::with_manager(DuckDBConnectionManager::in_memory()?, 1)
    }

    fn with_manager(manager: DuckDBConnectionManager, pool_size: usize) -> Result<Self, HistoryError> {
        let pool = Pool::builder()
            .max_size(pool_size.max(1) as u32)
            .build(manager)?;
        pool.get()?.execute_batch(CREATE_SQL)?;
        info!("History store ready");
        Ok(Self { pool })
    }

    /// Runs `f` on a pooled connection off the async workers.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| {
            error!("History task join error: {}", e);
            HistoryError::Unavailable(format!("history task failed: {}", e))
        })?
    }
}

/// WHERE clause and its positional parameters for one user's filtered history.
fn where_clause(user: &UserId, filter: &HistoryFilter) -> (String, Vec<Value>) {
    let mut conditions = vec!["user_id = ?".to_string()];
    let mut values = vec![Value::Text(user.to_string())];

    if let Some(db) = &filter.database_ref {
        conditions.push("database_ref = ?".to_string());
        values.push(Value::Text(db.clone()));
    }
    if let Some(kinds) = &filter.query_kinds {
        if kinds.is_empty() {
            conditions.push("FALSE".to_string());
        } else {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            conditions.push(format!("query_type IN ({})", placeholders));
            values.extend(kinds.iter().map(|k| Value::Text(k.as_str().to_string())));
        }
    }
    if let Some(succeeded) = filter.succeeded {
        conditions.push("success = ?".to_string());
        values.push(Value::Boolean(succeeded));
    }
    if let Some(start) = filter.start {
        conditions.push("ts_micros >= ?".to_string());
        values.push(Value::BigInt(start.timestamp_micros()));
    }
    if let Some(end) = filter.end {
        conditions.push("ts_micros <= ?".to_string());
        values.push(Value::BigInt(end.timestamp_micros()));
    }
    if let Some(search) = &filter.search {
        conditions.push("contains(lower(query), lower(?))".to_string());
        values.push(Value::Text(search.clone()));
    }

    (conditions.join(" AND "), values)
}

fn order_clause(keys: &[SortKey]) -> String {
    let mut parts: Vec<String> = keys
        .iter()
        .map(|key| {
            let column = match key.field {
                SortField::Timestamp => "ts_micros",
                SortField::QueryKind => "query_type",
                SortField::Success => "success",
            };
            format!("{} {}", column, key.direction.as_sql())
        })
        .collect();
    parts.push("seq DESC".to_string());
    parts.join(", ")
}

type RawRow = (String, String, String, String, String, String, bool, i64);

fn entry_from_row(row: RawRow) -> Result<HistoryEntry, HistoryError> {
    let (id, user_id, database_ref, query_type, query, result, success, ts_micros) = row;

    let id = Uuid::parse_str(&id).map_err(|e| HistoryError::Corrupt(format!("id '{}': {}", id, e)))?;
    let user_id = UserId::parse(&user_id)
        .ok_or_else(|| HistoryError::Corrupt(format!("user id '{}'", user_id)))?;
    let query_kind = QueryKind::parse(&query_type)
        .ok_or_else(|| HistoryError::Corrupt(format!("query type '{}'", query_type)))?;
    let result = serde_json::from_str(&result)
        .map_err(|e| HistoryError::Corrupt(format!("result of {}: {}", id, e)))?;
    let timestamp = DateTime::from_timestamp_micros(ts_micros)
        .ok_or_else(|| HistoryError::Corrupt(format!("timestamp {}", ts_micros)))?;

    Ok(HistoryEntry {
        id,
        user_id,
        database_ref,
        query_kind,
        query_text: query,
        result,
        succeeded: success,
        timestamp,
    })
}

#[async_trait]
impl HistoryStore for DuckDbHistoryStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let entry = entry.clone();
        let result = serde_json::to_string(&entry.result)
            .map_err(|e| HistoryError::Corrupt(format!("unserializable result: {}", e)))?;

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO query_history
                    (id, user_id, database_ref, query_type, query, result, success, ts_micros)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.to_string(),
                    entry.user_id.as_str(),
                    entry.database_ref,
                    entry.query_kind.as_str(),
                    entry.query_text,
                    result,
                    entry.succeeded,
                    entry.timestamp.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        user: &UserId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<(Vec<HistoryEntry>, u64), HistoryError> {
        let (conditions, values) = where_clause(user, filter);
        let order = order_clause(&filter.sort_keys());

        self.with_connection(move |conn| {
            let count_sql = format!("SELECT count(*) FROM query_history WHERE {}", conditions);
            let total: i64 = conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

            let page_sql = format!(
                "SELECT {} FROM query_history WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                SELECT_COLUMNS,
                conditions,
                order,
                pagination.per_page,
                pagination.offset()
            );
            debug!("History query: {}", page_sql);

            let mut stmt = conn.prepare(&page_sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| -> duckdb::Result<RawRow> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(entry_from_row(row?)?);
            }

            Ok((entries, total.max(0) as u64))
        })
        .await
    }

    async fn clear(&self, user: &UserId) -> Result<u64, HistoryError> {
        let user = user.to_string();
        self.with_connection(move |conn| {
            let deleted = conn.execute("DELETE FROM query_history WHERE user_id = ?", params![user])?;
            Ok(deleted as u64)
        })
        .await
    }
}
