use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::db::executor::{connect, ExecutionError};
use crate::db::multi_db_pool::MultiDbConnectionManager;
use crate::db::registry::DatabaseRef;
use crate::schema::{Column, ForeignKey, SchemaError, SchemaModel, Table};

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error(transparent)]
    Database(#[from] ExecutionError),
    #[error("database schema is inconsistent: {0}")]
    Schema(#[from] SchemaError),
}

static PRIMARY_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)PRIMARY\s+KEY\s*\(([^)]*)\)").expect("valid primary key pattern")
});

static FOREIGN_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+"?([^\s"(]+)"?\s*\(([^)]*)\)"#)
        .expect("valid foreign key pattern")
});

const COLUMNS_SQL: &str = "
    SELECT c.table_name, c.column_name, c.data_type
    FROM information_schema.columns c
    JOIN information_schema.tables t
      ON t.table_schema = c.table_schema AND t.table_name = c.table_name
    WHERE c.table_schema = 'main' AND t.table_type = 'BASE TABLE'
    ORDER BY c.table_name, c.ordinal_position";

const CONSTRAINTS_SQL: &str = "
    SELECT table_name, constraint_text
    FROM duckdb_constraints()
    WHERE schema_name = 'main'
      AND database_name = current_database()
      AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY')";

/// Reads the schema of a user database fresh and validates it.
pub async fn introspect(
    connections: &Arc<MultiDbConnectionManager>,
    database: &DatabaseRef,
) -> Result<SchemaModel, IntrospectionError> {
    info!("Introspecting schema of database {}", database.id);
    let connections = Arc::clone(connections);
    let database = database.clone();

    let tables = tokio::task::spawn_blocking(move || read_tables(&connections, &database))
        .await
        .map_err(|e| {
            error!("Task join error: {}", e);
            ExecutionError::ConnectionLost(format!("introspection task failed: {}", e))
        })??;

    Ok(SchemaModel::new(tables)?)
}

fn read_tables(
    connections: &MultiDbConnectionManager,
    database: &DatabaseRef,
) -> Result<Vec<Table>, ExecutionError> {
    let db_error = |e: duckdb::Error| ExecutionError::ConnectionLost(e.to_string());
    let conn = connect(connections, database)?;

    let mut tables: Vec<Table> = Vec::new();
    let mut stmt = conn.prepare(COLUMNS_SQL).map_err(db_error)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(db_error)?;

    for row in rows {
        let (table_name, column_name, data_type) = row.map_err(db_error)?;
        if tables.last().map(|t| t.name.as_str()) != Some(table_name.as_str()) {
            tables.push(Table {
                name: table_name,
                columns: Vec::new(),
                primary_key: None,
                foreign_keys: Vec::new(),
            });
        }
        if let Some(table) = tables.last_mut() {
            table.columns.push(Column {
                name: column_name,
                data_type,
                is_foreign_key: false,
            });
        }
    }

    let mut stmt = conn.prepare(CONSTRAINTS_SQL).map_err(db_error)?;
    let constraints = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(db_error)?;

    for constraint in constraints {
        let (table_name, text) = constraint.map_err(db_error)?;
        if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
            apply_constraint(table, &text);
        }
    }

    debug!("Introspected {} tables", tables.len());
    Ok(tables)
}

fn identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Applies one constraint definition to `table`. Foreign keys whose source
/// columns are not part of `table` are ignored; DuckDB can report them on the
/// referenced side too.
fn apply_constraint(table: &mut Table, text: &str) {
    if let Some(caps) = FOREIGN_KEY_RE.captures(text) {
        let from = identifiers(&caps[1]);
        let to_table = caps[2].trim_matches('"').to_string();
        let to = identifiers(&caps[3]);

        for (from_column, to_column) in from.into_iter().zip(to) {
            let Some(column) = table.columns.iter_mut().find(|c| c.name == from_column) else {
                continue;
            };
            column.is_foreign_key = true;
            let fk = ForeignKey {
                from_column,
                to_table: to_table.clone(),
                to_column,
            };
            if !table.foreign_keys.contains(&fk) {
                table.foreign_keys.push(fk);
            }
        }
    } else if let Some(caps) = PRIMARY_KEY_RE.captures(text) {
        let columns = identifiers(&caps[1]);
        if columns.len() > 1 {
            debug!("Composite primary key on {}; keeping the first column", table.name);
        }
        table.primary_key = columns.into_iter().next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::{DuckDbExecutor, QueryExecutor};
    use std::time::Duration;

    fn bare_table(columns: &[&str]) -> Table {
        Table {
            name: "orders".to_string(),
            columns: columns
                .iter()
                .map(|c| Column {
                    name: c.to_string(),
                    data_type: "INTEGER".to_string(),
                    is_foreign_key: false,
                })
                .collect(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }

    #[test]
    fn parses_constraint_text() {
        let mut table = bare_table(&["id", "user_id"]);
        apply_constraint(&mut table, "PRIMARY KEY(id)");
        apply_constraint(&mut table, "FOREIGN KEY (user_id) REFERENCES users(id)");
        apply_constraint(&mut table, "FOREIGN KEY (owner_id) REFERENCES users(id)");

        assert_eq!(table.primary_key.as_deref(), Some("id"));
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].to_table, "users");
        assert!(table.columns[1].is_foreign_key);
    }

    #[tokio::test]
    async fn reads_columns_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseRef {
            id: "shop".to_string(),
            path: dir.path().join("shop.duckdb"),
        };
        let connections = Arc::new(MultiDbConnectionManager::new(false, 8));
        DuckDbExecutor::new(Arc::clone(&connections), Duration::from_secs(30))
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR);
                 CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), total DOUBLE);",
                &db,
            )
            .await
            .unwrap();

        let schema = introspect(&connections, &db).await.unwrap();
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "users"]);

        let orders = schema.table("orders").unwrap();
        assert_eq!(orders.primary_key.as_deref(), Some("id"));
        assert_eq!(orders.columns.len(), 3);
        assert_eq!(
            orders.foreign_keys,
            vec![ForeignKey {
                from_column: "user_id".to_string(),
                to_table: "users".to_string(),
                to_column: "id".to_string(),
            }]
        );
        assert!(schema.table("users").unwrap().foreign_keys.is_empty());
    }

    #[tokio::test]
    async fn empty_database_has_no_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseRef {
            id: "empty".to_string(),
            path: dir.path().join("empty.duckdb"),
        };
        let connections = Arc::new(MultiDbConnectionManager::new(false, 8));
        assert!(introspect(&connections, &db).await.unwrap().is_empty());
    }
}
