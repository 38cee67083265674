use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::schema::{SchemaModel, Table};

/// How much of the schema is embedded in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Question only
    #[default]
    Simple,
    /// Full DDL with key constraints
    Complex,
    /// One "Table X has columns ..." sentence per table
    ModelAssisted,
}

/// Builds the prompt text for `query`. Pure and deterministic.
///
/// Schema-aware strategies fall back to the simple template when there is no
/// schema or when none of its tables can be rendered.
pub fn build(query: &str, schema: Option<&SchemaModel>, strategy: Strategy) -> String {
    let fragment = match (strategy, schema) {
        (Strategy::Simple, _) | (_, None) => None,
        (Strategy::Complex, Some(schema)) => ddl_fragment(schema),
        (Strategy::ModelAssisted, Some(schema)) => sentence_fragment(schema),
    };

    match (strategy, fragment) {
        (Strategy::Complex, Some(schema_text)) => {
            format!("Schema: {}. Query for: {}", schema_text, query)
        }
        (Strategy::ModelAssisted, Some(schema_text)) => {
            // Each sentence already ends with a period
            format!("Schema: {} Translate English to SQL: {}", schema_text, query)
        }
        _ => simple(query),
    }
}

fn simple(query: &str) -> String {
    format!("Translate English to SQL: {}", query)
}

/// Tables that pass validation, in declaration order. Malformed tables are
/// logged and skipped so the rest of the schema still reaches the prompt.
fn renderable_tables(schema: &SchemaModel) -> Vec<&Table> {
    let mut seen = HashSet::new();
    schema
        .tables
        .iter()
        .filter(|table| {
            if !seen.insert(table.name.as_str()) {
                warn!("Skipping duplicate table '{}' in prompt schema", table.name);
                return false;
            }
            match schema.validate_table(table) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Skipping malformed table '{}' in prompt schema: {}", table.name, e);
                    false
                }
            }
        })
        .collect()
}

fn ddl_fragment(schema: &SchemaModel) -> Option<String> {
    let statements: Vec<String> = renderable_tables(schema)
        .into_iter()
        .map(create_table_statement)
        .collect();

    if statements.is_empty() {
        None
    } else {
        Some(statements.join(" "))
    }
}

fn create_table_statement(table: &Table) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            if c.data_type.trim().is_empty() {
                c.name.clone()
            } else {
                format!("{} {}", c.name, c.data_type)
            }
        })
        .collect();

    if let Some(pk) = &table.primary_key {
        parts.push(format!("PRIMARY KEY ({})", pk));
    }
    for fk in table.foreign_keys_in_column_order() {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            fk.from_column, fk.to_table, fk.to_column
        ));
    }

    format!("CREATE TABLE {} ({});", table.name, parts.join(", "))
}

fn sentence_fragment(schema: &SchemaModel) -> Option<String> {
    let sentences: Vec<String> = renderable_tables(schema)
        .into_iter()
        .map(|table| {
            if table.columns.is_empty() {
                return format!("Table {} has no columns.", table.name);
            }
            let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
            format!("Table {} has columns {}.", table.name, columns.join(", "))
        })
        .collect();

    if sentences.is_empty() {
        None
    } else {
        Some(sentences.join(" "))
    }
}
