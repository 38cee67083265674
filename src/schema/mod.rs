pub mod wire;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Canonical in-memory representation of a user database schema.
///
/// Built fresh per request and never mutated afterwards. Table order only
/// matters for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_foreign_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table '{table}' has a foreign key on '{column}' referencing unknown {target}")]
    DanglingForeignKey {
        table: String,
        column: String,
        target: String,
    },
    #[error("table '{0}' is defined more than once")]
    DuplicateTableName(String),
    #[error("table '{table}' defines column '{column}' more than once")]
    DuplicateColumnName { table: String, column: String },
    #[error("schema contains a table or column with an empty name")]
    EmptyName,
    #[error("column '{table}.{column}' is marked as a foreign key but has no foreign key entry")]
    UnmatchedForeignKeyColumn { table: String, column: String },
    #[error("table '{table}' refers to unknown column '{column}'")]
    UnknownColumn { table: String, column: String },
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Foreign keys in the order their source columns are declared.
    pub fn foreign_keys_in_column_order(&self) -> Vec<&ForeignKey> {
        let mut keys: Vec<&ForeignKey> = self.foreign_keys.iter().collect();
        keys.sort_by_key(|fk| {
            self.columns
                .iter()
                .position(|c| c.name == fk.from_column)
                .unwrap_or(usize::MAX)
        });
        keys
    }
}

impl SchemaModel {
    pub fn new(tables: Vec<Table>) -> Result<Self, SchemaError> {
        let schema = Self { tables };
        schema.validate()?;
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Checks every invariant across the whole schema.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTableName(table.name.clone()));
            }
            self.validate_table(table)?;
        }
        Ok(())
    }

    /// Checks the invariants local to one table, resolving foreign-key
    /// targets against the rest of this schema. Duplicate table names are a
    /// schema-level concern and are not detected here.
    pub fn validate_table(&self, table: &Table) -> Result<(), SchemaError> {
        if table.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }

        let mut columns = HashSet::new();
        for column in &table.columns {
            if column.name.trim().is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if !columns.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumnName {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        if let Some(pk) = &table.primary_key {
            if !columns.contains(pk.as_str()) {
                return Err(SchemaError::UnknownColumn {
                    table: table.name.clone(),
                    column: pk.clone(),
                });
            }
        }

        for fk in &table.foreign_keys {
            if !columns.contains(fk.from_column.as_str()) {
                return Err(SchemaError::UnknownColumn {
                    table: table.name.clone(),
                    column: fk.from_column.clone(),
                });
            }
            let target_resolves = self
                .table(&fk.to_table)
                .is_some_and(|target| target.column(&fk.to_column).is_some());
            if !target_resolves {
                return Err(SchemaError::DanglingForeignKey {
                    table: table.name.clone(),
                    column: fk.from_column.clone(),
                    target: format!("{}.{}", fk.to_table, fk.to_column),
                });
            }
        }

        for column in table.columns.iter().filter(|c| c.is_foreign_key) {
            if !table.foreign_keys.iter().any(|fk| fk.from_column == column.name) {
                return Err(SchemaError::UnmatchedForeignKeyColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_foreign_key: false,
        }
    }

    pub(crate) fn shop_schema() -> SchemaModel {
        let users = Table {
            name: "users".to_string(),
            columns: vec![column("id", "INTEGER"), column("email", "VARCHAR")],
            primary_key: Some("id".to_string()),
            foreign_keys: vec![],
        };
        let orders = Table {
            name: "orders".to_string(),
            columns: vec![
                column("id", "INTEGER"),
                Column {
                    name: "user_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    is_foreign_key: true,
                },
                column("total", "DOUBLE"),
            ],
            primary_key: Some("id".to_string()),
            foreign_keys: vec![ForeignKey {
                from_column: "user_id".to_string(),
                to_table: "users".to_string(),
                to_column: "id".to_string(),
            }],
        };
        SchemaModel::new(vec![users, orders]).unwrap()
    }

    #[test]
    fn accepts_consistent_schema() {
        let schema = shop_schema();
        assert_eq!(schema.tables.len(), 2);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_table() {
        let mut tables = shop_schema().tables;
        tables.push(tables[0].clone());
        assert_eq!(
            SchemaModel::new(tables),
            Err(SchemaError::DuplicateTableName("users".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_column() {
        let mut tables = shop_schema().tables;
        tables[0].columns.push(column("email", "TEXT"));
        assert!(matches!(
            SchemaModel::new(tables),
            Err(SchemaError::DuplicateColumnName { column, .. }) if column == "email"
        ));
    }

    #[test]
    fn rejects_foreign_key_to_missing_table() {
        let mut tables = shop_schema().tables;
        tables.remove(0);
        assert!(matches!(
            SchemaModel::new(tables),
            Err(SchemaError::DanglingForeignKey { target, .. }) if target == "users.id"
        ));
    }

    #[test]
    fn rejects_flagged_column_without_entry() {
        let mut tables = shop_schema().tables;
        tables[1].foreign_keys.clear();
        assert!(matches!(
            SchemaModel::new(tables),
            Err(SchemaError::UnmatchedForeignKeyColumn { column, .. }) if column == "user_id"
        ));
    }

    #[test]
    fn rejects_unknown_primary_key() {
        let mut tables = shop_schema().tables;
        tables[0].primary_key = Some("uuid".to_string());
        assert!(matches!(
            SchemaModel::new(tables),
            Err(SchemaError::UnknownColumn { column, .. }) if column == "uuid"
        ));
    }

    #[test]
    fn empty_schema_is_valid() {
        assert!(SchemaModel::new(vec![]).unwrap().is_empty());
    }
}
