use serde::{Deserialize, Serialize};

use super::{Column, ForeignKey, SchemaModel, Table};

/// Schema shape sent by clients alongside translate requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireSchema {
    #[serde(default)]
    pub tables: Vec<WireTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTable {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<WireColumn>,
    #[serde(default)]
    pub primary_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireColumn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub referenced_table: Option<String>,
    #[serde(default)]
    pub referenced_column: Option<String>,
}

impl WireSchema {
    /// Converts into the canonical model without validating it. Tables that
    /// break an invariant are left in place so that prompt construction can
    /// skip them one by one.
    pub fn into_model(self) -> SchemaModel {
        SchemaModel {
            tables: self.tables.into_iter().map(WireTable::into_table).collect(),
        }
    }
}

impl WireTable {
    fn into_table(self) -> Table {
        let foreign_keys = self
            .columns
            .iter()
            .filter(|c| c.is_foreign_key)
            .filter_map(|c| {
                let to_table = c.referenced_table.as_deref().filter(|t| !t.is_empty())?;
                let to_column = c.referenced_column.as_deref().filter(|t| !t.is_empty())?;
                Some(ForeignKey {
                    from_column: c.name.clone(),
                    to_table: to_table.to_string(),
                    to_column: to_column.to_string(),
                })
            })
            .collect();

        Table {
            name: self.name,
            columns: self
                .columns
                .into_iter()
                .map(|c| Column {
                    name: c.name,
                    data_type: c.data_type,
                    is_foreign_key: c.is_foreign_key,
                })
                .collect(),
            primary_key: self.primary_key.filter(|pk| !pk.is_empty()),
            foreign_keys,
        }
    }
}

impl From<&SchemaModel> for WireSchema {
    fn from(schema: &SchemaModel) -> Self {
        let tables = schema
            .tables
            .iter()
            .map(|table| WireTable {
                name: table.name.clone(),
                primary_key: table.primary_key.clone(),
                columns: table
                    .columns
                    .iter()
                    .map(|column| {
                        let fk = table
                            .foreign_keys
                            .iter()
                            .find(|fk| fk.from_column == column.name);
                        WireColumn {
                            name: column.name.clone(),
                            data_type: column.data_type.clone(),
                            is_foreign_key: column.is_foreign_key,
                            referenced_table: fk.map(|fk| fk.to_table.clone()),
                            referenced_column: fk.map(|fk| fk.to_column.clone()),
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { tables }
    }
}
