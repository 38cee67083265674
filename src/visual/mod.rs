use serde::Serialize;
use std::fmt::Write;

use crate::db::executor::ResultSet;
use crate::schema::SchemaModel;

/// Tables and foreign-key edges, ready for an external diagram renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramSpec {
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramNode {
    pub table: String,
    pub columns: Vec<DiagramColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramColumn {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub foreign_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
}

/// Query result shaped for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularSpec {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// `None` when there are fewer than two rows to plot
    pub chart: Option<ChartKind>,
    pub title: String,
}

pub fn render_schema(schema: &SchemaModel) -> DiagramSpec {
    let nodes = schema
        .tables
        .iter()
        .map(|table| DiagramNode {
            table: table.name.clone(),
            columns: table
                .columns
                .iter()
                .map(|c| DiagramColumn {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                    primary_key: table.primary_key.as_deref() == Some(c.name.as_str()),
                    foreign_key: c.is_foreign_key,
                })
                .collect(),
        })
        .collect();

    let edges = schema
        .tables
        .iter()
        .flat_map(|table| {
            table
                .foreign_keys_in_column_order()
                .into_iter()
                .map(move |fk| DiagramEdge {
                    from_table: table.name.clone(),
                    from_column: fk.from_column.clone(),
                    to_table: fk.to_table.clone(),
                    to_column: fk.to_column.clone(),
                })
        })
        .collect();

    DiagramSpec { nodes, edges }
}

impl DiagramSpec {
    /// Mermaid `erDiagram` source. Identifiers and types are reduced to
    /// characters Mermaid accepts.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("erDiagram\n");

        for node in &self.nodes {
            let _ = writeln!(out, "    {} {{", mermaid_word(&node.table));
            for column in &node.columns {
                let data_type = if column.data_type.trim().is_empty() {
                    "unknown".to_string()
                } else {
                    mermaid_word(&column.data_type)
                };
                let key = match (column.primary_key, column.foreign_key) {
                    (true, true) => " PK, FK",
                    (true, false) => " PK",
                    (false, true) => " FK",
                    (false, false) => "",
                };
                let _ = writeln!(out, "        {} {}{}", data_type, mermaid_word(&column.name), key);
            }
            out.push_str("    }\n");
        }

        for edge in &self.edges {
            let _ = writeln!(
                out,
                "    {} ||--o{{ {} : \"{}\"",
                mermaid_word(&edge.to_table),
                mermaid_word(&edge.from_table),
                edge.from_column.replace('"', "'")
            );
        }

        out
    }
}

fn mermaid_word(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn render_result(sql: &str, result: &ResultSet) -> TabularSpec {
    TabularSpec {
        columns: result.columns.clone(),
        rows: result.rows.clone(),
        row_count: result.row_count,
        chart: suggest_chart(sql, &result.rows),
        title: chart_title(sql),
    }
}

/// Picks a chart from keywords in the SQL, then from the shape of the first row.
fn suggest_chart(sql: &str, rows: &[Vec<serde_json::Value>]) -> Option<ChartKind> {
    if rows.len() < 2 {
        return None;
    }

    let sql = sql.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| sql.contains(w));

    if mentions(&["percent", "ratio"]) {
        return Some(ChartKind::Pie);
    }
    if mentions(&["count", "sum", "group by"]) {
        return Some(ChartKind::Bar);
    }
    if mentions(&["date", "time", "strftime", "month"]) {
        return Some(ChartKind::Line);
    }

    let numeric_columns = rows[0].iter().filter(|v| is_numeric(v)).count();
    if numeric_columns >= 2 {
        Some(ChartKind::Scatter)
    } else {
        Some(ChartKind::Bar)
    }
}

fn is_numeric(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Number(_) => true,
        serde_json::Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

/// "Data from <table>" for the first table after FROM.
fn chart_title(sql: &str) -> String {
    let mut words = sql.split_whitespace();
    let has_select = sql.to_lowercase().contains("select");

    if has_select {
        while let Some(word) = words.next() {
            if word.eq_ignore_ascii_case("from") {
                let table = words
                    .next()
                    .map(|t| t.trim_end_matches([';', ',', ')']))
                    .filter(|t| !t.is_empty());
                if let Some(table) = table {
                    return format!("Data from {}", table);
                }
                break;
            }
        }
    }

    "SQL Chart Visualization".to_string()
}
