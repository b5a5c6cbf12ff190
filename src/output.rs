//! Output formatting for command results.
//!
//! Supports two output formats: table (human-readable) and JSON.

use clap::ValueEnum;
use futures::TryStreamExt;
use serde::Serialize;

use crate::db::Value;
use crate::session::SqlResult;

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for types that can be formatted for output
pub trait Outputable: Serialize {
    /// Format as a human-readable table
    fn to_table(&self) -> String;

    /// Format according to the specified output format
    fn format(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => self.to_table(),
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
        }
    }
}

/// One collected result: either rows under named columns or a row count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_updated: Option<u64>,
}

impl ResultSet {
    /// Drain `result` into memory.
    pub async fn collect(result: SqlResult) -> crate::Result<Self> {
        let Some(metadata) = result.metadata() else {
            let rows_updated = result.rows_updated().await?;
            return Ok(Self {
                rows_updated: Some(rows_updated),
                ..Self::default()
            });
        };
        let columns = metadata.column_names().map(str::to_string).collect();
        let rows = result
            .map(|row, _| Ok(row.values().to_vec()))
            .try_collect()
            .await?;
        Ok(Self {
            columns,
            rows,
            rows_updated: None,
        })
    }

    pub fn is_projection(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Render as an aligned text table, or a count line for updates.
    pub fn render(&self) -> String {
        if !self.is_projection() {
            let count = self.rows_updated.unwrap_or(0);
            return format!("{} updated", plural(count as usize, "row"));
        }

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(Value::to_string).collect())
            .collect();
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |values: &[String]| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(value, width)| format!("{:<width$}", value, width = width))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![line(&self.columns)];
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &cells {
            lines.push(line(row));
        }
        lines.push(format!("({})", plural(self.rows.len(), "row")));
        lines.join("\n")
    }
}

/// `1 row`, `2 rows`.
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Render several results separated by blank lines.
pub fn render_all(results: &[ResultSet]) -> String {
    if results.is_empty() {
        return "No results.".to_string();
    }
    results
        .iter()
        .map(ResultSet::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}
