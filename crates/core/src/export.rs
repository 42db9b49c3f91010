use chrono::{Local, NaiveDateTime};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{scalar_text, Scalar};

const UTF8_BOM: char = '\u{feff}';
const FILE_NAME_PREFIX: &str = "query_export";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }
}

/// Encoded export ready to be handed to whatever saves or downloads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub content: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("there are no query results to export")]
    NothingToExport,
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// `query_export_<YYYYMMDD>_<hhmmss>.<extension>` using the local wall clock.
#[must_use]
pub fn generate_file_name(extension: &str) -> String {
    file_name_at(Local::now().naive_local(), extension)
}

#[must_use]
pub fn file_name_at(timestamp: NaiveDateTime, extension: &str) -> String {
    format!(
        "{FILE_NAME_PREFIX}_{}.{extension}",
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

pub fn export(
    format: ExportFormat,
    columns: &[String],
    rows: &[Vec<Scalar>],
) -> Result<ExportArtifact, ExportError> {
    match format {
        ExportFormat::Csv => Ok(export_to_csv(columns, rows)),
        ExportFormat::Json => export_to_json(columns, rows),
    }
}

pub fn export_to_json(
    columns: &[String],
    rows: &[Vec<Scalar>],
) -> Result<ExportArtifact, ExportError> {
    let content = encode_json(columns, rows)?;
    Ok(ExportArtifact {
        file_name: generate_file_name(ExportFormat::Json.extension()),
        mime_type: ExportFormat::Json.mime_type(),
        content: content.into_bytes(),
    })
}

#[must_use]
pub fn export_to_csv(columns: &[String], rows: &[Vec<Scalar>]) -> ExportArtifact {
    ExportArtifact {
        file_name: generate_file_name(ExportFormat::Csv.extension()),
        mime_type: ExportFormat::Csv.mime_type(),
        content: encode_csv(columns, rows).into_bytes(),
    }
}

/// Array of objects keyed by column name, in column order. Cells missing from a short row are
/// left out of that row's object; cells beyond the last column are dropped.
pub fn encode_json(columns: &[String], rows: &[Vec<Scalar>]) -> Result<String, ExportError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(row) {
            object.insert(column.clone(), value.clone());
        }
        records.push(Value::Object(object));
    }

    Ok(serde_json::to_string_pretty(&records)?)
}

/// BOM-prefixed CSV with a header line and one line per row, joined by `\n`.
/// Every cell of a row is written. Rows shorter than the header are padded with empty fields.
#[must_use]
pub fn encode_csv(columns: &[String], rows: &[Vec<Scalar>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|column| csv_escape(column))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in rows {
        let width = columns.len().max(row.len());
        let mut values = Vec::with_capacity(width);
        for column_index in 0..width {
            let text = row.get(column_index).and_then(scalar_text).unwrap_or_default();
            values.push(csv_escape(&text));
        }
        lines.push(values.join(","));
    }

    let mut content = String::new();
    content.push(UTF8_BOM);
    content.push_str(&lines.join("\n"));
    content
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
