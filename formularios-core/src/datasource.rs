//! Uploaded CSV/Excel tables backing dataset fields.

use crate::config::EngineConfig;
use crate::error::{FormError, Result};
use crate::ids;
use crate::storage;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::Cursor;
use tracing::{info, warn};

pub type DataRow = Map<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Excel,
}

impl FileKind {
    fn from_filename(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        if lower.ends_with(".csv") {
            Ok(Self::Csv)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Ok(Self::Excel)
        } else {
            Err(FormError::UnsupportedMedia(
                "Solo se permiten archivos Excel o CSV".to_string(),
            ))
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataSource {
    pub id: String,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    pub archivo_nombre: String,
    pub tipo_archivo: FileKind,
    pub columnas: Vec<String>,
    #[serde(default)]
    pub preview_data: Vec<DataRow>,
    #[serde(default = "default_true")]
    pub activo: bool,
    #[serde(default)]
    pub creado_por: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct NewDataSource {
    pub nombre: String,
    pub descripcion: Option<String>,
    pub archivo_nombre: String,
    pub contenido: Vec<u8>,
    pub creado_por: Option<String>,
}

/// A selectable value of a dataset field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataSourceOption {
    pub id: String,
    pub label: String,
}

fn source_path(id: &str) -> String {
    format!("datasources/{}.json", id)
}

fn rows_path(id: &str) -> String {
    format!("datasource_rows/{}.json", id)
}

struct Table {
    columnas: Vec<String>,
    rows: Vec<DataRow>,
}

fn parse_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let columnas: Vec<String> = reader
        .headers()
        .map_err(|e| FormError::validation("archivo", format!("invalid CSV: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FormError::validation("archivo", format!("invalid CSV: {e}")))?;
        let row: DataRow = columnas
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = record
                    .get(i)
                    .map(|s| Value::String(s.to_string()))
                    .unwrap_or(Value::Null);
                (col.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(Table { columnas, rows })
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => json!(i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => json!(*f as i64),
        Data::Float(f) => json!(f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn parse_excel(bytes: Vec<u8>) -> Result<Table> {
    let invalid = |e: calamine::Error| FormError::validation("archivo", format!("invalid Excel file: {e}"));
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(invalid)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(invalid)?,
        None => return Err(FormError::validation("archivo", "Excel file has no sheets")),
    };

    let mut rows_iter = range.rows();
    let columnas: Vec<String> = match rows_iter.next() {
        Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => Vec::new(),
    };
    let rows = rows_iter
        .map(|cells| {
            columnas
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), cells.get(i).map(cell_value).unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    Ok(Table { columnas, rows })
}

/// Validates and parses an upload, storing its metadata and full rows.
pub async fn create_data_source(
    op: &Operator,
    config: &EngineConfig,
    new: NewDataSource,
) -> Result<DataSource> {
    let nombre = new.nombre.trim().to_string();
    if nombre.is_empty() {
        return Err(FormError::validation("nombre", "name is required"));
    }
    let kind = FileKind::from_filename(&new.archivo_nombre)?;
    if new.contenido.len() > config.max_upload_bytes {
        return Err(FormError::validation(
            "archivo",
            format!(
                "El archivo no puede superar los {}MB",
                config.max_upload_bytes / (1024 * 1024)
            ),
        ));
    }

    let table = match kind {
        FileKind::Csv => parse_csv(&new.contenido)?,
        FileKind::Excel => parse_excel(new.contenido)?,
    };
    if table.columnas.iter().all(|c| c.is_empty()) {
        return Err(FormError::validation("archivo", "file has no columns"));
    }
    if table.rows.is_empty() {
        warn!(archivo = %new.archivo_nombre, "data source has no rows");
    }

    let source = DataSource {
        id: ids::uuid32(),
        nombre,
        descripcion: new.descripcion.unwrap_or_default(),
        archivo_nombre: new.archivo_nombre,
        tipo_archivo: kind,
        columnas: table.columnas,
        preview_data: table.rows.iter().take(config.preview_rows).cloned().collect(),
        activo: true,
        creado_por: new.creado_por,
        created_at: Utc::now(),
    };
    storage::write_json(op, &rows_path(&source.id), &table.rows).await?;
    storage::write_json(op, &source_path(&source.id), &source).await?;
    info!(source = %source.id, rows = table.rows.len(), "data source created");
    Ok(source)
}

pub async fn list_data_sources(op: &Operator) -> Result<Vec<DataSource>> {
    let mut sources: Vec<DataSource> = storage::list_json(op, "datasources/").await?;
    sources.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(sources)
}

pub async fn get_data_source(op: &Operator, id: &str) -> Result<DataSource> {
    storage::read_json_opt(op, &source_path(id))
        .await?
        .ok_or_else(|| FormError::not_found("data source", id))
}

pub async fn data_source_rows(op: &Operator, id: &str) -> Result<Vec<DataRow>> {
    get_data_source(op, id).await?;
    Ok(storage::read_json_opt(op, &rows_path(id)).await?.unwrap_or_default())
}

pub async fn delete_data_source(op: &Operator, id: &str) -> Result<()> {
    get_data_source(op, id).await?;
    storage::delete_path(op, &rows_path(id)).await?;
    storage::delete_path(op, &source_path(id)).await?;
    info!(source = %id, "data source deleted");
    Ok(())
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `{id, label}` pairs read from two columns; rows lacking a key are skipped.
pub async fn data_source_values(
    op: &Operator,
    id: &str,
    key_column: &str,
    label_column: &str,
) -> Result<Vec<DataSourceOption>> {
    let source = get_data_source(op, id).await?;
    for (field, column) in [("key_column", key_column), ("label_column", label_column)] {
        if !source.columnas.iter().any(|c| c == column) {
            return Err(FormError::validation(
                field,
                format!("unknown column: {column}"),
            ));
        }
    }
    let options = data_source_rows(op, id)
        .await?
        .iter()
        .filter_map(|row| {
            let key = row.get(key_column).and_then(text_of)?;
            let label = row.get(label_column).and_then(text_of).unwrap_or_default();
            Some(DataSourceOption { id: key, label })
        })
        .collect();
    Ok(options)
}
