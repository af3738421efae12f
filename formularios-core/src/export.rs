//! Tabular export of submitted entries.

use crate::entry::{self, Entry, Timestamp};
use crate::error::{FormError, Result};
use crate::form;
use chrono::NaiveDateTime;
use opendal::Operator;
use rust_xlsxwriter::{Format, Workbook};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const SHEET_NAME: &str = "Respuestas";
pub const DEFAULT_FILENAME_MAXLEN: usize = 60;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FALLBACK_NAME: &str = "export";

pub const COL_ID: &str = "ID Respuesta";
pub const COL_FORM: &str = "Nombre Formulario";
pub const COL_USER: &str = "Usuario";
pub const COL_STATUS: &str = "Status";
pub const COL_FILLED: &str = "Fecha Llenado";
pub const COL_CREATED: &str = "Creado";
pub const COL_UPDATED: &str = "Actualizado";

/// One flattened entry, columns in insertion order.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
    Json,
}

impl ExportFormat {
    /// Unknown names fall back to xlsx.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "csv" => Self::Csv,
            "json" => Self::Json,
            _ => Self::Xlsx,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }
}

/// A field column as read from a frozen form structure.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub id_campo: String,
    pub id_pagina: Option<String>,
    pub nombre_interno: String,
    pub etiqueta: String,
    pub clase: String,
    pub sequence: Option<i64>,
}

impl FieldDescriptor {
    fn label(&self) -> &str {
        [&self.etiqueta, &self.nombre_interno, &self.id_campo]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell<'a>(&self, row: &'a Row, column: &str) -> &'a Value {
        row.get(column).unwrap_or(&Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn sequence_of(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flattens the `paginas[].campos[]` of a form structure into export
/// columns ordered by `sequence`. Fields without one go last; ties keep
/// the order they were found in.
pub fn build_field_catalog(structure: &Value) -> Vec<FieldDescriptor> {
    let Some(paginas) = structure.get("paginas").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    for pagina in paginas {
        let id_pagina = pagina
            .get("id_pagina")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(campos) = pagina.get("campos").and_then(Value::as_array) else {
            continue;
        };
        for campo in campos {
            let nombre_interno = match str_of(campo, "nombre_interno") {
                "" => str_of(campo, "nombre_campo"),
                name => name,
            };
            fields.push(FieldDescriptor {
                id_campo: str_of(campo, "id_campo").to_string(),
                id_pagina: id_pagina.clone(),
                nombre_interno: nombre_interno.to_string(),
                etiqueta: str_of(campo, "etiqueta").to_string(),
                clase: str_of(campo, "clase").to_lowercase(),
                sequence: sequence_of(campo.get("sequence")),
            });
        }
    }
    fields.sort_by_key(|f| (f.sequence.is_none(), f.sequence.unwrap_or_default()));
    fields
}

fn raw_value<'a>(fill: &'a Value, field: &FieldDescriptor) -> Option<&'a Value> {
    let name = field.nombre_interno.as_str();
    if name.is_empty() {
        return None;
    }
    if let Some(page) = field.id_pagina.as_deref().and_then(|p| fill.get(p)) {
        if let Some(v) = page.as_object().and_then(|o| o.get(name)) {
            return Some(v);
        }
    }
    if let Some(v) = fill.get(name) {
        return Some(v);
    }
    fill.as_object()?
        .values()
        .filter_map(Value::as_object)
        .find_map(|page| page.get(name))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "si" | "sí" | "yes"
        ),
        _ => false,
    }
}

fn normalize_value(clase: &str, raw: Option<&Value>) -> Value {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Value::Null;
    };
    match clase {
        "boolean" => Value::Bool(truthy(raw)),
        "dataset" => match raw {
            Value::Object(obj) => ["label", "nombre", "value", "id"]
                .iter()
                .filter_map(|k| obj.get(*k))
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null),
            scalar => scalar.clone(),
        },
        _ => raw.clone(),
    }
}

fn format_timestamp(ts: Option<&Timestamp>) -> Value {
    match to_naive_local(ts) {
        Some(dt) => Value::String(dt.format(TIMESTAMP_FORMAT).to_string()),
        None => Value::Null,
    }
}

/// One export row for an entry: metadata columns, then one column per
/// field of the entry's frozen structure. Missing answers stay `null`.
pub fn flatten_entry(entry: &Entry) -> Row {
    let mut row = Row::new();
    row.insert(COL_ID.to_string(), Value::String(entry.id.clone()));
    row.insert(COL_FORM.to_string(), Value::String(entry.form_name.clone()));
    row.insert(
        COL_USER.to_string(),
        entry
            .id_usuario
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    row.insert(COL_STATUS.to_string(), Value::String(entry.status.clone()));
    row.insert(COL_FILLED.to_string(), format_timestamp(entry.filled_at_local.as_ref()));
    row.insert(COL_CREATED.to_string(), format_timestamp(Some(&entry.created_at)));
    row.insert(COL_UPDATED.to_string(), format_timestamp(Some(&entry.updated_at)));

    for field in build_field_catalog(&entry.form_json) {
        let label = field.label().to_string();
        if label.is_empty() {
            continue;
        }
        let column = if !row.contains_key(&label) {
            label
        } else {
            let qualified = format!("{} ({})", label, field.nombre_interno);
            if row.contains_key(&qualified) {
                format!("{} ({})", label, field.id_campo)
            } else {
                qualified
            }
        };
        let value = normalize_value(&field.clase, raw_value(&entry.fill_json, &field));
        row.insert(column, value);
    }
    row
}

/// All entries of a form flattened; columns in first-seen order.
pub async fn dataframe_for_form(op: &Operator, form_id: &str) -> Result<Frame> {
    let entries = entry::list_entries(op, form_id).await?;
    let mut frame = Frame::default();
    let mut seen: HashSet<String> = HashSet::new();
    for entry in &entries {
        let row = flatten_entry(entry);
        for column in row.keys() {
            if seen.insert(column.clone()) {
                frame.columns.push(column.clone());
            }
        }
        frame.rows.push(row);
    }
    Ok(frame)
}

fn render_xlsx(frame: &Frame) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (c, column) in frame.columns.iter().enumerate() {
        let col = u16::try_from(c).map_err(|_| FormError::Export("too many columns".into()))?;
        worksheet.write_string_with_format(0, col, column, &header)?;
    }
    for (r, row) in frame.rows.iter().enumerate() {
        let xrow = u32::try_from(r + 1).map_err(|_| FormError::Export("too many rows".into()))?;
        for (c, column) in frame.columns.iter().enumerate() {
            let col = u16::try_from(c).map_err(|_| FormError::Export("too many columns".into()))?;
            match frame.cell(row, column) {
                Value::Null => {}
                Value::Bool(b) => {
                    worksheet.write_boolean(xrow, col, *b)?;
                }
                Value::Number(n) => match n.as_f64() {
                    Some(f) => {
                        worksheet.write_number(xrow, col, f)?;
                    }
                    None => {
                        worksheet.write_string(xrow, col, n.to_string())?;
                    }
                },
                Value::String(s) => {
                    worksheet.write_string(xrow, col, s)?;
                }
                other => {
                    worksheet.write_string(xrow, col, other.to_string())?;
                }
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_csv(frame: &Frame) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&frame.columns)?;
    for row in &frame.rows {
        writer.write_record(frame.columns.iter().map(|c| csv_cell(frame.cell(row, c))))?;
    }
    writer
        .into_inner()
        .map_err(|e| FormError::Export(e.to_string()))
}

fn render_json(frame: &Frame) -> Result<Vec<u8>> {
    let rows: Vec<Row> = frame
        .rows
        .iter()
        .map(|row| {
            frame
                .columns
                .iter()
                .map(|c| (c.clone(), frame.cell(row, c).clone()))
                .collect()
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

pub fn render(frame: &Frame, format: ExportFormat) -> Result<Vec<u8>> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }
    match format {
        ExportFormat::Xlsx => render_xlsx(frame),
        ExportFormat::Csv => render_csv(frame),
        ExportFormat::Json => render_json(frame),
    }
}

async fn export_name(op: &Operator, form_id: &str, frame: &Frame) -> Result<String> {
    let from_entries = frame
        .rows
        .iter()
        .filter_map(|r| r.get(COL_FORM).and_then(Value::as_str))
        .find(|n| !n.trim().is_empty())
        .map(str::to_string);
    if let Some(name) = from_entries {
        return Ok(name);
    }
    Ok(form::load_form_opt(op, form_id)
        .await?
        .map(|f| f.nombre)
        .unwrap_or_else(|| FALLBACK_NAME.to_string()))
}

/// Exports every entry of a form. A form without entries yields empty bytes.
pub async fn export_bytes(op: &Operator, form_id: &str, format: ExportFormat) -> Result<ExportFile> {
    let frame = dataframe_for_form(op, form_id).await?;
    let name = export_name(op, form_id, &frame).await?;
    let bytes = render(&frame, format)?;
    let filename = format!(
        "{}.{}",
        sanitize_filename(&name, DEFAULT_FILENAME_MAXLEN),
        format.extension()
    );
    debug!(form = %form_id, rows = frame.rows.len(), filename = %filename, "export rendered");
    Ok(ExportFile {
        filename,
        bytes,
        mime: format.mime(),
    })
}

pub async fn excel_bytes_for_form(op: &Operator, form_id: &str) -> Result<(String, Vec<u8>)> {
    let file = export_bytes(op, form_id, ExportFormat::Xlsx).await?;
    Ok((file.filename, file.bytes))
}

fn unique_name(filename: &str, used: &mut HashSet<String>) -> String {
    if used.insert(filename.to_string()) {
        return filename.to_string();
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (filename, String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Bundles one export per form with entries into a ZIP archive.
pub async fn zip_export(op: &Operator, format: ExportFormat) -> Result<(String, Vec<u8>)> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut used = HashSet::new();
    let mut files = 0usize;

    for form_id in entry::list_entry_form_ids(op).await? {
        let file = export_bytes(op, &form_id, format).await?;
        if file.bytes.is_empty() {
            continue;
        }
        let name = unique_name(&file.filename, &mut used);
        zip.start_file(name, options)?;
        zip.write_all(&file.bytes)
            .map_err(|e| FormError::Export(e.to_string()))?;
        files += 1;
    }
    let bytes = zip.finish()?.into_inner();

    let filename = match format {
        ExportFormat::Xlsx => "formularios_respuestas.zip".to_string(),
        other => format!("formularios_respuestas_{}.zip", other.extension()),
    };
    info!(files, filename = %filename, "zip export produced");
    Ok((filename, bytes))
}

/// Keeps letters, digits, space and `_ - . ( )`; falls back to `export`.
pub fn sanitize_filename(name: &str, maxlen: usize) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.' | '(' | ')'))
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    trimmed.chars().take(maxlen).collect()
}

/// Local wall-clock time without an offset; naive input passes through.
pub fn to_naive_local(ts: Option<&Timestamp>) -> Option<NaiveDateTime> {
    ts.map(Timestamp::naive_local)
}
