mod common;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{DateTime, NaiveDate};
use common::{create_sample_form, setup_operator};
use formularios_core::entry::{self, Entry, NewEntry, Timestamp};
use formularios_core::export::{self, ExportFormat};
use formularios_core::field::{self, NewField};
use formularios_core::integrity::FakeIntegrityProvider;
use formularios_core::{page, EngineConfig, MemoryClassRegistry};
use opendal::Operator;
use serde_json::{json, Value};
use std::io::Cursor;

fn entry_with(fill: Value) -> Entry {
    let created = Timestamp::parse("2024-05-01T12:00:00").expect("timestamp");
    Entry {
        id: "e-1".to_string(),
        id_usuario: Some("jperez".to_string()),
        form_id: "f-1".to_string(),
        index_version_id: None,
        form_name: "Encuesta".to_string(),
        filled_at_local: None,
        status: "Completado".to_string(),
        fill_json: fill,
        form_json: json!({"paginas": [{"id_pagina": "p1", "campos": [
            {"id_campo": "c1", "nombre_interno": "nombre", "etiqueta": "Nombre", "clase": "string", "sequence": 1}
        ]}]}),
        created_at: created,
        updated_at: created,
        integrity: Default::default(),
    }
}

/// Form with a text, a boolean and a dataset field on its default page.
async fn form_with_fields(op: &Operator, nombre: &str) -> anyhow::Result<(String, String)> {
    let config = EngineConfig::default();
    let registry = MemoryClassRegistry::with_defaults();
    let created = create_sample_form(op, nombre).await?;
    let page_id = page::list_pages(op, Some(&created.id)).await?[0].id_pagina.clone();

    field::add_field_to_page(op, &config, &registry, &page_id, NewField::new("string", "nombre", "Nombre")).await?;
    field::add_field_to_page(op, &config, &registry, &page_id, NewField::new("boolean", "acepta", "Acepta")).await?;
    let mut comuna = NewField::new("dataset", "comuna", "Comuna");
    comuna.config = Some(json!({"fuente_id": "f1"}));
    field::add_field_to_page(op, &config, &registry, &page_id, comuna).await?;
    Ok((created.id, page_id))
}

async fn submit(op: &Operator, form_id: &str, fill: Value) -> anyhow::Result<Entry> {
    Ok(entry::submit_entry(
        op,
        &FakeIntegrityProvider,
        form_id,
        NewEntry {
            id_usuario: Some("encuestador".to_string()),
            fill_json: fill,
            ..NewEntry::default()
        },
    )
    .await?)
}

#[tokio::test]
async fn test_export_flatten_entry_labels_values() -> anyhow::Result<()> {
    let row = export::flatten_entry(&entry_with(json!({"nombre": "Juan Pérez"})));
    assert_eq!(row["Nombre"], json!("Juan Pérez"));
    assert_eq!(row["Nombre Formulario"], json!("Encuesta"));
    assert_eq!(row["Usuario"], json!("jperez"));
    assert_eq!(row["Status"], json!("Completado"));
    assert_eq!(row["Creado"], json!("2024-05-01 12:00:00"));

    let keys: Vec<_> = row.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        [
            "ID Respuesta",
            "Nombre Formulario",
            "Usuario",
            "Status",
            "Fecha Llenado",
            "Creado",
            "Actualizado",
            "Nombre"
        ]
    );

    let empty = export::flatten_entry(&entry_with(json!({})));
    assert!(empty.contains_key("Nombre"));
    assert_eq!(empty["Nombre"], Value::Null);

    Ok(())
}

#[tokio::test]
async fn test_export_flatten_entry_reads_page_nested_values() -> anyhow::Result<()> {
    let row = export::flatten_entry(&entry_with(json!({"p1": {"nombre": "Ana"}})));
    assert_eq!(row["Nombre"], json!("Ana"));

    let row = export::flatten_entry(&entry_with(json!({"otra": {"nombre": "Luis"}})));
    assert_eq!(row["Nombre"], json!("Luis"));

    Ok(())
}

#[tokio::test]
async fn test_export_duplicate_labels_are_qualified() -> anyhow::Result<()> {
    let mut entry = entry_with(json!({"a": 1, "b": 2}));
    entry.form_json = json!({"paginas": [{"id_pagina": "p1", "campos": [
        {"id_campo": "c1", "nombre_interno": "a", "etiqueta": "Edad", "clase": "number", "sequence": 1},
        {"id_campo": "c2", "nombre_interno": "b", "etiqueta": "Edad", "clase": "number", "sequence": 2}
    ]}]});
    let row = export::flatten_entry(&entry);
    assert_eq!(row["Edad"], json!(1));
    assert_eq!(row["Edad (b)"], json!(2));
    Ok(())
}

#[tokio::test]
async fn test_export_no_entries_yields_empty_bytes() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let (form_id, _) = form_with_fields(&op, "Vacía").await?;

    let file = export::export_bytes(&op, &form_id, ExportFormat::Xlsx).await?;
    assert!(file.bytes.is_empty());
    assert_eq!(file.filename, "Vacía.xlsx");
    assert!(export::dataframe_for_form(&op, &form_id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_export_csv_round_trips_rows() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let (form_id, page_id) = form_with_fields(&op, "Encuesta@#$ 2024").await?;

    submit(&op, &form_id, json!({&page_id: {"nombre": "Ana", "acepta": "sí", "comuna": {"id": "13101", "label": "Santiago"}}})).await?;
    submit(&op, &form_id, json!({"nombre": "Luis", "acepta": 0})).await?;
    submit(&op, &form_id, json!({})).await?;

    let file = export::export_bytes(&op, &form_id, ExportFormat::parse("CSV")).await?;
    assert_eq!(file.filename, "Encuesta 2024.csv");
    assert_eq!(file.mime, "text/csv");

    let mut reader = csv::ReaderBuilder::new().from_reader(file.bytes.as_slice());
    let headers = reader.headers()?.clone();
    let records: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 3);

    let col = |name: &str| headers.iter().position(|h| h == name).expect("column");
    let (nombre, acepta, comuna) = (col("Nombre"), col("Acepta"), col("Comuna"));
    let mut by_name: Vec<(String, String, String)> = records
        .iter()
        .map(|r| (r[nombre].to_string(), r[acepta].to_string(), r[comuna].to_string()))
        .collect();
    by_name.sort();
    assert!(by_name.contains(&("Ana".into(), "true".into(), "Santiago".into())));
    assert!(by_name.contains(&("Luis".into(), "false".into(), String::new())));
    assert!(by_name.contains(&(String::new(), String::new(), String::new())));

    Ok(())
}

#[tokio::test]
async fn test_export_xlsx_has_response_sheet() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let (form_id, _) = form_with_fields(&op, "Planilla").await?;
    submit(&op, &form_id, json!({"nombre": "Ana", "acepta": true})).await?;
    submit(&op, &form_id, json!({"nombre": "Luis", "acepta": false})).await?;

    let (filename, bytes) = export::excel_bytes_for_form(&op, &form_id).await?;
    assert_eq!(filename, "Planilla.xlsx");

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    assert_eq!(workbook.sheet_names(), vec!["Respuestas".to_string()]);
    let range = workbook.worksheet_range("Respuestas")?;
    assert_eq!(range.height(), 3);
    assert_eq!(range.get((0, 0)), Some(&Data::String("ID Respuesta".to_string())));

    Ok(())
}

#[tokio::test]
async fn test_export_json_rows() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let (form_id, _) = form_with_fields(&op, "Json").await?;
    submit(&op, &form_id, json!({"nombre": "Ana"})).await?;

    let file = export::export_bytes(&op, &form_id, ExportFormat::Json).await?;
    assert_eq!(file.mime, "application/json");
    let rows: Vec<Value> = serde_json::from_slice(&file.bytes)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Nombre"], json!("Ana"));
    assert_eq!(rows[0]["Acepta"], Value::Null);

    Ok(())
}

#[tokio::test]
async fn test_export_zip_without_entries_is_valid_and_empty() -> anyhow::Result<()> {
    let op = setup_operator()?;
    form_with_fields(&op, "Sin respuestas").await?;

    let (filename, bytes) = export::zip_export(&op, ExportFormat::Xlsx).await?;
    assert_eq!(filename, "formularios_respuestas.zip");
    let archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    assert_eq!(archive.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_export_zip_bundles_populated_forms() -> anyhow::Result<()> {
    let op = setup_operator()?;
    for nombre in ["Uno", "Dos", "Tres"] {
        let (form_id, _) = form_with_fields(&op, nombre).await?;
        submit(&op, &form_id, json!({"nombre": "a"})).await?;
        submit(&op, &form_id, json!({"nombre": "b"})).await?;
    }
    form_with_fields(&op, "Vacío").await?;

    let (_, bytes) = export::zip_export(&op, ExportFormat::Xlsx).await?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    assert_eq!(archive.len(), 3);
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        assert!(file.name().ends_with(".xlsx"));
        assert!(!file.name().starts_with("Vacío"));
    }

    let (filename, _) = export::zip_export(&op, ExportFormat::Csv).await?;
    assert_eq!(filename, "formularios_respuestas_csv.zip");

    Ok(())
}

#[tokio::test]
async fn test_export_zip_deduplicates_names() -> anyhow::Result<()> {
    let op = setup_operator()?;
    for _ in 0..2 {
        let (form_id, _) = form_with_fields(&op, "Gemelo").await?;
        submit(&op, &form_id, json!({"nombre": "x"})).await?;
    }

    let (_, bytes) = export::zip_export(&op, ExportFormat::Json).await?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).map(|f| f.name().to_string()))
        .collect::<Result<_, _>>()?;
    names.sort();
    assert_eq!(names, ["Gemelo (2).json", "Gemelo.json"]);

    Ok(())
}

#[tokio::test]
async fn test_export_to_naive_local() -> anyhow::Result<()> {
    assert_eq!(export::to_naive_local(None), None);

    let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .expect("naive datetime");
    assert_eq!(
        export::to_naive_local(Some(&Timestamp::Naive(naive))),
        Some(naive)
    );

    let aware = DateTime::parse_from_rfc3339("2024-01-02T03:04:05+00:00")?;
    let expected = aware.with_timezone(&chrono::Local).naive_local();
    assert_eq!(
        export::to_naive_local(Some(&Timestamp::Aware(aware))),
        Some(expected)
    );

    Ok(())
}
