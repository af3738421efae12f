use crate::class_registry::ClassRegistry;
use crate::config::{DatasetDefaults, EngineConfig};
use crate::error::{FormError, Result};
use crate::form;
use crate::group;
use crate::ids;
use crate::page;
use crate::storage;
use crate::uow::form_lock;
use chrono::{DateTime, Utc};
use opendal::Operator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Field class, parsed from the registry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldClass {
    String,
    Text,
    Number,
    Boolean,
    Date,
    Dataset,
    Group,
    Other(String),
}

impl FieldClass {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "string" => Self::String,
            "text" => Self::Text,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "dataset" => Self::Dataset,
            "group" => Self::Group,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Dataset => "dataset",
            Self::Group => "group",
            Self::Other(name) => name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Field {
    pub id_campo: String,
    pub clase: String,
    pub tipo: String,
    pub nombre_campo: String,
    pub etiqueta: String,
    #[serde(default)]
    pub ayuda: String,
    #[serde(default)]
    pub requerido: bool,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub grupo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Field {
    pub fn class(&self) -> FieldClass {
        FieldClass::parse(&self.clase)
    }

    /// Group this field is the container of, for `group`-class fields.
    pub fn group_id(&self) -> Option<&str> {
        if self.class() != FieldClass::Group {
            return None;
        }
        self.config.get("id_group").and_then(Value::as_str)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewField {
    #[serde(default)]
    pub clase: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    pub nombre_campo: String,
    pub etiqueta: String,
    #[serde(default)]
    pub ayuda: String,
    #[serde(default)]
    pub requerido: bool,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub grupo: Option<String>,
}

impl NewField {
    pub fn new(clase: &str, nombre_campo: &str, etiqueta: &str) -> Self {
        Self {
            clase: Some(clase.to_string()),
            nombre_campo: nombre_campo.to_string(),
            etiqueta: etiqueta.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldCreated {
    pub ok: bool,
    pub id_pagina: String,
    pub id_pagina_version: String,
    pub sequence: i64,
    pub campo: Field,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FieldPatch {
    pub etiqueta: Option<String>,
    pub ayuda: Option<String>,
    pub requerido: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    pub search: Option<String>,
    /// `nombre_campo`, `etiqueta`, `created_at`, optionally prefixed with `-`.
    pub ordering: Option<String>,
}

pub(crate) fn field_path(id_campo: &str) -> String {
    format!("fields/{}.json", id_campo)
}

fn field_name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name regex must compile"))
}

pub fn is_valid_field_name(name: &str) -> bool {
    field_name_regex().is_match(name)
}

/// Brings a dataset config into the `{"dataset": {...}}` shape.
///
/// Accepts the flat shape (`fuente_id`, or its alias `file`), the nested
/// shape, or either one as a JSON string. A string that is not a JSON object
/// yields an empty config.
pub fn normalize_dataset_config(raw: &Value, defaults: &DatasetDefaults) -> Value {
    let parsed = match raw {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dataset config is not valid JSON");
                return json!({});
            }
        },
        other => other.clone(),
    };
    let Value::Object(outer) = &parsed else {
        return json!({});
    };

    let mut dataset: Map<String, Value> = match outer.get("dataset") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => outer.clone(),
    };
    if let Some(file) = dataset.remove("file") {
        dataset.entry("fuente_id").or_insert(file);
    }
    dataset
        .entry("mode")
        .or_insert_with(|| Value::String(defaults.mode.clone()));
    dataset
        .entry("cache_inline")
        .or_insert(Value::Bool(defaults.cache_inline));
    dataset
        .entry("max_items_inline")
        .or_insert(json!(defaults.max_items_inline));

    json!({ "dataset": dataset })
}

/// Checks a normalized dataset config.
pub fn validate_dataset_config(config: &Value) -> Result<()> {
    let dataset = config
        .get("dataset")
        .and_then(Value::as_object)
        .ok_or_else(|| FormError::validation("config", "dataset configuration is required"))?;
    let fuente = dataset
        .get("fuente_id")
        .map(|v| match v {
            Value::String(s) => !s.trim().is_empty(),
            Value::Null => false,
            _ => true,
        })
        .unwrap_or(false);
    if !fuente {
        return Err(FormError::validation("config", "dataset.fuente_id is required"));
    }
    match dataset.get("mode").and_then(Value::as_str) {
        Some("pair") => Ok(()),
        Some("single") => {
            if dataset.get("column").and_then(Value::as_str).is_none() {
                return Err(FormError::validation(
                    "config",
                    "dataset.column is required for mode single",
                ));
            }
            Ok(())
        }
        other => Err(FormError::validation(
            "config",
            format!("invalid dataset.mode: {}", other.unwrap_or("null")),
        )),
    }
}

fn object_config(raw: Option<Value>) -> Result<Map<String, Value>> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str(&s) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(FormError::validation("config", "config must be a JSON object")),
        },
        Some(_) => Err(FormError::validation("config", "config must be a JSON object")),
    }
}

fn normalize_config(class: &FieldClass, raw: Option<Value>, defaults: &DatasetDefaults) -> Result<Value> {
    match class {
        FieldClass::Dataset => {
            let config = normalize_dataset_config(&raw.unwrap_or(Value::Null), defaults);
            validate_dataset_config(&config)?;
            Ok(config)
        }
        FieldClass::Group => {
            let mut config = object_config(raw)?;
            let id_group = match config.get("id_group").and_then(Value::as_str) {
                Some(id) => ids::uuid32_no_dashes(id)
                    .map_err(|_| FormError::validation("config", "invalid id_group"))?,
                None => ids::uuid32(),
            };
            config.insert("id_group".to_string(), Value::String(id_group));
            Ok(Value::Object(config))
        }
        FieldClass::String
        | FieldClass::Text
        | FieldClass::Number
        | FieldClass::Boolean
        | FieldClass::Date
        | FieldClass::Other(_) => Ok(Value::Object(object_config(raw)?)),
    }
}

async fn resolve_group(op: &Operator, raw: &str) -> Result<String> {
    let invalid = || FormError::validation("grupo", format!("group does not exist: {raw}"));
    let id = ids::uuid32_no_dashes(raw).map_err(|_| invalid())?;
    match group::get_group(op, &id).await {
        Ok(g) => Ok(g.id_grupo),
        Err(e) if e.is_not_found() => Err(invalid()),
        Err(e) => Err(e),
    }
}

/// Creates a field and binds it to a page through a new page version.
pub async fn add_field_to_page<R: ClassRegistry>(
    op: &Operator,
    config: &EngineConfig,
    registry: &R,
    page_id: &str,
    new: NewField,
) -> Result<FieldCreated> {
    let clase = new
        .clase
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| FormError::validation("clase", "class missing"))?;
    let schema = registry
        .lookup(clase)
        .ok_or_else(|| FormError::validation("clase", "class does not exist"))?;
    let class = FieldClass::parse(&schema.clase);

    let nombre_campo = new.nombre_campo.trim().to_string();
    if !is_valid_field_name(&nombre_campo) {
        return Err(FormError::validation(
            "nombre_campo",
            format!("invalid field name: {nombre_campo}"),
        ));
    }
    let etiqueta = new.etiqueta.trim().to_string();
    if etiqueta.is_empty() {
        return Err(FormError::validation("etiqueta", "label is required"));
    }
    let field_config = normalize_config(&class, new.config, &config.dataset)?;

    let page_id = ids::uuid32_no_dashes(page_id)?;
    let form_id = page::load_page(op, &page_id).await?.formulario_id;

    let lock = form_lock(&form_id);
    let _guard = lock.lock().await;

    let mut target = page::load_page(op, &page_id).await?;
    let owner = form::load_form(op, &form_id).await?;
    form::ensure_active(&owner)?;

    let grupo = match new.grupo.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(raw) => Some(resolve_group(op, raw).await?),
        None => None,
    };

    let campo = Field {
        id_campo: ids::uuid32(),
        clase: schema.clase.clone(),
        tipo: new
            .tipo
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| schema.clase.clone()),
        nombre_campo,
        etiqueta,
        ayuda: new.ayuda,
        requerido: new.requerido,
        config: field_config,
        grupo: grupo.clone(),
        created_at: Utc::now(),
    };
    storage::write_json(op, &field_path(&campo.id_campo), &campo).await?;

    if let Some(id_group) = campo.group_id() {
        group::create_group(op, id_group, &campo.id_campo, &campo.etiqueta).await?;
    }
    if let Some(id_grupo) = grupo.as_deref() {
        group::link_field(op, id_grupo, &campo.id_campo).await?;
    }

    let mut bindings: Vec<(String, i64)> = page::current_bindings(op, &target)
        .await?
        .into_iter()
        .map(|b| (b.id_campo, b.sequence))
        .collect();
    let sequence = new
        .sequence
        .unwrap_or_else(|| bindings.iter().map(|(_, s)| *s).max().unwrap_or(0) + 1);
    bindings.push((campo.id_campo.clone(), sequence));
    let page_version = page::write_page_version(op, &mut target, bindings).await?;

    info!(page = %page_id, field = %campo.id_campo, clase = %campo.clase, "field added to page");
    Ok(FieldCreated {
        ok: true,
        id_pagina: page_id,
        id_pagina_version: page_version.id_pagina_version,
        sequence,
        campo,
    })
}

/// Stores a copy of `source` under a fresh id. Caller handles bindings.
pub(crate) async fn clone_field(op: &Operator, source: &Field) -> Result<Field> {
    let mut copy = source.clone();
    copy.id_campo = ids::uuid32();
    copy.created_at = Utc::now();
    storage::write_json(op, &field_path(&copy.id_campo), &copy).await?;
    debug!(source = %source.id_campo, copy = %copy.id_campo, "field cloned");
    Ok(copy)
}

/// Documents owned by a field: itself, the group it contains with that
/// group's links, and its own membership link.
pub(crate) async fn owned_paths(op: &Operator, campo: &Field) -> Result<Vec<String>> {
    let mut paths = vec![field_path(&campo.id_campo)];
    if let Some(id_group) = campo.group_id() {
        paths.push(group::group_path(id_group));
        paths.extend(storage::list_json_paths(op, &group::links_dir(id_group)).await?);
    }
    if let Some(id_grupo) = campo.grupo.as_deref() {
        paths.push(group::link_path(id_grupo, &campo.id_campo));
    }
    Ok(paths)
}

pub async fn load_field(op: &Operator, id_campo: &str) -> Result<Field> {
    storage::read_json_opt(op, &field_path(id_campo))
        .await?
        .ok_or_else(|| FormError::not_found("field", id_campo))
}

pub async fn update_field(op: &Operator, id_campo: &str, patch: FieldPatch) -> Result<Field> {
    let mut campo = load_field(op, id_campo).await?;
    if let Some(etiqueta) = patch.etiqueta {
        let etiqueta = etiqueta.trim().to_string();
        if etiqueta.is_empty() {
            return Err(FormError::validation("etiqueta", "label is required"));
        }
        campo.etiqueta = etiqueta;
    }
    if let Some(ayuda) = patch.ayuda {
        campo.ayuda = ayuda;
    }
    if let Some(requerido) = patch.requerido {
        campo.requerido = requerido;
    }
    storage::write_json(op, &field_path(id_campo), &campo).await?;
    Ok(campo)
}

pub async fn list_fields(op: &Operator, filter: &FieldFilter) -> Result<Vec<Field>> {
    let mut fields: Vec<Field> = storage::list_json(op, "fields/").await?;
    if let Some(search) = filter.search.as_deref().map(str::to_lowercase) {
        fields.retain(|f| {
            f.nombre_campo.to_lowercase().contains(&search)
                || f.etiqueta.to_lowercase().contains(&search)
        });
    }
    let ordering = filter.ordering.as_deref().unwrap_or("created_at");
    let (key, descending) = match ordering.strip_prefix('-') {
        Some(key) => (key, true),
        None => (ordering, false),
    };
    match key {
        "nombre_campo" => fields.sort_by(|a, b| a.nombre_campo.cmp(&b.nombre_campo)),
        "etiqueta" => fields.sort_by(|a, b| a.etiqueta.cmp(&b.etiqueta)),
        _ => fields.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
    }
    if descending {
        fields.reverse();
    }
    Ok(fields)
}
