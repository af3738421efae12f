use crate::category;
use crate::config::EngineConfig;
use crate::field;
use crate::error::{FormError, Result};
use crate::page;
use crate::storage;
use crate::uow::{form_lock, release_form_lock, UnitOfWork};
use crate::version;
use chrono::{DateTime, NaiveDate, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle state of a form.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormState {
    #[default]
    #[serde(rename = "Activo", alias = "Activa")]
    Active,
    #[serde(rename = "Suspendida", alias = "Suspendido")]
    Suspended,
}

fn default_forma_envio() -> String {
    "En Linea".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Form {
    pub id: String,
    #[serde(default)]
    pub categoria: Option<String>,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub permitir_fotos: bool,
    #[serde(default)]
    pub permitir_gps: bool,
    pub disponible_desde_fecha: NaiveDate,
    pub disponible_hasta_fecha: NaiveDate,
    #[serde(default)]
    pub estado: FormState,
    #[serde(default = "default_forma_envio")]
    pub forma_envio: String,
    #[serde(default)]
    pub es_publico: bool,
    #[serde(default)]
    pub auto_envio: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Form {
    pub fn is_suspended(&self) -> bool {
        self.estado == FormState::Suspended
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewForm {
    #[serde(default)]
    pub categoria: Option<String>,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub permitir_fotos: bool,
    #[serde(default)]
    pub permitir_gps: bool,
    pub disponible_desde_fecha: NaiveDate,
    pub disponible_hasta_fecha: NaiveDate,
    #[serde(default)]
    pub estado: FormState,
    #[serde(default = "default_forma_envio")]
    pub forma_envio: String,
    #[serde(default)]
    pub es_publico: bool,
    #[serde(default)]
    pub auto_envio: bool,
}

impl NewForm {
    /// Minimal active form available between `desde` and `hasta`.
    pub fn new(nombre: impl Into<String>, desde: NaiveDate, hasta: NaiveDate) -> Self {
        Self {
            categoria: None,
            nombre: nombre.into(),
            descripcion: String::new(),
            permitir_fotos: false,
            permitir_gps: false,
            disponible_desde_fecha: desde,
            disponible_hasta_fecha: hasta,
            estado: FormState::Active,
            forma_envio: default_forma_envio(),
            es_publico: false,
            auto_envio: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FormPatch {
    pub categoria: Option<String>,
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub permitir_fotos: Option<bool>,
    pub permitir_gps: Option<bool>,
    pub disponible_desde_fecha: Option<NaiveDate>,
    pub disponible_hasta_fecha: Option<NaiveDate>,
    pub estado: Option<FormState>,
    pub forma_envio: Option<String>,
    pub es_publico: Option<bool>,
    pub auto_envio: Option<bool>,
}

impl FormPatch {
    /// True when the patch touches nothing but `estado`.
    pub fn is_state_only(&self) -> bool {
        self.categoria.is_none()
            && self.nombre.is_none()
            && self.descripcion.is_none()
            && self.permitir_fotos.is_none()
            && self.permitir_gps.is_none()
            && self.disponible_desde_fecha.is_none()
            && self.disponible_hasta_fecha.is_none()
            && self.forma_envio.is_none()
            && self.es_publico.is_none()
            && self.auto_envio.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormFilter {
    pub search: Option<String>,
    /// `nombre`, `-nombre`, `created_at` or `-created_at`.
    pub ordering: Option<String>,
}

pub(crate) fn form_dir(form_id: &str) -> String {
    format!("forms/{}", form_id)
}

pub(crate) fn form_path(form_id: &str) -> String {
    format!("{}/form.json", form_dir(form_id))
}

pub(crate) fn new_form_id() -> String {
    Uuid::new_v4().to_string()
}

fn validate_window(desde: NaiveDate, hasta: NaiveDate) -> Result<()> {
    if hasta < desde {
        return Err(FormError::validation(
            "disponible_hasta_fecha",
            "must be on or after disponible_desde_fecha",
        ));
    }
    Ok(())
}

fn validate_name(nombre: &str) -> Result<String> {
    let trimmed = nombre.trim();
    if trimmed.is_empty() {
        return Err(FormError::validation("nombre", "name is required"));
    }
    Ok(trimmed.to_string())
}

async fn validate_category(op: &Operator, categoria: Option<&str>) -> Result<()> {
    if let Some(id) = categoria {
        match category::get_category(op, id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(FormError::validation(
                    "categoria",
                    format!("category does not exist: {id}"),
                ))
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub(crate) fn ensure_active(form: &Form) -> Result<()> {
    if form.is_suspended() {
        return Err(FormError::Locked(form.id.clone()));
    }
    Ok(())
}

/// Creates a form; version 1 and the default page follow once the write commits.
pub async fn create_form(op: &Operator, config: &EngineConfig, new: NewForm) -> Result<Form> {
    let nombre = validate_name(&new.nombre)?;
    validate_window(new.disponible_desde_fecha, new.disponible_hasta_fecha)?;
    validate_category(op, new.categoria.as_deref()).await?;

    let now = Utc::now();
    let form = Form {
        id: new_form_id(),
        categoria: new.categoria,
        nombre,
        descripcion: new.descripcion,
        permitir_fotos: new.permitir_fotos,
        permitir_gps: new.permitir_gps,
        disponible_desde_fecha: new.disponible_desde_fecha,
        disponible_hasta_fecha: new.disponible_hasta_fecha,
        estado: new.estado,
        forma_envio: new.forma_envio,
        es_publico: new.es_publico,
        auto_envio: new.auto_envio,
        created_at: now,
        updated_at: now,
    };

    let mut uow = UnitOfWork::begin(op);
    uow.stage_json(form_path(&form.id), &form)?;
    let form_id = form.id.clone();
    let page_name = config.default_page_name.clone();
    uow.on_commit(format!("form-bootstrap:{}", form.id), move |op| async move {
        bootstrap_form(&op, &form_id, &page_name).await
    });
    uow.commit().await?;

    info!(form = %form.id, nombre = %form.nombre, "form created");
    Ok(form)
}

/// Gives a form its first version and default page. Does nothing for a
/// form that already has a version.
pub(crate) async fn bootstrap_form(op: &Operator, form_id: &str, page_name: &str) -> Result<()> {
    let lock = form_lock(form_id);
    let _guard = lock.lock().await;
    bootstrap_form_locked(op, form_id, page_name).await.map(|_| ())
}

/// Same as [`bootstrap_form`] for callers already holding the form lock.
/// Returns the latest version, created or not.
pub(crate) async fn bootstrap_form_locked(
    op: &Operator,
    form_id: &str,
    page_name: &str,
) -> Result<version::IndexVersion> {
    if let Some(latest) = version::latest_version(op, form_id).await? {
        debug!(form = %form_id, "form already bootstrapped");
        return Ok(latest);
    }
    let version = version::create_version_locked(op, form_id).await?;
    if page::pages_for_version(op, form_id, &version.id_index_version)
        .await?
        .is_empty()
    {
        page::insert_page_locked(op, form_id, &version.id_index_version, Some(page_name), "", None)
            .await?;
    }
    Ok(version)
}

/// Loads a form regardless of its state.
pub async fn load_form(op: &Operator, form_id: &str) -> Result<Form> {
    load_form_opt(op, form_id)
        .await?
        .ok_or_else(|| FormError::not_found("form", form_id))
}

pub async fn load_form_opt(op: &Operator, form_id: &str) -> Result<Option<Form>> {
    if form_id.is_empty() || form_id.contains('/') {
        return Ok(None);
    }
    storage::read_json_opt(op, &form_path(form_id)).await
}

pub(crate) async fn load_all_forms(op: &Operator) -> Result<Vec<Form>> {
    let mut forms = Vec::new();
    for form_id in storage::list_child_dirs(op, "forms/").await? {
        if let Some(form) = load_form_opt(op, &form_id).await? {
            forms.push(form);
        }
    }
    Ok(forms)
}

/// Reads a form for display; suspended forms are locked.
pub async fn get_form(op: &Operator, form_id: &str) -> Result<Form> {
    let form = load_form(op, form_id).await?;
    ensure_active(&form)?;
    Ok(form)
}

pub async fn list_forms(op: &Operator, filter: &FormFilter) -> Result<Vec<Form>> {
    let mut forms = load_all_forms(op).await?;
    if let Some(search) = filter.search.as_deref().map(str::to_lowercase) {
        forms.retain(|f| {
            f.nombre.to_lowercase().contains(&search)
                || f.descripcion.to_lowercase().contains(&search)
        });
    }
    match filter.ordering.as_deref() {
        Some("nombre") => forms.sort_by(|a, b| a.nombre.cmp(&b.nombre)),
        Some("-nombre") => forms.sort_by(|a, b| b.nombre.cmp(&a.nombre)),
        Some("-created_at") => forms.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        _ => forms.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
    }
    Ok(forms)
}

/// Applies a partial update. A suspended form only accepts a state change.
pub async fn update_form(op: &Operator, form_id: &str, patch: FormPatch) -> Result<Form> {
    let mut form = load_form(op, form_id).await?;
    if form.is_suspended() && !patch.is_state_only() {
        return Err(FormError::Locked(form.id.clone()));
    }

    if let Some(nombre) = patch.nombre.as_deref() {
        form.nombre = validate_name(nombre)?;
    }
    if let Some(categoria) = patch.categoria {
        validate_category(op, Some(categoria.as_str())).await?;
        form.categoria = Some(categoria);
    }
    if let Some(descripcion) = patch.descripcion {
        form.descripcion = descripcion;
    }
    if let Some(v) = patch.permitir_fotos {
        form.permitir_fotos = v;
    }
    if let Some(v) = patch.permitir_gps {
        form.permitir_gps = v;
    }
    if let Some(desde) = patch.disponible_desde_fecha {
        form.disponible_desde_fecha = desde;
    }
    if let Some(hasta) = patch.disponible_hasta_fecha {
        form.disponible_hasta_fecha = hasta;
    }
    validate_window(form.disponible_desde_fecha, form.disponible_hasta_fecha)?;
    if let Some(estado) = patch.estado {
        form.estado = estado;
    }
    if let Some(forma_envio) = patch.forma_envio {
        form.forma_envio = forma_envio;
    }
    if let Some(v) = patch.es_publico {
        form.es_publico = v;
    }
    if let Some(v) = patch.auto_envio {
        form.auto_envio = v;
    }
    form.updated_at = Utc::now();

    storage::write_json(op, &form_path(form_id), &form).await?;
    Ok(form)
}

/// Suspends a form. Suspending twice is not an error.
pub async fn suspend(op: &Operator, form_id: &str) -> Result<Form> {
    let mut form = load_form(op, form_id).await?;
    if form.is_suspended() {
        debug!(form = %form_id, "form already suspended");
        return Ok(form);
    }
    form.estado = FormState::Suspended;
    form.updated_at = Utc::now();
    storage::write_json(op, &form_path(form_id), &form).await?;
    info!(form = %form_id, "form suspended");
    Ok(form)
}

/// Removes a form with its versions, pages, fields, groups and
/// assignments. Version history and submitted entries are kept.
pub async fn delete_form(op: &Operator, form_id: &str) -> Result<()> {
    load_form(op, form_id).await?;
    let lock = form_lock(form_id);
    let _guard = lock.lock().await;

    let mut uow = UnitOfWork::begin(op);
    let mut field_ids = BTreeSet::new();
    for page in page::list_pages(op, Some(form_id)).await? {
        for version in page::list_page_versions(op, &page.id_pagina).await? {
            field_ids.extend(version.campos.into_iter().map(|b| b.id_campo));
        }
        for path in page::page_paths(op, &page).await? {
            uow.stage_delete(path);
        }
    }
    for id_campo in &field_ids {
        if let Some(campo) = storage::read_json_opt(op, &field::field_path(id_campo)).await? {
            for path in field::owned_paths(op, &campo).await? {
                uow.stage_delete(path);
            }
        }
    }
    for path in storage::list_json_paths_recursive(op, &format!("{}/", form_dir(form_id))).await? {
        uow.stage_delete(path);
    }
    for assignment in crate::assignment::list_assignments(op, None).await? {
        if assignment.id_formulario == form_id {
            uow.stage_delete(crate::assignment::assignment_path(&assignment.id));
        }
    }
    let report = uow.commit().await?;
    release_form_lock(form_id);
    info!(form = %form_id, deleted = report.deletes, "form deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::NewPage;
    use crate::storage::memory_operator;
    use crate::uow::has_form_lock;

    #[tokio::test]
    async fn unknown_form_leaves_no_lock_entry() {
        let op = memory_operator().unwrap();
        let missing = new_form_id();
        let err = page::add_page(&op, &EngineConfig::default(), &missing, NewPage::named("X"), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!has_form_lock(&missing));
    }

    #[tokio::test]
    async fn delete_releases_lock_entry() {
        let op = memory_operator().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let created = create_form(&op, &EngineConfig::default(), NewForm::new("Temporal", start, start))
            .await
            .unwrap();
        assert!(has_form_lock(&created.id));

        delete_form(&op, &created.id).await.unwrap();
        assert!(!has_form_lock(&created.id));
    }
}
