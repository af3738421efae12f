use crate::config::{BumpPolicy, EngineConfig, PageNamePolicy};
use crate::error::{FormError, Result};
use crate::field::{self, Field};
use crate::form;
use crate::ids;
use crate::storage;
use crate::uow::form_lock;
use crate::version;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page {
    pub id_pagina: String,
    pub formulario_id: String,
    pub index_version_id: String,
    pub secuencia: u32,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub id_pagina_version_actual: Option<String>,
}

/// History of the version a page was attached to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PagePointer {
    pub id_pagina: String,
    pub id_index_version: String,
    pub fecha: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageFieldBinding {
    pub id_campo: String,
    pub id_pagina_version: String,
    pub sequence: i64,
}

/// Immutable snapshot of the fields bound to a page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageVersion {
    pub id_pagina_version: String,
    pub id_pagina: String,
    pub fecha_creacion: DateTime<Utc>,
    #[serde(default)]
    pub campos: Vec<PageFieldBinding>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewPage {
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub descripcion: Option<String>,
}

impl NewPage {
    pub fn named(nombre: impl Into<String>) -> Self {
        Self {
            nombre: Some(nombre.into()),
            descripcion: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageCreated {
    pub ok: bool,
    pub id_pagina: String,
}

/// A field as bound to a page, with its position.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageField {
    #[serde(flatten)]
    pub campo: Field,
    pub sequence: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageDetail {
    #[serde(flatten)]
    pub page: Page,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campos: Option<Vec<PageField>>,
}

#[derive(Serialize, Deserialize)]
struct PageIndexEntry {
    formulario_id: String,
}

fn pages_dir(form_id: &str) -> String {
    format!("{}/pages/", form::form_dir(form_id))
}

fn page_path(form_id: &str, page_id: &str) -> String {
    format!("{}{}.json", pages_dir(form_id), page_id)
}

fn page_index_path(page_id: &str) -> String {
    format!("page_index/{}.json", page_id)
}

fn page_versions_dir(page_id: &str) -> String {
    format!("page_versions/{}/", page_id)
}

fn page_version_path(page_id: &str, page_version_id: &str) -> String {
    format!("{}{}.json", page_versions_dir(page_id), page_version_id)
}

fn pointer_dir(form_id: &str) -> String {
    format!("history/pages/{}/", form_id)
}

/// Reads a `bump` flag.
///
/// Truthy: `1 true yes on si sí`. Falsy: missing, empty, `0 false no off`.
/// Anything else is falsy under [`BumpPolicy::Lenient`] and rejected under
/// [`BumpPolicy::Strict`].
pub fn parse_bump(raw: Option<&str>, policy: BumpPolicy) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "si" | "sí" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => match policy {
            BumpPolicy::Lenient => {
                debug!(bump = %other, "unrecognized bump value treated as false");
                Ok(false)
            }
            BumpPolicy::Strict => Err(FormError::validation(
                "bump",
                format!("invalid bump value: {other}"),
            )),
        },
    }
}

/// Appends a page to a form, optionally bumping its index version first.
pub async fn add_page(
    op: &Operator,
    config: &EngineConfig,
    form_id: &str,
    new: NewPage,
    bump: Option<&str>,
) -> Result<PageCreated> {
    let bump = parse_bump(bump, config.bump_policy)?;
    let nombre = new
        .nombre
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    if nombre.is_none() && config.page_name_policy == PageNamePolicy::Required {
        return Err(FormError::validation("nombre", "page name is required"));
    }

    form::load_form(op, form_id).await?;
    let lock = form_lock(form_id);
    let _guard = lock.lock().await;

    let owner = form::load_form(op, form_id).await?;
    form::ensure_active(&owner)?;

    // A form whose bootstrap never ran gets version 1 and its default page first.
    let latest = form::bootstrap_form_locked(op, form_id, &config.default_page_name).await?;
    let target = if bump {
        version::create_version_locked(op, form_id).await?
    } else {
        latest
    };

    let page = insert_page_locked(
        op,
        form_id,
        &target.id_index_version,
        nombre.as_deref(),
        new.descripcion.as_deref().unwrap_or_default(),
        None,
    )
    .await?;

    Ok(PageCreated {
        ok: true,
        id_pagina: page.id_pagina,
    })
}

/// Writes a new page into a version. `secuencia` defaults to the next free
/// slot. Caller must hold the form lock.
pub(crate) async fn insert_page_locked(
    op: &Operator,
    form_id: &str,
    version_id: &str,
    nombre: Option<&str>,
    descripcion: &str,
    secuencia: Option<u32>,
) -> Result<Page> {
    let secuencia = match secuencia {
        Some(s) => s,
        None => {
            pages_for_version(op, form_id, version_id)
                .await?
                .iter()
                .map(|p| p.secuencia)
                .max()
                .unwrap_or(0)
                + 1
        }
    };
    let nombre = match nombre {
        Some(n) => n.to_string(),
        None => format!("Página {secuencia}"),
    };

    let page = Page {
        id_pagina: ids::uuid32(),
        formulario_id: form_id.to_string(),
        index_version_id: version_id.to_string(),
        secuencia,
        nombre,
        descripcion: descripcion.to_string(),
        id_pagina_version_actual: None,
    };
    let pointer = PagePointer {
        id_pagina: page.id_pagina.clone(),
        id_index_version: version_id.to_string(),
        fecha: Utc::now(),
    };

    storage::write_json(op, &page_path(form_id, &page.id_pagina), &page).await?;
    storage::write_json(
        op,
        &page_index_path(&page.id_pagina),
        &PageIndexEntry {
            formulario_id: form_id.to_string(),
        },
    )
    .await?;
    storage::write_json(
        op,
        &format!("{}{}_{}.json", pointer_dir(form_id), page.id_pagina, version_id),
        &pointer,
    )
    .await?;

    info!(form = %form_id, page = %page.id_pagina, secuencia, "page added");
    Ok(page)
}

/// Loads a page by its normalized id regardless of the owner form's state.
pub(crate) async fn load_page(op: &Operator, page_id: &str) -> Result<Page> {
    let index: PageIndexEntry = storage::read_json_opt(op, &page_index_path(page_id))
        .await?
        .ok_or_else(|| FormError::not_found("page", page_id))?;
    storage::read_json_opt(op, &page_path(&index.formulario_id, page_id))
        .await?
        .ok_or_else(|| FormError::not_found("page", page_id))
}

pub async fn get_page(op: &Operator, page_id: &str, include_campos: bool) -> Result<PageDetail> {
    let page_id = ids::uuid32_no_dashes(page_id)?;
    let page = load_page(op, &page_id).await?;
    let owner = form::load_form(op, &page.formulario_id).await?;
    form::ensure_active(&owner)?;

    let campos = if include_campos {
        Some(page_fields(op, &page).await?)
    } else {
        None
    };
    Ok(PageDetail { page, campos })
}

/// Fields of the page's current page version, ordered by sequence.
pub async fn page_fields(op: &Operator, page: &Page) -> Result<Vec<PageField>> {
    let mut campos = Vec::new();
    for binding in current_bindings(op, page).await? {
        let campo = field::load_field(op, &binding.id_campo).await?;
        campos.push(PageField {
            campo,
            sequence: binding.sequence,
        });
    }
    Ok(campos)
}

/// Pages of one form ordered by version then sequence, or of every form.
pub async fn list_pages(op: &Operator, form_id: Option<&str>) -> Result<Vec<Page>> {
    let form_ids = match form_id {
        Some(id) => vec![id.to_string()],
        None => form::load_all_forms(op)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect(),
    };

    let mut pages = Vec::new();
    for form_id in form_ids {
        let ordinals: HashMap<String, u32> = version::list_versions(op, &form_id)
            .await?
            .into_iter()
            .map(|v| (v.id_index_version, v.ordinal))
            .collect();
        let mut form_pages: Vec<Page> = storage::list_json(op, &pages_dir(&form_id)).await?;
        form_pages.sort_by_key(|p| {
            (
                ordinals.get(&p.index_version_id).copied().unwrap_or(u32::MAX),
                p.secuencia,
            )
        });
        pages.extend(form_pages);
    }
    Ok(pages)
}

pub async fn pages_for_version(op: &Operator, form_id: &str, version_id: &str) -> Result<Vec<Page>> {
    let mut pages: Vec<Page> = storage::list_json(op, &pages_dir(form_id)).await?;
    pages.retain(|p| p.index_version_id == version_id);
    pages.sort_by_key(|p| p.secuencia);
    Ok(pages)
}

pub async fn page_history(op: &Operator, form_id: &str) -> Result<Vec<PagePointer>> {
    let mut pointers: Vec<PagePointer> = storage::list_json(op, &pointer_dir(form_id)).await?;
    pointers.sort_by_key(|p| p.fecha);
    Ok(pointers)
}

pub async fn list_page_versions(op: &Operator, page_id: &str) -> Result<Vec<PageVersion>> {
    let mut versions: Vec<PageVersion> =
        storage::list_json(op, &page_versions_dir(page_id)).await?;
    versions.sort_by_key(|v| v.fecha_creacion);
    Ok(versions)
}

/// Bindings of the page's current page version; empty when it has none.
pub(crate) async fn current_bindings(op: &Operator, page: &Page) -> Result<Vec<PageFieldBinding>> {
    let Some(version_id) = page.id_pagina_version_actual.as_deref() else {
        return Ok(Vec::new());
    };
    let version: PageVersion = storage::read_json_opt(op, &page_version_path(&page.id_pagina, version_id))
        .await?
        .ok_or_else(|| FormError::not_found("page version", version_id))?;
    let mut campos = version.campos;
    campos.sort_by_key(|b| b.sequence);
    Ok(campos)
}

/// Snapshots `campos` as a new page version and moves the page's pointer to it.
pub(crate) async fn write_page_version(
    op: &Operator,
    page: &mut Page,
    campos: Vec<(String, i64)>,
) -> Result<PageVersion> {
    let id_pagina_version = ids::uuid32();
    let version = PageVersion {
        id_pagina_version: id_pagina_version.clone(),
        id_pagina: page.id_pagina.clone(),
        fecha_creacion: Utc::now(),
        campos: campos
            .into_iter()
            .map(|(id_campo, sequence)| PageFieldBinding {
                id_campo,
                id_pagina_version: id_pagina_version.clone(),
                sequence,
            })
            .collect(),
    };
    storage::write_json(
        op,
        &page_version_path(&page.id_pagina, &id_pagina_version),
        &version,
    )
    .await?;

    page.id_pagina_version_actual = Some(id_pagina_version);
    storage::write_json(op, &page_path(&page.formulario_id, &page.id_pagina), page).await?;
    debug!(page = %page.id_pagina, bindings = version.campos.len(), "page version written");
    Ok(version)
}

/// Documents outside the form directory that belong to `page`.
pub(crate) async fn page_paths(op: &Operator, page: &Page) -> Result<Vec<String>> {
    let mut paths = vec![page_index_path(&page.id_pagina)];
    paths.extend(storage::list_json_paths(op, &page_versions_dir(&page.id_pagina)).await?);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "YES", "on", "si", "Sí"] {
            assert!(parse_bump(Some(raw), BumpPolicy::Lenient).unwrap(), "{raw}");
        }
        for raw in ["0", "false", "no", "off", ""] {
            assert!(!parse_bump(Some(raw), BumpPolicy::Strict).unwrap(), "{raw}");
        }
        assert!(!parse_bump(None, BumpPolicy::Strict).unwrap());
    }

    #[test]
    fn unparseable_bump_depends_on_policy() {
        assert!(!parse_bump(Some("abc"), BumpPolicy::Lenient).unwrap());
        let err = parse_bump(Some("abc"), BumpPolicy::Strict).unwrap_err();
        assert_eq!(err.field(), Some("bump"));
    }
}
