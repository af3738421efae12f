//! Deep copy of a form and its latest version tree.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::field;
use crate::form::{self, Form};
use crate::group;
use crate::ids;
use crate::page;
use crate::uow::{form_lock, UnitOfWork};
use crate::version;
use chrono::Utc;
use opendal::Operator;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Copies `form_id` under a new identity. The copy is named `new_name`, or
/// the source name plus the configured copy suffix when absent or blank.
pub async fn duplicate_form(
    op: &Operator,
    config: &EngineConfig,
    form_id: &str,
    new_name: Option<&str>,
) -> Result<Form> {
    let source = form::load_form(op, form_id).await?;
    form::ensure_active(&source)?;

    let nombre = match new_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => format!("{}{}", source.nombre, config.copy_suffix),
    };
    let now = Utc::now();
    let copy = Form {
        id: form::new_form_id(),
        nombre,
        created_at: now,
        updated_at: now,
        ..source.clone()
    };

    let mut uow = UnitOfWork::begin(op);
    uow.stage_json(form::form_path(&copy.id), &copy)?;
    let source_id = source.id.clone();
    let target_id = copy.id.clone();
    let page_name = config.default_page_name.clone();
    uow.on_commit(format!("form-clone:{}", copy.id), move |op| async move {
        clone_version_tree(&op, &source_id, &target_id, &page_name).await
    });
    uow.commit().await?;

    info!(source = %source.id, copy = %copy.id, nombre = %copy.nombre, "form duplicated");
    Ok(copy)
}

async fn clone_version_tree(op: &Operator, source_id: &str, target_id: &str, page_name: &str) -> Result<()> {
    let source_pages = match version::latest_version(op, source_id).await? {
        Some(v) => page::pages_for_version(op, source_id, &v.id_index_version).await?,
        None => Vec::new(),
    };

    let lock = form_lock(target_id);
    let _guard = lock.lock().await;

    if version::latest_version(op, target_id).await?.is_some() {
        debug!(form = %target_id, "clone already populated");
        return Ok(());
    }
    let target_version = version::create_version_locked(op, target_id).await?;

    if source_pages.is_empty() {
        page::insert_page_locked(
            op,
            target_id,
            &target_version.id_index_version,
            Some(page_name),
            "",
            None,
        )
        .await?;
        return Ok(());
    }

    let mut tree = Vec::with_capacity(source_pages.len());
    let mut group_ids: HashMap<String, String> = HashMap::new();
    for source_page in source_pages {
        let mut fields = Vec::new();
        for binding in page::current_bindings(op, &source_page).await? {
            let source_field = field::load_field(op, &binding.id_campo).await?;
            if let Some(id_group) = source_field.group_id() {
                group_ids.insert(id_group.to_string(), ids::uuid32());
            }
            fields.push((source_field, binding.sequence));
        }
        tree.push((source_page, fields));
    }

    for (source_page, fields) in tree {
        let mut target_page = page::insert_page_locked(
            op,
            target_id,
            &target_version.id_index_version,
            Some(source_page.nombre.as_str()),
            &source_page.descripcion,
            Some(source_page.secuencia),
        )
        .await?;
        if fields.is_empty() {
            continue;
        }

        let mut copied = Vec::with_capacity(fields.len());
        for (source_field, sequence) in fields {
            let mut draft = source_field.clone();
            if let Some(new_group) = source_field.group_id().and_then(|g| group_ids.get(g)) {
                if let Some(config) = draft.config.as_object_mut() {
                    config.insert("id_group".to_string(), Value::String(new_group.clone()));
                }
            }
            // Groups owned by another form are shared, not copied.
            if let Some(new_group) = draft.grupo.as_deref().and_then(|g| group_ids.get(g)) {
                draft.grupo = Some(new_group.clone());
            }

            let campo = field::clone_field(op, &draft).await?;
            if let Some(id_group) = campo.group_id() {
                group::create_group(op, id_group, &campo.id_campo, &campo.etiqueta).await?;
            }
            if let Some(id_grupo) = campo.grupo.as_deref() {
                group::link_field(op, id_grupo, &campo.id_campo).await?;
            }
            copied.push((campo.id_campo, sequence));
        }
        page::write_page_version(op, &mut target_page, copied).await?;
    }
    Ok(())
}
