use crate::error::{FormError, Result};
use crate::form;
use crate::ids;
use crate::storage;
use crate::uow::form_lock;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One generation of a form's page/field structure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexVersion {
    pub id_index_version: String,
    pub formulario_id: String,
    pub ordinal: u32,
    pub fecha_creacion: DateTime<Utc>,
}

/// Append-only record of a version ever created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VersionHistory {
    pub id_formulario: String,
    pub id_index_version: String,
    pub ordinal: u32,
    pub fecha: DateTime<Utc>,
}

fn version_path(form_id: &str, version_id: &str) -> String {
    format!("{}/versions/{}.json", form::form_dir(form_id), version_id)
}

fn history_dir(form_id: &str) -> String {
    format!("history/versions/{}/", form_id)
}

fn history_path(form_id: &str, ordinal: u32, version_id: &str) -> String {
    format!("{}{:06}_{}.json", history_dir(form_id), ordinal, version_id)
}

/// Creates the next version of `form_id`.
pub async fn create_version(op: &Operator, form_id: &str) -> Result<IndexVersion> {
    form::load_form(op, form_id).await?;
    let lock = form_lock(form_id);
    let _guard = lock.lock().await;
    create_version_locked(op, form_id).await
}

/// Caller must hold the form lock.
pub(crate) async fn create_version_locked(op: &Operator, form_id: &str) -> Result<IndexVersion> {
    let last_ordinal = list_history(op, form_id)
        .await?
        .iter()
        .map(|h| h.ordinal)
        .max()
        .unwrap_or(0);
    let now = Utc::now();
    let version = IndexVersion {
        id_index_version: ids::uuid32(),
        formulario_id: form_id.to_string(),
        ordinal: last_ordinal + 1,
        fecha_creacion: now,
    };
    let history = VersionHistory {
        id_formulario: form_id.to_string(),
        id_index_version: version.id_index_version.clone(),
        ordinal: version.ordinal,
        fecha: now,
    };

    storage::write_json(
        op,
        &version_path(form_id, &version.id_index_version),
        &version,
    )
    .await?;
    storage::write_json(
        op,
        &history_path(form_id, history.ordinal, &history.id_index_version),
        &history,
    )
    .await?;

    info!(form = %form_id, version = %version.id_index_version, ordinal = version.ordinal, "index version created");
    Ok(version)
}

/// Live versions of a form, oldest first.
pub async fn list_versions(op: &Operator, form_id: &str) -> Result<Vec<IndexVersion>> {
    let dir = format!("{}/versions/", form::form_dir(form_id));
    let mut versions: Vec<IndexVersion> = storage::list_json(op, &dir).await?;
    versions.sort_by_key(|v| v.ordinal);
    Ok(versions)
}

pub async fn latest_version(op: &Operator, form_id: &str) -> Result<Option<IndexVersion>> {
    Ok(list_versions(op, form_id).await?.pop())
}

pub async fn get_version(op: &Operator, form_id: &str, version_id: &str) -> Result<IndexVersion> {
    let version_id = ids::uuid32_no_dashes(version_id)?;
    storage::read_json_opt(op, &version_path(form_id, &version_id))
        .await?
        .ok_or_else(|| FormError::not_found("index version", version_id))
}

/// Every version ever created for `form_id`, including those of a deleted form.
pub async fn list_history(op: &Operator, form_id: &str) -> Result<Vec<VersionHistory>> {
    let mut history: Vec<VersionHistory> = storage::list_json(op, &history_dir(form_id)).await?;
    history.sort_by_key(|h| h.ordinal);
    Ok(history)
}
