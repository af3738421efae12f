use crate::error::{FormError, Result};
use crate::field::{self, Field};
use crate::storage;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};

/// Container created alongside every field of class `group`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Group {
    pub id_grupo: String,
    pub id_campo_group: String,
    pub nombre: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldGroupLink {
    pub id_grupo: String,
    pub id_campo: String,
}

pub(crate) fn group_path(id_grupo: &str) -> String {
    format!("groups/{}.json", id_grupo)
}

pub(crate) fn links_dir(id_grupo: &str) -> String {
    format!("group_links/{}/", id_grupo)
}

pub(crate) fn link_path(id_grupo: &str, id_campo: &str) -> String {
    format!("{}{}.json", links_dir(id_grupo), id_campo)
}

pub(crate) async fn create_group(
    op: &Operator,
    id_grupo: &str,
    id_campo_group: &str,
    nombre: &str,
) -> Result<Group> {
    let group = Group {
        id_grupo: id_grupo.to_string(),
        id_campo_group: id_campo_group.to_string(),
        nombre: nombre.to_string(),
        created_at: Utc::now(),
    };
    storage::write_json(op, &group_path(id_grupo), &group).await?;
    Ok(group)
}

pub(crate) async fn link_field(op: &Operator, id_grupo: &str, id_campo: &str) -> Result<FieldGroupLink> {
    let link = FieldGroupLink {
        id_grupo: id_grupo.to_string(),
        id_campo: id_campo.to_string(),
    };
    storage::write_json(op, &link_path(id_grupo, id_campo), &link).await?;
    Ok(link)
}

pub async fn get_group(op: &Operator, id_grupo: &str) -> Result<Group> {
    storage::read_json_opt(op, &group_path(id_grupo))
        .await?
        .ok_or_else(|| FormError::not_found("group", id_grupo))
}

/// Groups whose name contains `q` (case-insensitive), sorted by name.
pub async fn list_groups(op: &Operator, q: Option<&str>) -> Result<Vec<Group>> {
    let mut groups: Vec<Group> = storage::list_json(op, "groups/").await?;
    if let Some(q) = q.map(str::to_lowercase).filter(|q| !q.is_empty()) {
        groups.retain(|g| g.nombre.to_lowercase().contains(&q));
    }
    groups.sort_by(|a, b| a.nombre.cmp(&b.nombre));
    Ok(groups)
}

pub async fn group_links(op: &Operator, id_grupo: &str) -> Result<Vec<FieldGroupLink>> {
    storage::list_json(op, &links_dir(id_grupo)).await
}

/// Fields linked to a group.
pub async fn group_members(op: &Operator, id_grupo: &str) -> Result<Vec<Field>> {
    get_group(op, id_grupo).await?;
    let mut members = Vec::new();
    for link in group_links(op, id_grupo).await? {
        members.push(field::load_field(op, &link.id_campo).await?);
    }
    Ok(members)
}
