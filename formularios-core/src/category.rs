use crate::error::{FormError, Result};
use crate::form;
use crate::storage;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
    pub id: String,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewCategory {
    pub nombre: String,
    #[serde(default)]
    pub descripcion: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CategoryPatch {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
}

fn category_path(id: &str) -> String {
    format!("categories/{}.json", id)
}

fn clean_name(raw: &str) -> Result<String> {
    let nombre = raw.trim();
    if nombre.is_empty() {
        return Err(FormError::validation("nombre", "name is required"));
    }
    Ok(nombre.to_string())
}

async fn ensure_unique_name(op: &Operator, nombre: &str, except_id: Option<&str>) -> Result<()> {
    let taken = list_categories(op).await?.into_iter().any(|c| {
        c.nombre.eq_ignore_ascii_case(nombre) && Some(c.id.as_str()) != except_id
    });
    if taken {
        return Err(FormError::conflict(
            "nombre",
            format!("category already exists: {nombre}"),
        ));
    }
    Ok(())
}

pub async fn create_category(op: &Operator, new: NewCategory) -> Result<Category> {
    let nombre = clean_name(&new.nombre)?;
    ensure_unique_name(op, &nombre, None).await?;

    let category = Category {
        id: Uuid::new_v4().to_string(),
        nombre,
        descripcion: new.descripcion.unwrap_or_default(),
        created_at: Utc::now(),
    };
    storage::write_json(op, &category_path(&category.id), &category).await?;
    info!(category = %category.id, "category created");
    Ok(category)
}

pub async fn list_categories(op: &Operator) -> Result<Vec<Category>> {
    let mut categories: Vec<Category> = storage::list_json(op, "categories/").await?;
    categories.sort_by(|a, b| a.nombre.to_lowercase().cmp(&b.nombre.to_lowercase()));
    Ok(categories)
}

pub async fn get_category(op: &Operator, id: &str) -> Result<Category> {
    storage::read_json_opt(op, &category_path(id))
        .await?
        .ok_or_else(|| FormError::not_found("category", id))
}

pub async fn update_category(op: &Operator, id: &str, patch: CategoryPatch) -> Result<Category> {
    let mut category = get_category(op, id).await?;
    if let Some(nombre) = patch.nombre {
        let nombre = clean_name(&nombre)?;
        ensure_unique_name(op, &nombre, Some(id)).await?;
        category.nombre = nombre;
    }
    if let Some(descripcion) = patch.descripcion {
        category.descripcion = descripcion;
    }
    storage::write_json(op, &category_path(id), &category).await?;
    Ok(category)
}

/// Deletes a category that no form references.
pub async fn delete_category(op: &Operator, id: &str) -> Result<()> {
    get_category(op, id).await?;
    let linked = form::load_all_forms(op)
        .await?
        .iter()
        .any(|f| f.categoria.as_deref() == Some(id));
    if linked {
        return Err(FormError::conflict(
            "categoria",
            "category is still linked to forms",
        ));
    }
    storage::delete_path(op, &category_path(id)).await?;
    info!(category = %id, "category deleted");
    Ok(())
}
