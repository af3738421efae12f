//! Which users may fill which forms.

use crate::error::{FormError, Result};
use crate::form::{self, FormState};
use crate::ids;
use crate::storage;
use crate::users;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub id_usuario: String,
    pub id_formulario: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AssignmentRequest {
    pub usuario: String,
    pub formularios: Vec<String>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    pub ok: bool,
    pub asignados_nuevos: Vec<String>,
    pub ya_asignados: Vec<String>,
    pub removidos: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserOption {
    pub nombre_usuario: String,
    pub nombre: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FormOption {
    pub id: String,
    pub nombre: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignmentOptions {
    pub usuarios: Vec<UserOption>,
    pub formularios: Vec<FormOption>,
}

pub(crate) fn assignment_path(id: &str) -> String {
    format!("assignments/{}.json", id)
}

async fn require_user(op: &Operator, usuario: &str) -> Result<()> {
    match users::get_user(op, usuario).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Err(FormError::validation(
            "usuario",
            format!("user does not exist: {usuario}"),
        )),
        Err(e) => Err(e),
    }
}

async fn store(op: &Operator, usuario: &str, form_id: &str) -> Result<Assignment> {
    let assignment = Assignment {
        id: ids::uuid32(),
        id_usuario: usuario.to_string(),
        id_formulario: form_id.to_string(),
        created_at: Utc::now(),
    };
    storage::write_json(op, &assignment_path(&assignment.id), &assignment).await?;
    Ok(assignment)
}

/// Assigns a batch of forms to a user. With `replace`, assignments of that
/// user to forms outside the batch are removed.
pub async fn assign_forms(op: &Operator, request: AssignmentRequest) -> Result<AssignmentResult> {
    let usuario = request.usuario.trim();
    require_user(op, usuario).await?;

    let mut wanted: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for raw in &request.formularios {
        let id = raw.trim();
        if wanted.iter().any(|w| w == id) {
            continue;
        }
        match form::load_form_opt(op, id).await? {
            Some(f) => wanted.push(f.id),
            None => missing.push(id.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(FormError::validation(
            "formularios",
            format!("forms do not exist: {}", missing.join(", ")),
        ));
    }

    let current = list_assignments(op, Some(usuario)).await?;
    let assigned: HashSet<&str> = current.iter().map(|a| a.id_formulario.as_str()).collect();

    let mut result = AssignmentResult {
        ok: true,
        asignados_nuevos: Vec::new(),
        ya_asignados: Vec::new(),
        removidos: Vec::new(),
    };
    for form_id in &wanted {
        if assigned.contains(form_id.as_str()) {
            result.ya_asignados.push(form_id.clone());
        } else {
            store(op, usuario, form_id).await?;
            result.asignados_nuevos.push(form_id.clone());
        }
    }
    if request.replace {
        for stale in current.iter().filter(|a| !wanted.contains(&a.id_formulario)) {
            storage::delete_path(op, &assignment_path(&stale.id)).await?;
            result.removidos.push(stale.id_formulario.clone());
        }
    }

    info!(
        user = %usuario,
        nuevos = result.asignados_nuevos.len(),
        removidos = result.removidos.len(),
        "forms assigned"
    );
    Ok(result)
}

pub async fn create_assignment(op: &Operator, usuario: &str, form_id: &str) -> Result<Assignment> {
    require_user(op, usuario).await?;
    form::load_form(op, form_id).await?;
    let exists = list_assignments(op, Some(usuario))
        .await?
        .iter()
        .any(|a| a.id_formulario == form_id);
    if exists {
        return Err(FormError::conflict(
            "id_formulario",
            format!("form {form_id} already assigned to {usuario}"),
        ));
    }
    store(op, usuario, form_id).await
}

pub async fn delete_assignment(op: &Operator, id: &str) -> Result<()> {
    let path = assignment_path(id);
    if storage::read_json_opt::<Assignment>(op, &path).await?.is_none() {
        return Err(FormError::not_found("assignment", id));
    }
    storage::delete_path(op, &path).await
}

pub async fn list_assignments(op: &Operator, usuario: Option<&str>) -> Result<Vec<Assignment>> {
    let mut assignments: Vec<Assignment> = storage::list_json(op, "assignments/").await?;
    if let Some(usuario) = usuario {
        assignments.retain(|a| a.id_usuario == usuario);
    }
    assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(assignments)
}

/// Users matching `q_user` and the active forms they could be given.
pub async fn assignment_options(op: &Operator, q_user: Option<&str>) -> Result<AssignmentOptions> {
    let q = q_user.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());
    let usuarios = users::list_users(op)
        .await?
        .into_iter()
        .filter(|u| u.activo)
        .filter(|u| match &q {
            Some(q) => {
                u.nombre.to_lowercase().contains(q) || u.nombre_usuario.to_lowercase().contains(q)
            }
            None => true,
        })
        .map(|u| UserOption {
            nombre_usuario: u.nombre_usuario,
            nombre: u.nombre,
        })
        .collect();
    let formularios = form::list_forms(op, &form::FormFilter {
        ordering: Some("nombre".to_string()),
        ..Default::default()
    })
    .await?
    .into_iter()
    .filter(|f| f.estado == FormState::Active)
    .map(|f| FormOption {
        id: f.id,
        nombre: f.nombre,
    })
    .collect();
    Ok(AssignmentOptions {
        usuarios,
        formularios,
    })
}
