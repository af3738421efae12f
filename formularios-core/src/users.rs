//! Users and their bearer tokens.

use crate::error::{FormError, Result};
use crate::storage;
use crate::uow::UnitOfWork;
use chrono::{DateTime, Duration, Utc};
use opendal::Operator;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub nombre_usuario: String,
    pub nombre: String,
    pub correo: String,
    pub activo: bool,
    pub acceso_web: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the user may hold tokens at all.
    pub fn can_authenticate(&self) -> bool {
        self.activo && self.acceso_web
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewUser {
    pub nombre_usuario: String,
    pub nombre: String,
    pub correo: String,
    #[serde(default = "default_true")]
    pub activo: bool,
    #[serde(default)]
    pub acceso_web: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UserPatch {
    pub nombre: Option<String>,
    pub correo: Option<String>,
    pub activo: Option<bool>,
    pub acceso_web: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub refresh_token: String,
    pub nombre_usuario: String,
    pub expires: DateTime<Utc>,
    pub scope: String,
}

fn username_regex() -> &'static Regex {
    static USERNAME: OnceLock<Regex> = OnceLock::new();
    USERNAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.@+-]{1,150}$").expect("username regex must compile"))
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex must compile"))
}

fn user_path(username: &str) -> String {
    format!("users/{}.json", username)
}

fn tokens_dir(username: &str) -> String {
    format!("tokens/{}/", username)
}

fn clean_email(raw: &str) -> Result<String> {
    let correo = raw.trim().to_lowercase();
    if !email_regex().is_match(&correo) {
        return Err(FormError::validation("correo", format!("invalid email: {raw}")));
    }
    Ok(correo)
}

async fn ensure_email_free(op: &Operator, correo: &str, except: Option<&str>) -> Result<()> {
    let taken = list_users(op)
        .await?
        .iter()
        .any(|u| u.correo == correo && Some(u.nombre_usuario.as_str()) != except);
    if taken {
        return Err(FormError::conflict("correo", format!("email already in use: {correo}")));
    }
    Ok(())
}

pub async fn create_user(op: &Operator, new: NewUser) -> Result<User> {
    let nombre_usuario = new.nombre_usuario.trim().to_string();
    if !username_regex().is_match(&nombre_usuario) {
        return Err(FormError::validation(
            "nombre_usuario",
            format!("invalid username: {nombre_usuario}"),
        ));
    }
    let nombre = new.nombre.trim().to_string();
    if nombre.is_empty() {
        return Err(FormError::validation("nombre", "name is required"));
    }
    let correo = clean_email(&new.correo)?;

    if op.exists(&user_path(&nombre_usuario)).await? {
        return Err(FormError::conflict(
            "nombre_usuario",
            format!("username already in use: {nombre_usuario}"),
        ));
    }
    ensure_email_free(op, &correo, None).await?;

    let now = Utc::now();
    let user = User {
        nombre_usuario,
        nombre,
        correo,
        activo: new.activo,
        acceso_web: new.acceso_web,
        created_at: now,
        updated_at: now,
    };
    storage::write_json(op, &user_path(&user.nombre_usuario), &user).await?;
    info!(user = %user.nombre_usuario, "user created");
    Ok(user)
}

pub async fn get_user(op: &Operator, username: &str) -> Result<User> {
    if !username_regex().is_match(username) {
        return Err(FormError::not_found("user", username));
    }
    storage::read_json_opt(op, &user_path(username))
        .await?
        .ok_or_else(|| FormError::not_found("user", username))
}

pub async fn list_users(op: &Operator) -> Result<Vec<User>> {
    let mut users: Vec<User> = storage::list_json(op, "users/").await?;
    users.sort_by(|a, b| a.nombre_usuario.cmp(&b.nombre_usuario));
    Ok(users)
}

/// Applies a partial update. Turning `activo` or `acceso_web` off revokes
/// every token of the user once the update is stored.
pub async fn update_user(op: &Operator, username: &str, patch: UserPatch) -> Result<User> {
    let before = get_user(op, username).await?;
    let mut user = before.clone();

    if let Some(nombre) = patch.nombre {
        let nombre = nombre.trim().to_string();
        if nombre.is_empty() {
            return Err(FormError::validation("nombre", "name is required"));
        }
        user.nombre = nombre;
    }
    if let Some(correo) = patch.correo {
        let correo = clean_email(&correo)?;
        ensure_email_free(op, &correo, Some(username)).await?;
        user.correo = correo;
    }
    if let Some(activo) = patch.activo {
        user.activo = activo;
    }
    if let Some(acceso_web) = patch.acceso_web {
        user.acceso_web = acceso_web;
    }
    user.updated_at = Utc::now();

    let lost_access =
        (before.activo && !user.activo) || (before.acceso_web && !user.acceso_web);

    let mut uow = UnitOfWork::begin(op);
    uow.stage_json(user_path(username), &user)?;
    if lost_access {
        let target = username.to_string();
        uow.on_commit(format!("revoke-tokens:{username}"), move |op| async move {
            revoke_tokens(&op, &target).await.map(|_| ())
        });
    }
    uow.commit().await?;
    Ok(user)
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Issues an access/refresh token pair for a user allowed to authenticate.
pub async fn issue_token(op: &Operator, username: &str, scope: &str, ttl: Duration) -> Result<AccessToken> {
    let user = get_user(op, username).await?;
    if !user.can_authenticate() {
        return Err(FormError::validation("usuario", "user is inactive or has no web access"));
    }
    let token = AccessToken {
        token: random_token(),
        refresh_token: random_token(),
        nombre_usuario: user.nombre_usuario.clone(),
        expires: Utc::now() + ttl,
        scope: scope.to_string(),
    };
    storage::write_json(
        op,
        &format!("{}{}.json", tokens_dir(username), token.token),
        &token,
    )
    .await?;
    Ok(token)
}

pub async fn list_tokens(op: &Operator, username: &str) -> Result<Vec<AccessToken>> {
    storage::list_json(op, &tokens_dir(username)).await
}

/// Deletes every token of a user; returns how many were removed.
pub async fn revoke_tokens(op: &Operator, username: &str) -> Result<usize> {
    let paths = storage::list_json_paths(op, &tokens_dir(username)).await?;
    for path in &paths {
        storage::delete_path(op, path).await?;
    }
    info!(user = %username, revoked = paths.len(), "tokens revoked");
    Ok(paths.len())
}
