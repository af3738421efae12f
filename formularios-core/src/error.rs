//! Error types for the forms core library.

use thiserror::Error;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, FormError>;

#[derive(Error, Debug)]
pub enum FormError {
    /// Missing or malformed attribute, keyed by the offending field.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid page id: {0}")]
    InvalidId(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Mutation or read attempted on a suspended form.
    #[error("form is suspended: {0}")]
    Locked(String),

    #[error("{field}: {message}")]
    Conflict { field: String, message: String },

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("export error: {0}")]
    Export(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FormError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// HTTP status an outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidId(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::UnsupportedMedia(_) => 415,
            Self::Locked(_) => 423,
            Self::Storage(_) | Self::Serialization(_) | Self::Export(_) | Self::Config(_) => 500,
        }
    }

    /// Key used for field-keyed error bodies.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } | Self::Conflict { field, .. } => Some(field),
            Self::InvalidId(_) => Some("id_pagina"),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::Storage(e) if e.kind() == opendal::ErrorKind::NotFound)
    }
}

impl From<rust_xlsxwriter::XlsxError> for FormError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<csv::Error> for FormError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<zip::result::ZipError> for FormError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<serde_yaml::Error> for FormError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(FormError::validation("clase", "class missing").status_code(), 400);
        assert_eq!(FormError::InvalidId("x".into()).status_code(), 400);
        assert_eq!(FormError::not_found("form", "abc").status_code(), 404);
        assert_eq!(FormError::conflict("nombre", "taken").status_code(), 409);
        assert_eq!(FormError::UnsupportedMedia("txt".into()).status_code(), 415);
        assert_eq!(FormError::Locked("f".into()).status_code(), 423);
    }

    #[test]
    fn field_key_is_exposed() {
        let err = FormError::validation("grupo", "group does not exist");
        assert_eq!(err.field(), Some("grupo"));
        assert_eq!(err.to_string(), "grupo: group does not exist");
    }
}
