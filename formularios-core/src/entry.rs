use crate::catalog;
use crate::error::{FormError, Result};
use crate::form;
use crate::integrity::{IntegrityPayload, IntegrityProvider};
use crate::storage;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::info;
use uuid::Uuid;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A point in time that may or may not carry an offset. Devices submit
/// wall-clock times without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timestamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::Aware(Utc::now().fixed_offset())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::Aware(dt));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Ok(Self::Naive(dt));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(Self::Naive(date.and_time(NaiveTime::MIN)));
        }
        Err(FormError::validation(
            "timestamp",
            format!("unrecognized timestamp: {raw}"),
        ))
    }

    /// Local wall-clock time. Naive values are taken as already local.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            Self::Naive(dt) => *dt,
            Self::Aware(dt) => dt.with_timezone(&Local).naive_local(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Aware(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

impl TryFrom<String> for Timestamp {
    type Error = FormError;

    fn try_from(raw: String) -> Result<Self> {
        Timestamp::parse(&raw)
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(dt: NaiveDateTime) -> Self {
        Self::Naive(dt)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Aware(dt.fixed_offset())
    }
}

fn default_status() -> String {
    "Completado".to_string()
}

/// One submission, with the form structure frozen at submission time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    #[serde(default)]
    pub id_usuario: Option<String>,
    pub form_id: String,
    #[serde(default)]
    pub index_version_id: Option<String>,
    #[serde(default)]
    pub form_name: String,
    #[serde(default)]
    pub filled_at_local: Option<Timestamp>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub fill_json: Value,
    #[serde(default)]
    pub form_json: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub integrity: IntegrityPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewEntry {
    #[serde(default)]
    pub id_usuario: Option<String>,
    pub fill_json: Value,
    #[serde(default)]
    pub filled_at_local: Option<Timestamp>,
    #[serde(default)]
    pub status: Option<String>,
}

fn entries_dir(form_id: &str) -> String {
    format!("entries/{}/", form_id)
}

fn entry_path(form_id: &str, entry_id: &str) -> String {
    format!("{}{}.json", entries_dir(form_id), entry_id)
}

/// Records a submission against the current structure of an active form.
pub async fn submit_entry<I: IntegrityProvider>(
    op: &Operator,
    integrity: &I,
    form_id: &str,
    new: NewEntry,
) -> Result<Entry> {
    let owner = form::load_form(op, form_id).await?;
    form::ensure_active(&owner)?;
    if !new.fill_json.is_object() {
        return Err(FormError::validation("fill_json", "fill_json must be an object"));
    }

    let form_json = catalog::form_structure(op, form_id).await?;
    let index_version_id = form_json
        .get("index_version_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let canonical = serde_json::to_string(&new.fill_json)?;
    let now = Timestamp::now();

    let entry = Entry {
        id: Uuid::new_v4().to_string(),
        id_usuario: new.id_usuario,
        form_id: owner.id.clone(),
        index_version_id,
        form_name: owner.nombre.clone(),
        filled_at_local: new.filled_at_local,
        status: new
            .status
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(default_status),
        fill_json: new.fill_json,
        form_json,
        created_at: now,
        updated_at: now,
        integrity: integrity.payload(&canonical),
    };
    storage::write_json(op, &entry_path(form_id, &entry.id), &entry).await?;
    info!(form = %form_id, entry = %entry.id, "entry submitted");
    Ok(entry)
}

/// Stores an entry produced elsewhere. Entries are never overwritten.
pub async fn save_entry(op: &Operator, entry: &Entry) -> Result<()> {
    if entry.form_id.is_empty() || entry.form_id.contains('/') {
        return Err(FormError::validation("form_id", "invalid form id"));
    }
    if entry.id.is_empty() || entry.id.contains('/') {
        return Err(FormError::validation("id", "invalid entry id"));
    }
    let path = entry_path(&entry.form_id, &entry.id);
    if op.exists(&path).await? {
        return Err(FormError::conflict("id", format!("entry already exists: {}", entry.id)));
    }
    storage::write_json(op, &path, entry).await
}

pub async fn get_entry(op: &Operator, form_id: &str, entry_id: &str) -> Result<Entry> {
    storage::read_json_opt(op, &entry_path(form_id, entry_id))
        .await?
        .ok_or_else(|| FormError::not_found("entry", entry_id))
}

/// Entries of a form, oldest first.
pub async fn list_entries(op: &Operator, form_id: &str) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = storage::list_json(op, &entries_dir(form_id)).await?;
    entries.sort_by_key(|e| e.created_at.naive_local());
    Ok(entries)
}

/// Ids of every form with at least one stored entry.
pub async fn list_entry_form_ids(op: &Operator) -> Result<Vec<String>> {
    let mut ids = storage::list_child_dirs(op, "entries/").await?;
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aware_naive_and_date_only() {
        assert!(matches!(
            Timestamp::parse("2024-03-01T10:00:00+02:00").unwrap(),
            Timestamp::Aware(_)
        ));
        let naive = Timestamp::parse("2024-03-01 10:15:30").unwrap();
        assert_eq!(
            naive,
            Timestamp::Naive(
                NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(10, 15, 30)
                    .unwrap()
            )
        );
        assert!(matches!(Timestamp::parse("2024-03-01").unwrap(), Timestamp::Naive(_)));
        assert!(Timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn serializes_as_strings() {
        let ts = Timestamp::parse("2024-03-01T10:00:00Z").unwrap();
        let json = serde_json::to_value(ts).unwrap();
        assert!(json.is_string());
        let back: Timestamp = serde_json::from_value(json).unwrap();
        assert_eq!(back, ts);
    }
}
