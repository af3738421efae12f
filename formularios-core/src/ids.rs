use crate::error::{FormError, Result};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn dashed_uuid_regex() -> &'static Regex {
    static DASHED: OnceLock<Regex> = OnceLock::new();
    DASHED.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("dashed uuid regex must compile")
    })
}

fn hex32_regex() -> &'static Regex {
    static HEX32: OnceLock<Regex> = OnceLock::new();
    HEX32.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{32}$").expect("hex32 regex must compile"))
}

/// Fresh 32-char lowercase hex identifier.
pub fn uuid32() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn uuid32_from(id: &Uuid) -> String {
    id.simple().to_string()
}

/// Normalizes a page/version identifier to 32 lowercase hex chars.
///
/// Accepts a canonical dashed UUID or an already compact one.
pub fn uuid32_no_dashes(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if dashed_uuid_regex().is_match(trimmed) {
        return Ok(trimmed.replace('-', "").to_lowercase());
    }
    if hex32_regex().is_match(trimmed) {
        return Ok(trimmed.to_lowercase());
    }
    Err(FormError::InvalidId(raw.to_string()))
}
