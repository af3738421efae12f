use crate::error::{FormError, Result};
use opendal::Operator;
use serde::{Deserialize, Serialize};

/// Whether `add_page` insists on a page name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageNamePolicy {
    #[default]
    Required,
    /// Unnamed pages are called "Página {secuencia}".
    Optional,
}

/// How an unparseable `bump` flag is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BumpPolicy {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetDefaults {
    pub mode: String,
    pub cache_inline: bool,
    pub max_items_inline: u64,
}

impl Default for DatasetDefaults {
    fn default() -> Self {
        Self {
            mode: "pair".to_string(),
            cache_inline: true,
            max_items_inline: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub page_name_policy: PageNamePolicy,
    pub bump_policy: BumpPolicy,
    pub default_page_name: String,
    pub copy_suffix: String,
    pub dataset: DatasetDefaults,
    pub max_upload_bytes: usize,
    pub preview_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_name_policy: PageNamePolicy::Required,
            bump_policy: BumpPolicy::Lenient,
            default_page_name: "General".to_string(),
            copy_suffix: "_Copia".to_string(),
            dataset: DatasetDefaults::default(),
            max_upload_bytes: 10 * 1024 * 1024,
            preview_rows: 5,
        }
    }
}

impl EngineConfig {
    /// Parses a YAML document; keys left out keep their defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` from the store, falling back to defaults when absent.
    pub async fn load(op: &Operator, path: &str) -> Result<Self> {
        if !op.exists(path).await? {
            return Ok(Self::default());
        }
        let bytes = op.read(path).await?;
        let raw = String::from_utf8(bytes.to_vec())
            .map_err(|e| FormError::Config(format!("{path} is not valid UTF-8: {e}")))?;
        Self::from_yaml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.default_page_name.trim().is_empty() {
            return Err(FormError::Config(
                "default_page_name must not be empty".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(FormError::Config(
                "max_upload_bytes must be positive".to_string(),
            ));
        }
        if !matches!(self.dataset.mode.as_str(), "pair" | "single") {
            return Err(FormError::Config(format!(
                "dataset.mode must be pair or single, got {}",
                self.dataset.mode
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_only_named_keys() {
        let config = EngineConfig::from_yaml_str(
            "page_name_policy: optional\nbump_policy: strict\ndataset:\n  max_items_inline: 50\n",
        )
        .unwrap();
        assert_eq!(config.page_name_policy, PageNamePolicy::Optional);
        assert_eq!(config.bump_policy, BumpPolicy::Strict);
        assert_eq!(config.dataset.max_items_inline, 50);
        assert_eq!(config.dataset.mode, "pair");
        assert_eq!(config.default_page_name, "General");
    }

    #[test]
    fn rejects_unknown_dataset_mode() {
        let result = EngineConfig::from_yaml_str("dataset:\n  mode: triple\n");
        assert!(matches!(result, Err(FormError::Config(_))));
    }
}
