use crate::error::{FormError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use opendal::Operator;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

const HMAC_PATH: &str = "hmac.json";

/// Checksum and signature stored with every submitted entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IntegrityPayload {
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub signature: String,
}

pub trait IntegrityProvider {
    fn checksum(&self, content: &str) -> String;
    fn signature(&self, content: &str) -> String;

    fn payload(&self, content: &str) -> IntegrityPayload {
        IntegrityPayload {
            checksum: self.checksum(content),
            signature: self.signature(content),
        }
    }
}

pub struct FakeIntegrityProvider;

impl IntegrityProvider for FakeIntegrityProvider {
    fn checksum(&self, content: &str) -> String {
        format!("mock-checksum-{}", content.len())
    }
    fn signature(&self, content: &str) -> String {
        format!("mock-signature-{}", content.len())
    }
}

pub struct RealIntegrityProvider {
    key_id: String,
    secret: Vec<u8>,
}

impl RealIntegrityProvider {
    pub fn new(key_id: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            secret,
        }
    }

    /// Provider keyed with the store's HMAC material, created on first use.
    pub async fn from_store(op: &Operator) -> Result<Self> {
        let (key_id, secret) = load_hmac_material(op).await?;
        Ok(Self::new(key_id, secret))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verify(&self, content: &str, payload: &IntegrityPayload) -> bool {
        self.checksum(content) == payload.checksum && self.signature(content) == payload.signature
    }
}

impl IntegrityProvider for RealIntegrityProvider {
    fn checksum(&self, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn signature(&self, content: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(content.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[derive(Serialize, Deserialize)]
struct HmacMaterial {
    hmac_key_id: String,
    hmac_key: String,
    last_rotation: String,
}

/// Reads `(key_id, secret)` from `hmac.json`, generating it when missing.
pub async fn load_hmac_material(op: &Operator) -> Result<(String, Vec<u8>)> {
    if !op.exists(HMAC_PATH).await? {
        let mut key_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut key_bytes);
        let material = HmacMaterial {
            hmac_key_id: format!("key-{}", Uuid::new_v4().simple()),
            hmac_key: general_purpose::STANDARD.encode(key_bytes),
            last_rotation: Utc::now().to_rfc3339(),
        };
        crate::storage::write_json(op, HMAC_PATH, &material).await?;
        info!(key_id = %material.hmac_key_id, "hmac key generated");
    }
    let material: HmacMaterial = crate::storage::read_json(op, HMAC_PATH).await?;
    if material.hmac_key.is_empty() {
        return Err(FormError::Config("hmac_key missing in hmac.json".to_string()));
    }
    let secret = general_purpose::STANDARD
        .decode(&material.hmac_key)
        .map_err(|e| FormError::Config(format!("hmac_key is not valid base64: {e}")))?;
    Ok((material.hmac_key_id, secret))
}
