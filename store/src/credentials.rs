//! Service account key files
//!
//! Keys are parsed and checked when loaded so a bad path or a truncated file
//! is reported before any network call is made.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google service account key (the JSON downloaded from the console)
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(skip)]
    pub path: PathBuf,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Read and validate a key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow::anyhow!("service account file not found: {}", path.display()));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service account file {}", path.display()))?;
        let mut key = Self::from_json(&raw)
            .with_context(|| format!("invalid service account file {}", path.display()))?;
        key.path = path.to_path_buf();
        Ok(key)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(raw)?;
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<()> {
        if !self.key_type.is_empty() && self.key_type != "service_account" {
            return Err(anyhow::anyhow!(
                "expected a service_account key, found type {:?}",
                self.key_type
            ));
        }
        for (name, value) in [
            ("project_id", &self.project_id),
            ("private_key", &self.private_key),
            ("client_email", &self.client_email),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("missing required field {}", name));
            }
        }
        Ok(())
    }
}
