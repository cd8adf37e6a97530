//! Run options and credential resolution
//!
//! Everything a job needs to know is settled here once, before any network
//! call: which key file, which project, which collection, and which of the
//! destructive behaviors are switched on.

use membership_store::{ServiceAccountKey, MEMBERSHIPS_COLLECTION};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable holding the default credential file location
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variables consulted for the project id, in order
pub const PROJECT_ENV: [&str; 3] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT", "GCP_PROJECT"];

/// Configuration problems detected before a job starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Provide --serviceAccount=path or set GOOGLE_APPLICATION_CREDENTIALS env var")]
    MissingCredentials,
    #[error("serviceAccount file not found: {}", .0.display())]
    CredentialsNotFound(PathBuf),
    #[error("invalid service account file {}: {reason}", .path.display())]
    InvalidCredentials { path: PathBuf, reason: String },
    #[error("Firestore project id not configured; pass --projectId or set GOOGLE_CLOUD_PROJECT")]
    MissingProject,
}

/// Options shared by both jobs, validated once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub service_account_path: Option<PathBuf>,
    pub community_filter: Option<String>,
    pub project_id: Option<String>,
    pub collection: String,
    /// Compute and report only; no write or delete is issued
    pub preview: bool,
    /// Remove the source document after a successful move
    pub delete_source: bool,
    /// Allow a move to replace an existing document at the canonical key
    pub allow_overwrite: bool,
    /// Record per-document failures and keep going instead of aborting
    pub continue_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            service_account_path: None,
            community_filter: None,
            project_id: None,
            collection: MEMBERSHIPS_COLLECTION.to_string(),
            preview: false,
            delete_source: false,
            allow_overwrite: false,
            continue_on_error: false,
        }
    }
}

/// Locate and load the service account key.
///
/// An explicit path wins over `GOOGLE_APPLICATION_CREDENTIALS`.
pub fn resolve_service_account(explicit: Option<&Path>) -> Result<ServiceAccountKey, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os(CREDENTIALS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingCredentials)?,
    };

    if !path.is_file() {
        return Err(ConfigError::CredentialsNotFound(path));
    }

    debug!("Loading service account key from {}", path.display());
    ServiceAccountKey::from_file(&path).map_err(|e| ConfigError::InvalidCredentials {
        path,
        reason: format!("{:#}", e),
    })
}

/// Pick the project: explicit flag, then the key's own project, then the
/// environment.
pub fn resolve_project_id(
    explicit: Option<&str>,
    key: Option<&ServiceAccountKey>,
) -> Result<String, ConfigError> {
    if let Some(project_id) = explicit.filter(|p| !p.is_empty()) {
        return Ok(project_id.to_string());
    }
    if let Some(key) = key {
        return Ok(key.project_id.clone());
    }
    PROJECT_ENV
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .or_else(project_from_default_credentials)
        .ok_or(ConfigError::MissingProject)
}

// Application default credentials may point at a key that names the project.
fn project_from_default_credentials() -> Option<String> {
    let path = std::env::var_os(CREDENTIALS_ENV)?;
    ServiceAccountKey::from_file(path).ok().map(|key| key.project_id)
}
