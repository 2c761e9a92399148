//! Backend project settings, read once by the composition root.

use std::fmt;

use url::Url;

use crate::error::ConfigError;

pub const API_KEY_VAR: &str = "POSTBOX_API_KEY";
pub const DATABASE_URL_VAR: &str = "POSTBOX_DATABASE_URL";
pub const AUTH_DOMAIN_VAR: &str = "POSTBOX_AUTH_DOMAIN";
pub const PROJECT_ID_VAR: &str = "POSTBOX_PROJECT_ID";
pub const STORAGE_BUCKET_VAR: &str = "POSTBOX_STORAGE_BUCKET";
pub const MESSAGING_SENDER_ID_VAR: &str = "POSTBOX_MESSAGING_SENDER_ID";
pub const APP_ID_VAR: &str = "POSTBOX_APP_ID";

/// Everything a client needs to reach one backend project.
///
/// Only `database_url` and `storage_bucket` are required. The remaining
/// identifiers are carried through to request headers and logs.
#[derive(Clone)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub database_url: Url,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: String,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

impl BackendConfig {
    /// Read the seven `POSTBOX_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let raw_url = get(DATABASE_URL_VAR).ok_or(ConfigError::Missing {
            var: DATABASE_URL_VAR,
        })?;
        let database_url = raw_url
            .parse::<Url>()
            .map_err(|source| ConfigError::InvalidUrl {
                var: DATABASE_URL_VAR,
                source,
            })?;

        let storage_bucket = get(STORAGE_BUCKET_VAR).ok_or(ConfigError::Missing {
            var: STORAGE_BUCKET_VAR,
        })?;

        Ok(Self {
            api_key: get(API_KEY_VAR),
            database_url,
            auth_domain: get(AUTH_DOMAIN_VAR),
            project_id: get(PROJECT_ID_VAR),
            storage_bucket,
            messaging_sender_id: get(MESSAGING_SENDER_ID_VAR),
            app_id: get(APP_ID_VAR),
        })
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("database_url", &self.database_url.as_str())
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("messaging_sender_id", &self.messaging_sender_id)
            .field("app_id", &self.app_id)
            .finish()
    }
}
