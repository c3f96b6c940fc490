//! Seams to the key/value configuration store and the token issuer.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{StorageError, StorageResult};

/// Key/value configuration store consulted for per-environment overrides.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
}

/// Fixed settings, mainly for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }
}

/// No overrides; every lookup falls back to the configured defaults.
pub struct NoSettings;

#[async_trait]
impl SettingsSource for NoSettings {
    async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }
}

/// Reads `sharepoint_site_url_production` from `SHAREPOINT_SITE_URL_PRODUCTION`.
pub struct EnvSettings;

#[async_trait]
impl SettingsSource for EnvSettings {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match std::env::var(key.to_ascii_uppercase()) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(StorageError::Config(format!("{key}: {e}"))),
        }
    }
}

/// Supplies bearer tokens for the document library API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> StorageResult<String>;
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> StorageResult<String> {
        if self.0.trim().is_empty() {
            return Err(StorageError::Token("no access token configured".to_string()));
        }
        Ok(self.0.clone())
    }
}
