use crate::error::{QueryError, Result};
use crate::query::{DEFAULT_BASE_URL, DEFAULT_COLLECTION_LIMIT};
use crate::throttle::DEFAULT_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_collection_limit() -> usize {
    DEFAULT_COLLECTION_LIMIT
}

fn default_concurrency_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_guest_user_id() -> String {
    "/types/users/guest".to_string()
}

/// Server settings, read from a JSON file with camelCase keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfiguration {
    #[serde(default)]
    pub application_name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub catalog_database_name: String,
    #[serde(default)]
    pub catalog_database_path: PathBuf,
    #[serde(default)]
    pub default_database_name: String,
    #[serde(default)]
    pub default_database_path: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Page size for collections when a request doesn't give one.
    #[serde(default = "default_collection_limit")]
    pub collection_limit: usize,
    /// Most references resolved at once while externalizing a collection.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// User id for requests that don't name a user.
    #[serde(default = "default_guest_user_id")]
    pub guest_user_id: String,
}

impl ApplicationConfiguration {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "reading configuration file");
        let data = std::fs::read(path).map_err(|e| QueryError::storage(path, e))?;
        let configuration: Self =
            serde_json::from_slice(&data).map_err(|e| QueryError::malformed(path, e))?;
        configuration.validate()?;
        debug!(?configuration, "finished reading configuration file");
        Ok(configuration)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let configuration: Self = serde_json::from_str(json)
            .map_err(|e| QueryError::malformed("<configuration>", e))?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Checks that every required value is present.
    pub fn validate(&self) -> Result<()> {
        required(
            &self.application_name,
            "The 'applicationName' configuration property must specify the application's name.",
        )?;
        required(
            &self.catalog_database_name,
            "The 'catalogDatabaseName' configuration property must specify the name of the catalog (master) database.",
        )?;
        required(
            &self.catalog_database_path.to_string_lossy(),
            "The 'catalogDatabasePath' configuration property must specify a path to the catalog database.",
        )?;
        required(
            &self.default_database_name,
            "The 'defaultDatabaseName' configuration property must specify the name of the default (guest) database.",
        )?;
        required(
            &self.default_database_path.to_string_lossy(),
            "The 'defaultDatabasePath' configuration property must specify a path to the default (guest) database.",
        )?;
        required(&self.guest_user_id, "The 'guestUserId' configuration property must not be empty.")?;
        if self.catalog_database_name == self.default_database_name {
            return Err(QueryError::configuration(
                "The catalog and default databases must have different names.",
            ));
        }
        Ok(())
    }
}

fn required(value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(QueryError::configuration(message));
    }
    Ok(())
}
