//! Maps request paths of the form
//! `/<application>/<database>/<resource...>[/schema|/summary]` to queries
//! against the configured databases.

use crate::config::ApplicationConfiguration;
use crate::database::Database;
use crate::error::{QueryError, Result};
use crate::query::{QueryContext, QueryKind, QueryParameters};
use crate::resource::{decode_path, is_valid_resource_id, normalize_resource_id};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Last path segment that asks for a resource's type definition.
pub const METADATA_RESOURCE_NAME: &str = "schema";

/// Last path segment that asks for a resource's summary.
pub const SUMMARY_RESOURCE_NAME: &str = "summary";

#[derive(Debug)]
pub enum Route {
    Query(QueryContext),
    /// The path doesn't name a known application and database.
    NotFound(String),
}

#[derive(Debug)]
pub struct Router {
    configuration: ApplicationConfiguration,
    databases: HashMap<String, Arc<Database>>,
}

impl Router {
    /// Opens the catalog database and the default database, whose parent is
    /// the catalog.
    pub fn from_configuration(configuration: ApplicationConfiguration) -> Result<Self> {
        configuration.validate()?;
        let catalog = Database::open(
            &configuration.application_name,
            &configuration.catalog_database_name,
            &configuration.catalog_database_path,
            None,
        )?;
        let default = Database::open(
            &configuration.application_name,
            &configuration.default_database_name,
            &configuration.default_database_path,
            Some(catalog.clone()),
        )?;
        let router = Self::new(configuration, [catalog, default]);
        info!(databases = router.databases.len(), "created a router");
        Ok(router)
    }

    pub fn new(
        configuration: ApplicationConfiguration,
        databases: impl IntoIterator<Item = Arc<Database>>,
    ) -> Self {
        let databases = databases
            .into_iter()
            .map(|db| (db.name().to_string(), db))
            .collect();
        Self {
            configuration,
            databases,
        }
    }

    pub fn database(&self, name: &str) -> Option<&Arc<Database>> {
        self.databases.get(name)
    }

    /// Builds the query a request path asks for. `user_id` falls back to the
    /// configured guest user.
    pub fn route(&self, path: &str, query: Option<&str>, user_id: Option<&str>) -> Result<Route> {
        let user_id = user_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.configuration.guest_user_id);
        debug!(path, user = user_id, "routing request");

        let components: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        let application_name = components.get(1).copied().unwrap_or_default();
        if application_name.is_empty() {
            return Ok(Route::NotFound("Missing application name.".to_string()));
        }
        if application_name != self.configuration.application_name {
            return Ok(Route::NotFound(format!(
                "There is no application named \"{application_name}\"."
            )));
        }
        let database_name = components.get(2).copied().unwrap_or_default();
        if database_name.is_empty() {
            return Ok(Route::NotFound("Missing database name.".to_string()));
        }
        let Some(database) = self.database(database_name) else {
            debug!(database = database_name, "no such database");
            return Ok(Route::NotFound(format!(
                "There is no database named \"{database_name}\"."
            )));
        };

        let mut segments = components.get(3..).unwrap_or_default();
        let kind = match segments.last().copied() {
            Some(METADATA_RESOURCE_NAME) => QueryKind::Metadata,
            Some(SUMMARY_RESOURCE_NAME) => QueryKind::Summary,
            _ => QueryKind::Object,
        };
        if kind != QueryKind::Object {
            segments = &segments[..segments.len() - 1];
        }
        let encoded = format!("/{}", segments.join("/")).replace('-', "%20");
        let resource_id = normalize_resource_id(&decode_path(&encoded));
        if !is_valid_resource_id(&resource_id) {
            return Err(QueryError::InvalidIdentifier(resource_id));
        }
        debug!(resource_id = %resource_id, ?kind, "routed request");

        let parameters =
            QueryParameters::from_query_string(query, self.configuration.collection_limit);
        let context = QueryContext::new(database.clone(), resource_id, user_id)
            .with_kind(kind)
            .with_parameters(parameters)
            .with_base_url(self.configuration.base_url.clone())
            .with_concurrency_limit(self.configuration.concurrency_limit);
        Ok(Route::Query(context))
    }
}
