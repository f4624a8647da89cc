//! Queries against a database chain.
//!
//! A [`QueryContext`] names a database, a resource and the requesting user.
//! [`execute`] resolves it to exactly one [`QueryOutcome`]; [`query`] does the
//! same and hands the outcome to a [`QueryResultsHandler`].

mod externalize;
mod resolver;
mod summary;

pub use resolver::{resolve, Resolution, THING_FILE_NAME};

use crate::database::Database;
use crate::error::{QueryError, Result};
use crate::resource::{decode_path, is_valid_resource_id};
use crate::security::User;
use crate::throttle::{ThrottledWorker, DEFAULT_LIMIT};
use crate::types::TYPE_FILE_NAME;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Default page size for collections.
pub const DEFAULT_COLLECTION_LIMIT: usize = 10;

/// Base URL used for hyperlinks when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryKind {
    /// The thing itself, with its references externalized.
    #[default]
    Object,
    /// The type definition (`type.json`) stored at the resource.
    Metadata,
    /// A count-only summary of the thing.
    Summary,
}

impl QueryKind {
    /// File that holds a resource's properties for this kind of query.
    pub fn file_name(self) -> &'static str {
        match self {
            QueryKind::Metadata => TYPE_FILE_NAME,
            QueryKind::Object | QueryKind::Summary => THING_FILE_NAME,
        }
    }
}

/// Options taken from a request's query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub limit: usize,
    pub offset: usize,
    /// Properties to summarize, for summary queries.
    pub properties: Option<Vec<String>>,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            limit: DEFAULT_COLLECTION_LIMIT,
            offset: 0,
            properties: None,
        }
    }
}

impl QueryParameters {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            ..Default::default()
        }
    }

    /// Parses `limit`, `offset` and `properties` from a query string.
    /// Values that aren't positive integers leave the defaults in place.
    pub fn from_query_string(query: Option<&str>, default_limit: usize) -> Self {
        let mut parameters = Self::with_limit(default_limit);
        let Some(query) = query else {
            return parameters;
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_path(&value.replace('+', " "));
            match key {
                "limit" => {
                    if let Some(limit) = positive(&value) {
                        parameters.limit = limit;
                    }
                }
                "offset" => {
                    if let Some(offset) = positive(&value) {
                        parameters.offset = offset;
                    }
                }
                "properties" => {
                    let properties: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                    parameters.properties = (!properties.is_empty()).then_some(properties);
                }
                _ => {}
            }
        }
        parameters
    }
}

fn positive(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

/// Everything needed to answer one request. Built per request and never
/// shared.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub database: Arc<Database>,
    pub resource_id: String,
    pub user_id: String,
    pub kind: QueryKind,
    pub parameters: QueryParameters,
    /// Replace references with hyperlink stubs and collections. Turned off
    /// when only raw stored properties are wanted.
    pub externalize: bool,
    pub base_url: String,
    pub worker: ThrottledWorker,
}

impl QueryContext {
    pub fn new(database: Arc<Database>, resource_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            database,
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            kind: QueryKind::Object,
            parameters: QueryParameters::default(),
            externalize: true,
            base_url: DEFAULT_BASE_URL.to_string(),
            worker: ThrottledWorker::new(DEFAULT_LIMIT),
        }
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_parameters(mut self, parameters: QueryParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.worker = ThrottledWorker::new(limit);
        self
    }

    pub fn without_externalization(mut self) -> Self {
        self.externalize = false;
        self
    }

    /// The hyperlink for the queried resource.
    pub fn href(&self) -> String {
        self.database.href(&self.base_url, &self.resource_id)
    }
}

/// The single result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    NotFound { cause: String },
    /// The resource is a plain file stored at this path.
    File(PathBuf),
    Object(Value),
    Forbidden,
}

impl QueryOutcome {
    /// Hands this outcome to the matching handler operation.
    pub fn dispatch<H: QueryResultsHandler + ?Sized>(self, context: &QueryContext, handler: &mut H) {
        match self {
            QueryOutcome::NotFound { cause } => handler.resource_not_found(context, &cause),
            QueryOutcome::File(path) => handler.return_file(context, &path),
            QueryOutcome::Object(object) => handler.return_object(context, object),
            QueryOutcome::Forbidden => handler.user_cannot_read(context),
        }
    }
}

/// Receives the outcome of [`query`]. Exactly one operation is called per
/// query.
pub trait QueryResultsHandler {
    fn resource_not_found(&mut self, context: &QueryContext, cause: &str);

    fn return_file(&mut self, context: &QueryContext, path: &Path);

    fn return_object(&mut self, context: &QueryContext, object: Value);

    fn user_cannot_read(&mut self, context: &QueryContext);
}

/// Runs the query and reports its outcome to `handler`.
///
/// Errors (an invalid identifier, an unknown user, unreadable or corrupt
/// stored data) are returned instead and no handler operation is called.
pub async fn query<H>(context: &QueryContext, handler: &mut H) -> Result<()>
where
    H: QueryResultsHandler + Send + ?Sized,
{
    let outcome = execute(context).await?;
    outcome.dispatch(context, handler);
    Ok(())
}

/// Resolves the query to its outcome.
pub async fn execute(context: &QueryContext) -> Result<QueryOutcome> {
    let database = &context.database;
    let resource_id = context.resource_id.as_str();
    info!(
        resource_id,
        database = database.name(),
        user = %context.user_id,
        "querying resource"
    );
    if !is_valid_resource_id(resource_id) {
        return Err(QueryError::InvalidIdentifier(resource_id.to_string()));
    }

    let user = resolver::fetch_user(context).await?;
    if !database.can_read(resource_id, &user) {
        debug!(resource_id, user = %user.id, "user cannot read resource");
        return Ok(QueryOutcome::Forbidden);
    }

    let thing = match resolve(database, resource_id, context.kind.file_name(), &user.id).await? {
        Resolution::NotFound { cause } => return Ok(QueryOutcome::NotFound { cause }),
        Resolution::File(path) => return Ok(QueryOutcome::File(path)),
        Resolution::Found(thing) => thing,
    };

    let mut object = if context.kind == QueryKind::Summary {
        summary::summarize(context, &user, thing).await?
    } else if context.externalize {
        externalize::externalize_thing(context, &user, resource_id, thing).await?
    } else {
        let mut thing = thing;
        mark_type(database, resource_id, &mut thing);
        thing
    };
    decorate(context, &mut object);
    Ok(QueryOutcome::Object(Value::Object(object)))
}

/// Adds `isType: true` when the resource is a type known to the database or
/// its parent.
fn mark_type(database: &Database, resource_id: &str, object: &mut Map<String, Value>) {
    if database.is_type(resource_id) {
        object.insert("isType".to_string(), Value::Bool(true));
    }
}

/// Adds the returned object's own `href`, `id` and `path`.
fn decorate(context: &QueryContext, object: &mut Map<String, Value>) {
    let path = object
        .get("path")
        .filter(|p| !p.is_null())
        .cloned()
        .unwrap_or_else(|| Value::String(context.resource_id.clone()));
    object.insert("href".to_string(), Value::String(context.href()));
    object.insert("id".to_string(), Value::String(context.resource_id.clone()));
    object.insert("path".to_string(), path);
}
