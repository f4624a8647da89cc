//! HTTP API layer: turns request paths into catalog queries and query
//! outcomes into responses.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use catalog_hub_core::{
    query, QueryContext, QueryError, QueryResultsHandler, Route, Router as DatabaseRouter,
};
use serde_json::Value;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, warn};

/// Media type of every JSON object the server returns.
pub const CONTENT_TYPE: &str = "application/vnd.sqwerl-v0.1+json";

/// The requesting user, from the `X-User-Id` header. Requests without one
/// are answered for the configured guest user.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self { user_id })
    }
}

/// Shared application state containing the configured databases.
#[derive(Clone)]
pub struct AppState {
    pub databases: Arc<DatabaseRouter>,
}

pub fn router(databases: Arc<DatabaseRouter>) -> Router {
    let app_state = AppState { databases };
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/{*path}", get(get_resource))
        .with_state(app_state)
}

async fn get_resource(State(state): State<AppState>, auth: AuthContext, request: Request) -> Response {
    let uri = request.uri();
    let route = match state
        .databases
        .route(uri.path(), uri.query(), auth.user_id.as_deref())
    {
        Ok(route) => route,
        Err(e) => return error_response(e),
    };
    let context = match route {
        Route::Query(context) => context,
        Route::NotFound(message) => return (StatusCode::NOT_FOUND, message).into_response(),
    };

    let mut responder = Responder::default();
    match query(&context, &mut responder).await {
        Ok(()) => responder.into_response(request).await,
        Err(e) => error_response(e),
    }
}

fn error_response(error: QueryError) -> Response {
    let status = match &error {
        QueryError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownUser(_) => StatusCode::UNAUTHORIZED,
        QueryError::MalformedData { .. }
        | QueryError::Storage { .. }
        | QueryError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(%error, "query failed");
    } else {
        warn!(%error, "rejected query");
    }
    (status, error.to_string()).into_response()
}

/// What the query asked the server to send back.
#[derive(Debug)]
enum Reply {
    NotFound(String),
    File(PathBuf),
    Object(Value),
    Forbidden,
}

#[derive(Debug, Default)]
struct Responder {
    reply: Option<Reply>,
}

impl QueryResultsHandler for Responder {
    fn resource_not_found(&mut self, context: &QueryContext, cause: &str) {
        debug!(resource_id = %context.resource_id, cause, "resource not found");
        self.reply = Some(Reply::NotFound(format!(
            "There is no resource with the ID \"{}\".",
            context.resource_id
        )));
    }

    fn return_file(&mut self, _context: &QueryContext, path: &Path) {
        self.reply = Some(Reply::File(path.to_path_buf()));
    }

    fn return_object(&mut self, _context: &QueryContext, object: Value) {
        self.reply = Some(Reply::Object(object));
    }

    fn user_cannot_read(&mut self, context: &QueryContext) {
        debug!(resource_id = %context.resource_id, user = %context.user_id, "user cannot read");
        self.reply = Some(Reply::Forbidden);
    }
}

impl Responder {
    /// Attachments are streamed from disk; the request is passed along so
    /// range and conditional headers are honoured.
    async fn into_response(self, request: Request) -> Response {
        match self.reply {
            Some(Reply::NotFound(message)) => (StatusCode::NOT_FOUND, message).into_response(),
            Some(Reply::Forbidden) => StatusCode::FORBIDDEN.into_response(),
            Some(Reply::Object(object)) => match serde_json::to_vec(&object) {
                Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
                Err(e) => {
                    error!(%e, "could not serialize query result");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            Some(Reply::File(path)) => {
                debug!(path = %path.display(), "streaming file");
                match ServeFile::new(&path).oneshot(request).await {
                    Ok(response) => response.into_response(),
                    Err(never) => match never {},
                }
            }
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}
