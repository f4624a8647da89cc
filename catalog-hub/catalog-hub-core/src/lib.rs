pub mod config;
pub mod database;
pub mod error;
pub mod query;
pub mod resource;
pub mod router;
pub mod security;
pub mod storage;
pub mod throttle;
pub mod types;

pub use config::ApplicationConfiguration;
pub use database::Database;
pub use error::{QueryError, Result};
pub use query::{execute, query, QueryContext, QueryKind, QueryOutcome, QueryParameters, QueryResultsHandler};
pub use router::{Route, Router};
pub use security::User;
