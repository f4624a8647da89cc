use crate::database::Database;
use crate::error::{QueryError, Result};
use crate::resource::is_valid_resource_id;
use crate::security::User;
use crate::storage::EntryKind;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::debug;

use super::QueryContext;

/// Name of files that hold a thing's properties.
pub const THING_FILE_NAME: &str = "thing.json";

/// Where a resource was found along a database chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The stored properties of a thing.
    Found(Map<String, Value>),
    /// A plain file, such as an attached document.
    File(PathBuf),
    NotFound { cause: String },
}

/// Looks for a resource in `database`, then in each of its ancestors.
///
/// Folders are read through their `file_name` (`thing.json` or `type.json`)
/// using the owning database's file cache. Nothing here checks permissions.
pub async fn resolve(
    database: &Database,
    resource_id: &str,
    file_name: &str,
    user_id: &str,
) -> Result<Resolution> {
    let mut cause = format!("\"{resource_id}\" was not found");
    for db in database.chain() {
        let path = db.path_of(resource_id);
        debug!(
            database = db.name(),
            path = %path.display(),
            user = user_id,
            "querying resource"
        );
        let kind = db
            .files()
            .stat(&path)
            .await
            .map_err(|e| QueryError::storage(&path, e))?;
        match kind {
            None => {
                cause = format!("\"{resource_id}\" does not exist in \"{}\"", db.name());
            }
            Some(EntryKind::File) => {
                debug!(database = db.name(), path = %path.display(), "returning file");
                return Ok(Resolution::File(path));
            }
            Some(EntryKind::Directory) => {
                let file = path.join(file_name);
                if !db.cache().contains(&file) {
                    let found = db
                        .files()
                        .stat(&file)
                        .await
                        .map_err(|e| QueryError::storage(&file, e))?;
                    if found != Some(EntryKind::File) {
                        cause = format!("\"{resource_id}\" has no {file_name} in \"{}\"", db.name());
                        continue;
                    }
                }
                let data = db.cache().fetch(&file).await?;
                let thing: Map<String, Value> =
                    serde_json::from_slice(&data).map_err(|e| QueryError::malformed(&file, e))?;
                return Ok(Resolution::Found(thing));
            }
        }
    }
    debug!(resource_id, database = database.name(), "resource not found");
    Ok(Resolution::NotFound { cause })
}

/// Reads the requesting user's own record, without permission checks.
pub(crate) async fn fetch_user(context: &QueryContext) -> Result<User> {
    let user_id = context.user_id.as_str();
    if !is_valid_resource_id(user_id) {
        return Err(QueryError::UnknownUser(user_id.to_string()));
    }
    debug!(user = user_id, "fetching user");
    match resolve(&context.database, user_id, THING_FILE_NAME, user_id).await? {
        Resolution::Found(thing) => Ok(User::from_thing(user_id, &thing)),
        _ => Err(QueryError::UnknownUser(user_id.to_string())),
    }
}
