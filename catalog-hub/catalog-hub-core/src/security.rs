//! Read permissions: per-database ACL tables and the user records they are
//! checked against.

use crate::error::{QueryError, Result};
use crate::resource::normalize_resource_id;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Name of the file in a database's home folder that holds its ACL table.
pub const READ_ACLS_FILE_NAME: &str = "read_acls.json";

/// Members of this group may read anything, whatever its ACL says.
pub const ADMINISTRATORS_GROUP: &str = "/types/groups/Administrators";

/// The requesting user, as recorded by their thing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub groups: HashSet<String>,
    pub owns: HashSet<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self {
            id: normalize_resource_id(&id),
            ..Default::default()
        }
    }

    /// Builds a user from their stored thing, reading its optional `groups`
    /// and `owns` sets.
    pub fn from_thing(id: &str, thing: &Map<String, Value>) -> Self {
        Self {
            id: normalize_resource_id(id),
            groups: reference_set(thing.get("groups")),
            owns: reference_set(thing.get("owns")),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.groups
            .extend(groups.into_iter().map(|g| normalize_resource_id(g.as_ref())));
        self
    }

    pub fn with_owned<I, S>(mut self, owns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.owns
            .extend(owns.into_iter().map(|o| normalize_resource_id(o.as_ref())));
        self
    }

    pub fn is_administrator(&self) -> bool {
        self.groups.contains(ADMINISTRATORS_GROUP)
    }

    pub fn owns(&self, resource_id: &str) -> bool {
        self.owns.contains(&normalize_resource_id(resource_id))
    }

    fn matches_principal(&self, principal: &str) -> bool {
        principal == self.id || self.groups.contains(principal)
    }
}

/// Keys of a `{ "<ref>": "" }` map, or the strings of an array, as
/// normalized resource ids.
pub(crate) fn reference_set(value: Option<&Value>) -> HashSet<String> {
    match value {
        Some(Value::Object(map)) => map.keys().map(|k| normalize_resource_id(k)).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(normalize_resource_id)
            .collect(),
        _ => HashSet::new(),
    }
}

/// Resource id -> users and groups allowed to read it.
#[derive(Debug, Clone, Default)]
pub struct AccessControlLists {
    entries: HashMap<String, HashSet<String>>,
}

impl AccessControlLists {
    /// Loads `<home>/read_acls.json`. A database without the file restricts
    /// nothing.
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join(READ_ACLS_FILE_NAME);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no access control lists");
                return Ok(Self::default());
            }
            Err(e) => return Err(QueryError::storage(path, e)),
        };
        let table: Map<String, Value> =
            serde_json::from_slice(&data).map_err(|e| QueryError::malformed(&path, e))?;
        let acls = Self::from_table(&table);
        info!(path = %path.display(), entries = acls.len(), "loaded access control lists");
        Ok(acls)
    }

    pub fn from_table(table: &Map<String, Value>) -> Self {
        let entries = table
            .iter()
            .map(|(resource, principals)| {
                (
                    normalize_resource_id(resource),
                    reference_set(Some(principals)),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn entry(&self, resource_id: &str) -> Option<&HashSet<String>> {
        self.entries.get(&normalize_resource_id(resource_id))
    }

    /// This table's verdict alone. Resources without an entry are readable.
    pub fn permits(&self, resource_id: &str, user: &User) -> bool {
        let Some(principals) = self.entry(resource_id) else {
            return true;
        };
        if user.owns(resource_id) || user.is_administrator() {
            return true;
        }
        principals.iter().any(|p| user.matches_principal(p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
