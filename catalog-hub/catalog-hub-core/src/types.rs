//! Type definitions: the schemas stored in `type.json` files under a
//! database's `types` folder.
//!
//! A type's supertype is its parent path (`/types/papers/journals` extends
//! `/types/papers`), ending at `/types`. Facets add extra property tables a
//! type's things may also satisfy.

use crate::error::{QueryError, Result};
use crate::resource::{qualified_reference, resolve_reference, strip_reference_marks, unqualify};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name of files that define a type of thing.
pub const TYPE_FILE_NAME: &str = "type.json";

/// Resource id of the folder that holds every type.
pub const TYPES_ROOT: &str = "/types";

/// The root of the supertype chain: the type all type definitions extend.
pub const ROOT_TYPE: &str = "types";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// Name of the property on referenced things that points back here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl TypeDefinition {
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| QueryError::malformed(path, e))
    }

    /// References to this type's facets, in stored order.
    pub fn facet_references(&self) -> impl Iterator<Item = &str> {
        self.facets.iter().flat_map(|facets| facets.keys().map(String::as_str))
    }

    /// References to the types nested under this one, in stored order.
    pub fn child_references(&self) -> impl Iterator<Item = &str> {
        self.children.iter().flat_map(|children| children.keys().map(String::as_str))
    }

    /// The property of this type (not its facets) declared as the inverse of
    /// `property`.
    pub fn inverse_of(&self, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, definition)| definition.inverse.as_deref() == Some(property))
            .map(|(name, _)| name.as_str())
    }
}

/// Finds the property declared as the inverse of `property`, looking at the
/// type's own property table first and then at each facet's, in order.
///
/// `facet` resolves a facet reference to its definition.
pub fn inverse_property_of<'a, F>(
    definition: &'a TypeDefinition,
    property: &str,
    facet: F,
) -> Option<String>
where
    F: Fn(&str) -> Option<&'a TypeDefinition>,
{
    if let Some(name) = definition.inverse_of(property) {
        return Some(name.to_string());
    }
    definition
        .facet_references()
        .filter_map(|reference| facet(strip_reference_marks(reference)))
        .find_map(|facet| facet.inverse_of(property).map(str::to_string))
}

/// The supertype of a type id: the id with its last segment removed.
///
/// `/types` has no supertype as an ordinary type, but a type definition
/// (`is_type_definition`) tested against `/types` continues to [`ROOT_TYPE`].
pub fn supertype_of(type_id: &str, is_type_definition: bool) -> Option<String> {
    if type_id == ROOT_TYPE {
        return None;
    }
    if type_id == TYPES_ROOT {
        return is_type_definition.then(|| ROOT_TYPE.to_string());
    }
    match type_id.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(type_id[..i].to_string()),
    }
}

/// Every type a database defines, keyed by qualified reference
/// (`</application/database/types/...>`).
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    application_name: String,
    database_name: String,
    types: HashMap<String, TypeDefinition>,
}

impl TypeTable {
    pub fn new(application_name: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            database_name: database_name.into(),
            types: HashMap::new(),
        }
    }

    /// Scans `<home>/types` for `type.json` files and loads every type they
    /// declare as children.
    pub fn load(home: &Path, application_name: &str, database_name: &str) -> Result<Self> {
        let mut table = Self::new(application_name, database_name);
        let root = home.join(TYPES_ROOT.trim_start_matches('/'));
        if !root.is_dir() {
            info!(database = database_name, "the database does not define any new types of things");
            return Ok(table);
        }

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&root).to_path_buf();
                QueryError::storage(path, e.into())
            })?;
            if !entry.file_type().is_file() || entry.file_name() != TYPE_FILE_NAME {
                continue;
            }
            let folder = entry.path().parent().unwrap_or(&root);
            let owner_id = resource_id_of(home, folder);
            debug!(path = %entry.path().display(), "reading type definition file");
            let definition = read_definition(entry.path())?;
            for child in definition.child_references() {
                let child = unqualify(child, application_name, database_name);
                let Some(child_id) = resolve_reference(&owner_id, &format!("<{child}>")) else {
                    continue;
                };
                let child_path = home
                    .join(child_id.trim_start_matches('/'))
                    .join(TYPE_FILE_NAME);
                let child_definition = read_definition(&child_path)?;
                table.insert(&child_id, child_definition);
            }
        }

        info!(
            database = database_name,
            count = table.len(),
            "retrieved types"
        );
        Ok(table)
    }

    pub fn insert(&mut self, type_id: &str, definition: TypeDefinition) {
        let key = qualified_reference(&self.application_name, &self.database_name, type_id);
        self.types.insert(key, definition);
    }

    /// Looks a type up by its bare resource id.
    pub fn get(&self, type_id: &str) -> Option<&TypeDefinition> {
        self.types.get(&qualified_reference(
            &self.application_name,
            &self.database_name,
            strip_reference_marks(type_id),
        ))
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.get(type_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn read_definition(path: &Path) -> Result<TypeDefinition> {
    let data = std::fs::read(path).map_err(|e| QueryError::storage(path, e))?;
    TypeDefinition::parse(path, &data)
}

/// Resource id of a folder inside a database home, e.g. `/types/papers`.
fn resource_id_of(home: &Path, folder: &Path) -> String {
    let relative = folder.strip_prefix(home).unwrap_or(folder);
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(home: &Path, id: &str, value: Value) {
        let folder = home.join(id.trim_start_matches('/'));
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(TYPE_FILE_NAME), value.to_string()).unwrap();
    }

    #[test]
    fn supertype_chain() {
        assert_eq!(supertype_of("/types/papers/journals", false).as_deref(), Some("/types/papers"));
        assert_eq!(supertype_of("/types/papers", false).as_deref(), Some("/types"));
        assert_eq!(supertype_of("/types", false), None);
        assert_eq!(supertype_of("/types", true).as_deref(), Some(ROOT_TYPE));
        assert_eq!(supertype_of(ROOT_TYPE, true), None);
    }

    #[test]
    fn inverse_lookup_falls_back_to_facets() {
        let facet: TypeDefinition = serde_json::from_value(json!({
            "properties": { "taggedWith": { "inverse": "tags", "type": {"</types/tags>": ""} } }
        }))
        .unwrap();
        let papers: TypeDefinition = serde_json::from_value(json!({
            "properties": {
                "authors": { "inverse": "wrote", "required": true },
                "title": { "type": "text" }
            },
            "facets": { "</types/facets/taggable>": "" }
        }))
        .unwrap();

        let resolve = |id: &str| (id == "/types/facets/taggable").then_some(&facet);
        assert_eq!(inverse_property_of(&papers, "wrote", resolve).as_deref(), Some("authors"));
        assert_eq!(inverse_property_of(&papers, "tags", resolve).as_deref(), Some("taggedWith"));
        assert_eq!(inverse_property_of(&papers, "nothing", resolve), None);
        assert!(papers.properties["authors"].required);
    }

    #[test]
    fn loads_children_declared_by_type_files() {
        let home = tempfile::tempdir().unwrap();
        write(home.path(), "/types", json!({
            "name": "Types",
            "children": { "</app/catalog/types/notes>": "", "<papers>": "" }
        }));
        write(home.path(), "/types/notes", json!({ "name": "Notes" }));
        write(home.path(), "/types/papers", json!({
            "name": "Papers",
            "children": { "</types/papers/journals>": "" }
        }));
        write(home.path(), "/types/papers/journals", json!({ "name": "Journals" }));

        let table = TypeTable::load(home.path(), "app", "catalog").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("/types/notes").unwrap().name.as_deref(), Some("Notes"));
        assert!(table.contains("</types/papers/journals>"));
        assert!(table.get("</types/papers>").is_some());
        assert!(!table.contains("/types"));
    }

    #[test]
    fn missing_types_folder_is_empty() {
        let home = tempfile::tempdir().unwrap();
        let table = TypeTable::load(home.path(), "app", "db").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_type_file_is_fatal() {
        let home = tempfile::tempdir().unwrap();
        let folder = home.path().join("types");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(TYPE_FILE_NAME), b"{ not json").unwrap();
        let err = TypeTable::load(home.path(), "app", "db").unwrap_err();
        assert!(matches!(err, QueryError::MalformedData { .. }));
    }
}
