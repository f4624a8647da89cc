//! A named database: a folder of things, its type table, its ACL table, and
//! an optional parent that answers whatever this database doesn't hold.

use crate::error::{QueryError, Result};
use crate::resource::{encode_href, normalize_resource_id, strip_reference_marks};
use crate::security::{AccessControlLists, User};
use crate::storage::{FileCache, FileSystem, LocalFileSystem};
use crate::types::{inverse_property_of, supertype_of, TypeDefinition, TypeTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct Database {
    application_name: String,
    name: String,
    home: PathBuf,
    parent: Option<Arc<Database>>,
    files: Arc<dyn FileSystem>,
    cache: FileCache,
    read_acls: AccessControlLists,
    types: TypeTable,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("application_name", &self.application_name)
            .field("name", &self.name)
            .field("home", &self.home)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("types", &self.types.len())
            .field("read_acls", &self.read_acls.len())
            .finish()
    }
}

impl Database {
    /// Opens the database stored under `home` on the local disk, loading its
    /// type and ACL tables.
    pub fn open(
        application_name: &str,
        name: &str,
        home: impl Into<PathBuf>,
        parent: Option<Arc<Database>>,
    ) -> Result<Arc<Self>> {
        Self::with_file_system(application_name, name, home, parent, Arc::new(LocalFileSystem))
    }

    /// Same as [`Database::open`], reading things through `files`. Type and
    /// ACL tables are always loaded from the local disk.
    pub fn with_file_system(
        application_name: &str,
        name: &str,
        home: impl Into<PathBuf>,
        parent: Option<Arc<Database>>,
        files: Arc<dyn FileSystem>,
    ) -> Result<Arc<Self>> {
        let home = home.into();
        if application_name.trim().is_empty() {
            return Err(QueryError::configuration("An application name is required."));
        }
        if name.trim().is_empty() {
            return Err(QueryError::configuration("A database name is required."));
        }
        if !home.is_dir() {
            return Err(QueryError::configuration(format!(
                "The database \"{name}\" has no home folder at \"{}\".",
                home.display()
            )));
        }

        let types = TypeTable::load(&home, application_name, name)?;
        let read_acls = AccessControlLists::load(&home)?;
        info!(
            database = name,
            home = %home.display(),
            parent = parent.as_ref().map(|p| p.name()),
            "opened database"
        );

        Ok(Arc::new(Self {
            application_name: application_name.to_string(),
            name: name.to_string(),
            home,
            parent,
            cache: FileCache::new(files.clone()),
            files,
            read_acls,
            types,
        }))
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn parent(&self) -> Option<&Arc<Database>> {
        self.parent.as_ref()
    }

    pub fn files(&self) -> &dyn FileSystem {
        self.files.as_ref()
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn read_acls(&self) -> &AccessControlLists {
        &self.read_acls
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// This database followed by each of its ancestors.
    pub fn chain(&self) -> impl Iterator<Item = &Database> {
        std::iter::successors(Some(self), |db| db.parent.as_deref())
    }

    /// Where a resource would be stored in this database.
    pub fn path_of(&self, resource_id: &str) -> PathBuf {
        let id = normalize_resource_id(resource_id);
        let relative = id.trim_start_matches('/');
        if relative.is_empty() {
            self.home.clone()
        } else {
            self.home.join(relative)
        }
    }

    /// The hyperlink clients use to fetch a resource of this database.
    pub fn href(&self, base_url: &str, resource_id: &str) -> String {
        let base_url = base_url.trim_end_matches('/');
        let id = strip_reference_marks(resource_id);
        encode_href(&format!("{base_url}/{}/{}{id}", self.application_name, self.name))
    }

    /// The definition of a type, from this database or the nearest ancestor
    /// that defines it.
    pub fn type_definition_of(&self, type_id: &str) -> Option<&TypeDefinition> {
        self.chain().find_map(|db| db.types.get(type_id))
    }

    /// Is the resource a type defined by this database or its parent?
    pub fn is_type(&self, resource_id: &str) -> bool {
        self.types.contains(resource_id)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.types.contains(resource_id))
    }

    /// Can `user` read the resource? Every ancestor must allow it first; then
    /// this database's own entry, if any, must grant it.
    pub fn can_read(&self, resource_id: &str, user: &User) -> bool {
        let parent_allows = self
            .parent
            .as_ref()
            .map_or(true, |parent| parent.can_read(resource_id, user));
        parent_allows && self.read_acls.permits(resource_id, user)
    }

    /// Name of the property on `referenced_id` that points back along
    /// `property`, as declared by the nearest defined supertype of the
    /// referenced thing or by that type's facets.
    pub fn inverse_property_name(&self, referenced_id: &str, property: &str) -> Option<String> {
        let first = supertype_of(&normalize_resource_id(referenced_id), false);
        let definition = std::iter::successors(first, |type_id| supertype_of(type_id, false))
            .find_map(|type_id| self.type_definition_of(&type_id))?;
        inverse_property_of(definition, property, |facet| self.type_definition_of(facet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(path: &Path, value: serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, value.to_string()).unwrap();
    }

    struct Fixture {
        _catalog_home: tempfile::TempDir,
        _personal_home: tempfile::TempDir,
        catalog: Arc<Database>,
        personal: Arc<Database>,
    }

    fn fixture() -> Fixture {
        let catalog_home = tempfile::tempdir().unwrap();
        let personal_home = tempfile::tempdir().unwrap();
        let c = catalog_home.path();
        write(&c.join("types/type.json"), json!({
            "children": { "<papers>": "", "<people>": "", "<facets>": "" }
        }));
        write(&c.join("types/papers/type.json"), json!({
            "properties": { "authors": { "inverse": "wrote" } },
            "facets": { "</types/facets>": "" }
        }));
        write(&c.join("types/people/type.json"), json!({
            "properties": { "wrote": { "inverse": "authors" } }
        }));
        write(&c.join("types/facets/type.json"), json!({
            "properties": { "tags": { "inverse": "taggedWith" } }
        }));
        write(&c.join("read_acls.json"), json!({
            "/types/papers/Private": { "</types/users/alice>": "" }
        }));
        write(&personal_home.path().join("read_acls.json"), json!({
            "/types/papers/Public": { "</types/users/alice>": "" }
        }));

        let catalog = Database::open("app", "catalog", c, None).unwrap();
        let personal =
            Database::open("app", "personal", personal_home.path(), Some(catalog.clone())).unwrap();
        Fixture {
            _catalog_home: catalog_home,
            _personal_home: personal_home,
            catalog,
            personal,
        }
    }

    #[test]
    fn requires_names_and_home() {
        let home = tempfile::tempdir().unwrap();
        assert!(matches!(
            Database::open("", "db", home.path(), None),
            Err(QueryError::Configuration(_))
        ));
        assert!(matches!(
            Database::open("app", " ", home.path(), None),
            Err(QueryError::Configuration(_))
        ));
        assert!(matches!(
            Database::open("app", "db", home.path().join("missing"), None),
            Err(QueryError::Configuration(_))
        ));
    }

    #[test]
    fn type_lookups_climb_to_the_parent() {
        let f = fixture();
        assert_eq!(f.personal.chain().count(), 2);
        assert!(f.personal.types().is_empty());
        assert!(f.personal.type_definition_of("/types/papers").is_some());
        assert!(f.personal.is_type("/types/people"));
        assert!(!f.catalog.is_type("/types/papers/Dune"));
    }

    #[test]
    fn ancestor_denial_wins() {
        let f = fixture();
        let alice = User::new("/types/users/alice");
        let bob = User::new("/types/users/bob");
        assert!(f.personal.can_read("/types/papers/Private", &alice));
        assert!(!f.personal.can_read("/types/papers/Private", &bob));
        assert!(!f.personal.can_read("/types/papers/Public", &bob));
        assert!(f.catalog.can_read("/types/papers/Public", &bob));
        assert!(f.personal.can_read("/types/papers/Other", &bob));
        assert!(!f.personal.can_read("/types/papers//Private", &bob));
        assert!(!f.personal.can_read("/types/./papers/Private/", &bob));
    }

    #[test]
    fn inverse_names_come_from_the_referenced_type() {
        let f = fixture();
        assert_eq!(
            f.personal.inverse_property_name("/types/people/Herbert", "authors").as_deref(),
            Some("wrote")
        );
        assert_eq!(
            f.catalog.inverse_property_name("/types/papers/Dune/cover", "taggedWith").as_deref(),
            Some("tags")
        );
        assert_eq!(f.catalog.inverse_property_name("/types/notes/x", "authors"), None);
    }

    #[test]
    fn hrefs_and_paths() {
        let f = fixture();
        assert_eq!(
            f.personal.href("http://localhost:8080/", "</types/papers/A Paper>"),
            "http://localhost:8080/app/personal/types/papers/A%20Paper"
        );
        assert_eq!(f.catalog.path_of("/types/papers"), f.catalog.home().join("types/papers"));
        assert_eq!(f.catalog.path_of("/"), f.catalog.home());
        assert_eq!(f.catalog.path_of("/types//papers/."), f.catalog.home().join("types/papers"));
    }
}
