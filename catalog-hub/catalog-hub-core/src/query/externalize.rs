//! Turns a stored thing into what clients see: references become hyperlink
//! stubs, sets and lists of references become paginated collections, and
//! anything the user may not read is left out.

use super::resolver::{resolve, Resolution, THING_FILE_NAME};
use super::{mark_type, QueryContext};
use crate::database::Database;
use crate::error::Result;
use crate::resource::{
    is_reference, is_valid_resource_id, normalize_resource_id, resolve_reference, strip_reference_marks,
};
use crate::security::{reference_set, User};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// What a single reference externalizes to.
enum Externalized {
    Value(Value),
    /// The user may not read the target.
    Hidden,
}

/// Externalizes every property of `thing`, stored at `resource_id`.
pub(crate) async fn externalize_thing(
    context: &QueryContext,
    user: &User,
    resource_id: &str,
    mut thing: Map<String, Value>,
) -> Result<Map<String, Value>> {
    let database = context.database.as_ref();

    if let Some(Value::Object(representations)) = thing.get_mut("representations") {
        representations.retain(|representation, _| {
            let id = representation_id(resource_id, representation);
            let readable = database.can_read(&id, user);
            if !readable {
                debug!(resource_id = %id, user = %user.id, "hiding representation");
            }
            readable
        });
    }
    if let Some(read_by) = thing.get("readBy") {
        let has_read = reference_set(Some(read_by)).contains(&user.id);
        thing.insert("userHasRead".to_string(), Value::Bool(has_read));
    }

    let tasks: Vec<BoxFuture<'_, (String, Result<Externalized>)>> = thing
        .into_iter()
        .map(|(property, value)| {
            async move {
                debug!(resource_id, property = %property, "externalizing property");
                let externalized = externalize_value(context, user, resource_id, &property, value).await;
                (property, externalized)
            }
            .boxed()
        })
        .collect();

    let mut result = Map::with_capacity(tasks.len());
    for (property, externalized) in context.worker.run(tasks).await {
        if let Externalized::Value(value) = externalized? {
            result.insert(property, value);
        }
    }
    mark_type(database, resource_id, &mut result);
    Ok(result)
}

async fn externalize_value(
    context: &QueryContext,
    user: &User,
    resource_id: &str,
    property: &str,
    value: Value,
) -> Result<Externalized> {
    match value {
        Value::String(text) if is_reference(&text) => match resolve_reference(resource_id, &text) {
            Some(target) => externalize_reference(context, user, property, target, false).await,
            None => Ok(Externalized::Value(Value::String(text))),
        },
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Externalized::Value(collection(context, 0, Vec::new())));
            }
            if !items.iter().any(|item| item.as_str().is_some_and(is_reference)) {
                return Ok(Externalized::Value(Value::Array(items)));
            }
            let members = items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) if is_reference(&text) => {
                        match resolve_reference(resource_id, &text) {
                            Some(target) => Member::Reference(target),
                            None => Member::Plain(Value::String(text)),
                        }
                    }
                    other => Member::Plain(other),
                })
                .collect();
            let value = externalize_collection(context, user, property, members).await?;
            Ok(Externalized::Value(value))
        }
        Value::Object(map) => {
            if map.is_empty() {
                return Ok(Externalized::Value(collection(context, 0, Vec::new())));
            }
            if !map.keys().any(|key| is_reference(key)) {
                return Ok(Externalized::Value(Value::Object(map)));
            }
            // entries that aren't references stay as one-entry objects
            let members = map
                .into_iter()
                .map(|(key, value)| match resolve_reference(resource_id, &key) {
                    Some(target) => Member::Reference(target),
                    None => {
                        let mut entry = Map::new();
                        entry.insert(key, value);
                        Member::Plain(Value::Object(entry))
                    }
                })
                .collect();
            let value = externalize_collection(context, user, property, members).await?;
            Ok(Externalized::Value(value))
        }
        other => Ok(Externalized::Value(other)),
    }
}

enum Member {
    Reference(String),
    Plain(Value),
}

/// Builds a `{limit, offset, totalCount, members}` collection. Members the
/// user can't read are neither counted nor resolved; only the requested
/// page is resolved.
async fn externalize_collection(
    context: &QueryContext,
    user: &User,
    property: &str,
    members: Vec<Member>,
) -> Result<Value> {
    let database = context.database.as_ref();
    let readable: Vec<Member> = members
        .into_iter()
        .filter(|member| match member {
            Member::Reference(id) => database.can_read(id, user),
            Member::Plain(_) => true,
        })
        .collect();
    let total = readable.len();
    let page = page_of(&readable, context.parameters.offset, context.parameters.limit);

    let tasks: Vec<BoxFuture<'_, Result<Externalized>>> = page
        .iter()
        .map(|member| match member {
            Member::Reference(id) => {
                externalize_reference(context, user, property, id.clone(), true).boxed()
            }
            Member::Plain(value) => {
                let value = value.clone();
                async move { Ok(Externalized::Value(value)) }.boxed()
            }
        })
        .collect();

    let mut resolved = Vec::with_capacity(tasks.len());
    for outcome in context.worker.run(tasks).await {
        if let Externalized::Value(value) = outcome? {
            resolved.push(value);
        }
    }
    Ok(collection(context, total, resolved))
}

/// Resolves one reference to its stub, `{id}` when it can't be found, or the
/// hyperlink of a plain file.
async fn externalize_reference(
    context: &QueryContext,
    user: &User,
    property: &str,
    target: String,
    in_collection: bool,
) -> Result<Externalized> {
    let database = context.database.as_ref();
    if !is_valid_resource_id(&target) {
        warn!(reference = %target, property, "ignoring malformed reference");
        return Ok(Externalized::Value(json!({ "id": target })));
    }
    if !in_collection && !database.can_read(&target, user) {
        debug!(reference = %target, user = %user.id, "omitting unreadable reference");
        return Ok(Externalized::Hidden);
    }

    match resolve(database, &target, THING_FILE_NAME, &user.id).await? {
        Resolution::Found(thing) => Ok(Externalized::Value(Value::Object(stub(
            context, database, property, &target, &thing,
        )))),
        Resolution::File(_) => Ok(Externalized::Value(Value::String(
            database.href(&context.base_url, &target),
        ))),
        Resolution::NotFound { cause } => {
            warn!(reference = %target, property, %cause, "reference did not resolve");
            Ok(Externalized::Value(json!({ "id": target })))
        }
    }
}

fn stub(
    context: &QueryContext,
    database: &Database,
    property: &str,
    target: &str,
    thing: &Map<String, Value>,
) -> Map<String, Value> {
    let mut stub = Map::new();
    stub.insert("href".into(), Value::String(database.href(&context.base_url, target)));
    stub.insert("id".into(), Value::String(target.to_string()));
    if let Some(name) = thing.get("name") {
        stub.insert("name".into(), name.clone());
    }
    stub.insert(
        "path".into(),
        thing
            .get("path")
            .cloned()
            .unwrap_or_else(|| Value::String(target.to_string())),
    );
    if let Some(inverse) = database.inverse_property_name(target, property) {
        if let Some(count) = thing.get(&inverse).and_then(size_of) {
            stub.insert(format!("{inverse}Count"), json!(count));
        }
    }
    stub
}

/// Number of members in a collection value.
pub(crate) fn size_of(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

pub(crate) fn page_of<T>(items: &[T], offset: usize, limit: usize) -> &[T] {
    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    &items[start..end]
}

pub(crate) fn collection(context: &QueryContext, total: usize, members: Vec<Value>) -> Value {
    json!({
        "limit": context.parameters.limit,
        "offset": context.parameters.offset,
        "totalCount": total,
        "members": members,
    })
}

/// Resource id of a representation attached to a thing.
fn representation_id(resource_id: &str, representation: &str) -> String {
    if is_reference(representation) {
        if let Some(id) = resolve_reference(resource_id, representation) {
            return id;
        }
    }
    normalize_resource_id(&format!("{resource_id}/{}", strip_reference_marks(representation)))
}
