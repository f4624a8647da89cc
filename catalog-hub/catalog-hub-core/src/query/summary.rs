//! Count-only views of a thing.
//!
//! With `properties=a,b` each named collection becomes a page of summaries of
//! its members. Without it every collection is replaced by `<name>Count`.

use super::externalize::{collection, page_of};
use super::resolver::{resolve, Resolution, THING_FILE_NAME};
use super::{mark_type, QueryContext};
use crate::error::Result;
use crate::resource::{is_reference, is_valid_resource_id, normalize_resource_id, resolve_reference};
use crate::security::User;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub(crate) async fn summarize(
    context: &QueryContext,
    user: &User,
    thing: Map<String, Value>,
) -> Result<Map<String, Value>> {
    match &context.parameters.properties {
        Some(properties) => summarize_collections(context, user, &thing, properties).await,
        None => Ok(summarize_thing(context, user, thing)),
    }
}

/// Replaces collection values with their readable member count.
fn summarize_thing(context: &QueryContext, user: &User, thing: Map<String, Value>) -> Map<String, Value> {
    let resource_id = context.resource_id.as_str();
    let mut summary = Map::new();
    for (property, value) in thing {
        match readable_count(context, user, resource_id, &value) {
            Some(count) => {
                summary.insert(format!("{property}Count"), json!(count));
            }
            None => {
                summary.insert(property, value);
            }
        }
    }
    mark_type(&context.database, resource_id, &mut summary);
    summary
}

/// Pages of member summaries for each requested property.
async fn summarize_collections(
    context: &QueryContext,
    user: &User,
    thing: &Map<String, Value>,
    properties: &[String],
) -> Result<Map<String, Value>> {
    let database = context.database.as_ref();
    let resource_id = context.resource_id.as_str();
    let mut result = Map::new();
    if let Some(path) = thing.get("path") {
        result.insert("path".to_string(), path.clone());
    }

    for property in properties {
        debug!(resource_id, property = %property, "summarizing property");
        let ids: Vec<String> = thing
            .get(property)
            .map(|value| member_ids(resource_id, value))
            .unwrap_or_default()
            .into_iter()
            .filter(|id| database.can_read(id, user))
            .collect();
        let page = page_of(&ids, context.parameters.offset, context.parameters.limit);

        let tasks: Vec<BoxFuture<'_, Result<Option<Value>>>> = page
            .iter()
            .map(|id| fetch_summary(context, user, properties, id).boxed())
            .collect();
        let mut members = Vec::with_capacity(tasks.len());
        for summary in context.worker.run(tasks).await {
            if let Some(summary) = summary? {
                members.push(summary);
            }
        }
        result.insert(property.clone(), collection(context, ids.len(), members));
    }

    mark_type(database, resource_id, &mut result);
    Ok(result)
}

/// `{id, name, path, shortDescription, isSummary}` for one member, plus the
/// readable count of each requested property it holds. Never looks inside
/// the member's references.
async fn fetch_summary(
    context: &QueryContext,
    user: &User,
    properties: &[String],
    id: &str,
) -> Result<Option<Value>> {
    let database = context.database.as_ref();
    if !is_valid_resource_id(id) {
        warn!(reference = id, "ignoring malformed reference");
        return Ok(None);
    }
    let thing = match resolve(database, id, THING_FILE_NAME, &user.id).await? {
        Resolution::Found(thing) => thing,
        Resolution::File(_) => {
            return Ok(Some(json!({
                "id": id,
                "href": database.href(&context.base_url, id),
                "isSummary": true,
            })));
        }
        Resolution::NotFound { cause } => {
            warn!(reference = id, %cause, "summarized member did not resolve");
            return Ok(Some(json!({ "id": id, "isSummary": true })));
        }
    };

    let short_description = thing
        .get("shortDescription")
        .or_else(|| thing.get("description"))
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));
    let mut summary = Map::new();
    summary.insert("id".into(), Value::String(id.to_string()));
    summary.insert("name".into(), thing.get("name").cloned().unwrap_or(Value::Null));
    summary.insert(
        "path".into(),
        thing.get("path").cloned().unwrap_or_else(|| Value::String(id.to_string())),
    );
    summary.insert("shortDescription".into(), short_description);
    summary.insert("isSummary".into(), Value::Bool(true));
    for property in properties {
        if let Some(count) = thing.get(property).and_then(|v| readable_count(context, user, id, v)) {
            summary.insert(format!("{property}Count"), json!(count));
        }
    }
    mark_type(database, id, &mut summary);
    Ok(Some(Value::Object(summary)))
}

/// Ids named by a collection value: the references of an array or the
/// reference keys of an object.
fn member_ids(resource_id: &str, value: &Value) -> Vec<String> {
    let references: Box<dyn Iterator<Item = &str> + '_> = match value {
        Value::Array(items) => Box::new(items.iter().filter_map(Value::as_str)),
        Value::Object(map) => Box::new(map.keys().map(String::as_str)),
        _ => return Vec::new(),
    };
    references
        .map(|text| {
            if is_reference(text) {
                resolve_reference(resource_id, text)
                    .unwrap_or_else(|| normalize_resource_id(text))
            } else {
                text.to_string()
            }
        })
        .collect()
}

/// Count of a collection's members the user can read. Members that aren't
/// references always count. `None` for scalars.
fn readable_count(context: &QueryContext, user: &User, resource_id: &str, value: &Value) -> Option<usize> {
    let database = context.database.as_ref();
    let count = |text: &str| {
        !is_reference(text)
            || resolve_reference(resource_id, text).is_some_and(|id| database.can_read(&id, user))
    };
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter(|item| item.as_str().map_or(true, count))
                .count(),
        ),
        Value::Object(map) => Some(map.keys().filter(|key| count(key.as_str())).count()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_resolve_relative_references() {
        let value = json!(["</types/notes/A>", "<B>", "plain"]);
        assert_eq!(
            member_ids("/types/notes", &value),
            vec!["/types/notes/A", "/types/notes/B", "plain"]
        );
        let value = json!({ "</types/notes/A>": "", "<C>": "" });
        assert_eq!(member_ids("/types/notes", &value), vec!["/types/notes/A", "/types/notes/C"]);
        assert!(member_ids("/types/notes", &json!(3)).is_empty());
    }
}
