//! Resource identifiers and the reference strings that point at them.
//!
//! A resource id is a slash separated path from a database root, for example
//! `/types/papers/Dune`. Stored things refer to each other with reference
//! strings: `</types/papers/Dune>` is absolute, `<cover.png>` is relative to
//! the thing that contains it.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::debug;

/// Characters that may never appear in a resource id.
const FORBIDDEN: &[char] = &[
    '$', '~', '#', ':', ';', '\\', '%', '|', '{', '}', '`', '\'', '"', '+', '!', '@', '^', '&',
    '*', '=', '[', ']', ',', '?', '<', '>', '-',
];

/// Same set of characters `encodeURI` leaves alone.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Is the given resource id safe to turn into a storage path?
pub fn is_valid_resource_id(resource_id: &str) -> bool {
    let valid = !resource_id.is_empty()
        && !resource_id.contains("..")
        && !resource_id.contains(FORBIDDEN);
    debug!(resource_id, valid, "checked resource id");
    valid
}

/// Is the text delimited by `<` and `>`?
pub fn is_reference(text: &str) -> bool {
    let text = text.trim();
    text.len() >= 2 && text.starts_with('<') && text.ends_with('>')
}

/// Removes the `<` and `>` around a reference. Text that isn't a reference is
/// returned trimmed but otherwise unchanged.
pub fn strip_reference_marks(text: &str) -> &str {
    let trimmed = text.trim();
    let start = usize::from(trimmed.starts_with('<'));
    let end = trimmed.rfind('>').filter(|&i| i >= start).unwrap_or(trimmed.len());
    &trimmed[start..end]
}

/// The canonical form of a resource id: rooted at `/`, with reference marks,
/// empty segments and `.` segments removed and no trailing `/`.
/// Storage paths and ACL keys are both built from this form.
pub fn normalize_resource_id(resource_id: &str) -> String {
    let segments: Vec<&str> = strip_reference_marks(resource_id)
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Resolves a reference found inside the thing `containing_id` to the
/// resource id it names.
///
/// Returns `None` when the text isn't a reference.
pub fn resolve_reference(containing_id: &str, reference: &str) -> Option<String> {
    if !is_reference(reference) {
        return None;
    }
    let path = strip_reference_marks(reference);
    if path.starts_with('/') {
        return Some(normalize_resource_id(path));
    }
    Some(normalize_resource_id(&format!("{containing_id}/{path}")))
}

/// The reference form a database uses for its own type table keys:
/// `</application/database/resource/id>`.
pub fn qualified_reference(application_name: &str, database_name: &str, resource_id: &str) -> String {
    format!("</{application_name}/{database_name}{resource_id}>")
}

/// Drops the `/application/database` prefix from a qualified reference and
/// returns the bare resource id.
///
/// Plain resource ids and unqualified references are returned with their
/// marks removed.
pub fn unqualify<'a>(reference: &'a str, application_name: &str, database_name: &str) -> &'a str {
    let path = strip_reference_marks(reference);
    let prefix_len = application_name.len() + database_name.len() + 2;
    let qualified = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(application_name))
        .and_then(|p| p.strip_prefix('/'))
        .and_then(|p| p.strip_prefix(database_name))
        .filter(|rest| rest.is_empty() || rest.starts_with('/'));
    match qualified {
        Some(_) => &path[prefix_len..],
        None => path,
    }
}

/// Percent-encodes a path the way hyperlinks are written.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF).to_string()
}

/// Percent-decodes a request path segment.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}
