use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use catalog_hub::api::{self, CONTENT_TYPE};
use catalog_hub_core::{ApplicationConfiguration, Router as DatabaseRouter};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

fn write_json(path: &Path, value: Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, value.to_string()).unwrap();
}

fn app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let catalog = dir.path().join("catalog");
    let guest = dir.path().join("guest");

    write_json(&catalog.join("types/type.json"), json!({ "children": { "<notes>": "", "<users>": "" } }));
    write_json(&catalog.join("types/notes/type.json"), json!({ "name": "Notes" }));
    write_json(&catalog.join("types/users/type.json"), json!({ "name": "Users" }));
    write_json(&catalog.join("types/users/guest/thing.json"), json!({ "name": "Guest" }));
    write_json(&catalog.join("types/users/ann/thing.json"), json!({ "name": "Ann" }));
    write_json(&catalog.join("types/notes/thing.json"), json!({
        "name": "Notes",
        "children": { "</types/notes/Shopping List>": "", "</types/notes/Diary>": "" }
    }));
    write_json(&catalog.join("types/notes/Shopping List/thing.json"), json!({ "name": "Shopping List" }));
    write_json(&catalog.join("types/notes/Diary/thing.json"), json!({ "name": "Diary" }));
    write_json(&catalog.join("read_acls.json"), json!({
        "/types/notes/Diary": { "</types/users/ann>": "" }
    }));
    write_json(&guest.join("types/notes/Shopping List/thing.json"), json!({
        "name": "Shopping List",
        "items": ["milk", "eggs"],
        "attachment": "<list.txt>"
    }));
    std::fs::write(guest.join("types/notes/Shopping List/list.txt"), b"milk\neggs\n").unwrap();

    let configuration = ApplicationConfiguration::from_json(
        &json!({
            "applicationName": "sqwerl",
            "baseUrl": "http://example.org",
            "catalogDatabaseName": "catalog",
            "catalogDatabasePath": catalog,
            "defaultDatabaseName": "guest",
            "defaultDatabasePath": guest,
        })
        .to_string(),
    )
    .unwrap();
    let databases = Arc::new(DatabaseRouter::from_configuration(configuration).unwrap());
    (dir, api::router(databases))
}

async fn get(app: &Router, uri: &str, user: Option<&str>) -> (StatusCode, Option<String>, Vec<u8>) {
    let mut req = Request::builder().uri(uri);
    if let Some(user) = user {
        req = req.header("X-User-Id", user);
    }
    let resp = app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, bytes.to_vec())
}

#[tokio::test]
async fn health() {
    let (_dir, app) = app();
    let (status, _, body) = get(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn returns_objects_as_json() {
    let (_dir, app) = app();
    let (status, content_type, body) = get(&app, "/sqwerl/guest/types/notes/Shopping-List", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(CONTENT_TYPE));
    let object: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(object["id"], "/types/notes/Shopping List");
    assert_eq!(object["href"], "http://example.org/sqwerl/guest/types/notes/Shopping%20List");
    assert_eq!(object["items"], json!(["milk", "eggs"]));
    assert_eq!(
        object["attachment"],
        "http://example.org/sqwerl/guest/types/notes/Shopping%20List/list.txt"
    );
}

#[tokio::test]
async fn serves_files() {
    let (_dir, app) = app();
    let (status, content_type, body) =
        get(&app, "/sqwerl/guest/types/notes/Shopping%20List/list.txt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain"));
    assert_eq!(body, b"milk\neggs\n");
}

#[tokio::test]
async fn streams_file_ranges() {
    let (_dir, app) = app();
    let req = Request::builder()
        .uri("/sqwerl/guest/types/notes/Shopping-List/list.txt")
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"milk");
}

#[tokio::test]
async fn protected_things_stay_protected_under_other_spellings() {
    let (_dir, app) = app();
    for uri in [
        "/sqwerl/guest/types/notes//Diary",
        "/sqwerl/guest/types/notes/./Diary",
        "/sqwerl/guest/types/notes/Diary/",
    ] {
        let (status, _, _) = get(&app, uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn applies_read_permissions() {
    let (_dir, app) = app();
    let (status, _, _) = get(&app, "/sqwerl/guest/types/notes/Diary", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = get(&app, "/sqwerl/guest/types/notes/Diary", Some("/types/users/ann")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = get(&app, "/sqwerl/catalog/types/notes", None).await;
    let notes: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(notes["children"]["totalCount"], 1);
    assert_eq!(notes["isType"], true);
}

#[tokio::test]
async fn summaries_and_schemas() {
    let (_dir, app) = app();
    let (status, _, body) = get(&app, "/sqwerl/catalog/types/notes/summary", Some("/types/users/ann")).await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary["childrenCount"], 2);

    let (status, _, body) = get(&app, "/sqwerl/catalog/types/notes/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    let schema: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(schema["name"], "Notes");
    assert_eq!(schema["isType"], true);
}

#[tokio::test]
async fn maps_failures_to_status_codes() {
    let (_dir, app) = app();
    let (status, _, _) = get(&app, "/sqwerl/guest/types/notes/Nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get(&app, "/sqwerl/nowhere/types", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get(&app, "/sqwerl/guest/types/a..b", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = get(&app, "/sqwerl/guest/types/notes", Some("/types/users/nobody")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
