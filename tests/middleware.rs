// HTTP tests for the authorize middleware and the admin API
//
// Requests go through the full router with `oneshot`; callers are identified
// with the development `x-caller-*` headers.

mod helpers;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use helpers::{PermissionBuilder, RoleBuilder, TestDb};
use routegate::rbac::{HttpVerb, RbacService, Role};
use routegate::settings::{Environment, Settings};
use routegate::web;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app(test_db: &TestDb, environment: Environment) -> (Router, RbacService) {
    let service = test_db.service().await;
    let mut settings = Settings::default();
    settings.rbac.environment = environment;
    let (router, _registry) = web::build_router(
        Arc::new(settings),
        test_db.connection().clone(),
        service.clone(),
    )
    .expect("Failed to build router");
    (router, service)
}

fn get(uri: &str, role: Option<&str>) -> Request<Body> {
    request("GET", uri, role, None)
}

fn request(method: &str, uri: &str, role: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder
            .header("x-caller-id", "user-1")
            .header("x-caller-role", role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn guard_role_listing(service: &RbacService, roles: &[&Role]) {
    PermissionBuilder::new("/rbac/roles", HttpVerb::Get)
        .granted_to(roles)
        .create(service)
        .await;
}

#[tokio::test]
async fn test_unconfigured_route_is_open() {
    let test_db = TestDb::new().await;
    let (router, _service) = app(&test_db, Environment::Production).await;

    let (status, body) = send(&router, get("/rbac/roles", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_restricted_route_statuses() {
    let test_db = TestDb::new().await;
    let (router, service) = app(&test_db, Environment::Production).await;

    let editor = RoleBuilder::new("Editor").create(&service).await;
    let senior = RoleBuilder::new("Senior").child_of(&editor).create(&service).await;
    let unrelated = RoleBuilder::new("Unrelated").create(&service).await;
    guard_role_listing(&service, &[&editor]).await;

    let (status, body) = send(&router, get("/rbac/roles", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&router, get("/rbac/roles", Some(unrelated.id.as_str()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&router, get("/rbac/roles", Some(editor.id.as_str()))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/rbac/roles", Some(senior.id.as_str()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(|a| a.len()), Some(3));

    // Other methods on the same path are separate permissions
    let (status, _) = send(
        &router,
        request("POST", "/rbac/roles", None, Some(json!({"name": "Fresh"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_matching_uses_route_pattern() {
    let test_db = TestDb::new().await;
    let (router, service) = app(&test_db, Environment::Production).await;

    let editor = RoleBuilder::new("Editor").create(&service).await;
    PermissionBuilder::new("/rbac/roles/{id}", HttpVerb::Get)
        .granted_to(&[&editor])
        .create(&service)
        .await;

    let uri = format!("/rbac/roles/{}", editor.id);
    let (status, _) = send(&router, get(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&router, get(&uri, Some(editor.id.as_str()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Editor");
}

#[tokio::test]
async fn test_admin_bypass_depends_on_environment() {
    let test_db = TestDb::new().await;
    let (dev, service) = app(&test_db, Environment::Development).await;
    let (prod, _) = app(&test_db, Environment::Production).await;

    let editor = RoleBuilder::new("Editor").create(&service).await;
    guard_role_listing(&service, &[&editor]).await;
    // The production router has its own snapshot cache
    let (status, _) = send(&prod, request("POST", "/rbac/snapshot/reload", None, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&dev, get("/rbac/roles", Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&prod, get("/rbac/roles", Some("admin"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_healthz_is_never_guarded() {
    let test_db = TestDb::new().await;
    let (router, service) = app(&test_db, Environment::Production).await;

    let editor = RoleBuilder::new("Editor").create(&service).await;
    PermissionBuilder::new("/healthz", HttpVerb::Get)
        .granted_to(&[&editor])
        .create(&service)
        .await;

    let response = router.clone().oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_api_round_trip() {
    let test_db = TestDb::new().await;
    let (router, _service) = app(&test_db, Environment::Production).await;

    let (status, editor) = send(
        &router,
        request("POST", "/rbac/roles", None, Some(json!({"name": "Editor"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let editor_id = editor["id"].as_str().unwrap().to_string();

    let (status, senior) = send(
        &router,
        request(
            "POST",
            "/rbac/roles",
            None,
            Some(json!({"name": "Senior", "parent_id": editor_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(senior["parents"], json!([editor_id]));
    let senior_id = senior["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        request(
            "POST",
            "/rbac/roles",
            None,
            Some(json!({"name": "Orphan", "parent_id": "ghost"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        request("POST", "/rbac/roles", None, Some(json!({"name": "Editor"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Lock the role listing behind Editor through the API itself
    let (status, permission) = send(
        &router,
        request(
            "POST",
            "/rbac/permissions",
            None,
            Some(json!({
                "route": {"path": "/rbac/roles", "method": "get"},
                "roles": [editor_id, "ghost"],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(permission["roles"], json!([editor_id]));
    let permission_id = permission["id"].as_str().unwrap().to_string();

    let (status, _) = send(&router, get("/rbac/roles", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&router, get("/rbac/roles", Some(senior_id.as_str()))).await;
    assert_eq!(status, StatusCode::OK);

    // Clearing the roles reopens the route
    let uri = format!("/rbac/permissions/{permission_id}/roles");
    let (status, cleared) = send(
        &router,
        request("PUT", &uri, None, Some(json!({"roles": []}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["roles"], json!([]));

    let (status, _) = send(&router, get("/rbac/roles", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        request(
            "POST",
            "/rbac/permissions",
            None,
            Some(json!({"route": {"path": "/Bad/Path", "method": "get"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("/Bad/Path"));

    let (status, _) = send(&router, get("/rbac/roles/missing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        request("DELETE", &format!("/rbac/roles/{editor_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, senior) = send(&router, get(&format!("/rbac/roles/{senior_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(senior["parents"], json!([]));
}

#[tokio::test]
async fn test_routes_listing_matches_registry() {
    let test_db = TestDb::new().await;
    let service = test_db.service().await;
    let (router, registry) = web::build_router(
        Arc::new(Settings::default()),
        test_db.connection().clone(),
        service,
    )
    .unwrap();

    let (status, body) = send(&router, get("/rbac/routes", None)).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), registry.routes().len());
    assert_eq!(registry.routes_for(web::MODULE).len(), registry.routes().len());
    assert!(listed
        .iter()
        .any(|r| r["path"] == "/rbac/permissions/{id}/roles" && r["method"] == "put"));
}

#[tokio::test]
async fn test_snapshot_reload_endpoint_records_execution() {
    use routegate::entities::job_execution;
    use sea_orm::EntityTrait;

    let test_db = TestDb::new().await;
    let (router, service) = app(&test_db, Environment::Production).await;
    RoleBuilder::new("Editor").create(&service).await;

    let (status, body) = send(&router, request("POST", "/rbac/snapshot/reload", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], 1);

    let executions = job_execution::Entity::find()
        .all(test_db.connection())
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].job_name, "reload_authz_snapshot");
    assert_eq!(executions[0].success, Some(1));
    assert_eq!(executions[0].records_processed, Some(1));
}

#[tokio::test]
async fn test_head_is_guarded_like_get() {
    let test_db = TestDb::new().await;
    let (router, service) = app(&test_db, Environment::Production).await;

    let editor = RoleBuilder::new("Editor").create(&service).await;
    let unrelated = RoleBuilder::new("Unrelated").create(&service).await;
    guard_role_listing(&service, &[&editor]).await;

    let (status, _) = send(&router, request("HEAD", "/rbac/roles", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &router,
        request("HEAD", "/rbac/roles", Some(unrelated.id.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &router,
        request("HEAD", "/rbac/roles", Some(editor.id.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
