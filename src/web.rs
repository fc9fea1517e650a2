//! HTTP surface: the JSON admin API over the role graph, guarded by the same
//! `authorize` middleware it manages.
use crate::jobs;
use crate::rbac::registry::is_valid_route_path;
use crate::rbac::{
    authorize, caller_from_headers, AuthzGuard, HttpVerb, NewPermission, NewRole,
    PermissionFilter, PermissionId, RbacError, RbacService, RoleFilter, RoleId, RouteRegistry,
    RoutedApp, SnapshotCache, UpdatePermission, UpdateRole,
};
use crate::settings::Settings;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const MODULE: &str = "rbac";

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub rbac: RbacService,
    pub registry: Arc<RouteRegistry>,
}

/// Every admin endpoint, registered under the `rbac` module.
pub fn admin_routes() -> Result<RoutedApp<AppState>, RbacError> {
    RoutedApp::new()
        .route(MODULE, "/rbac/roles", HttpVerb::Get, "List roles", list_roles)?
        .route(MODULE, "/rbac/roles", HttpVerb::Post, "Create role", create_role)?
        .route(MODULE, "/rbac/roles/{id}", HttpVerb::Get, "Get role", get_role)?
        .route(MODULE, "/rbac/roles/{id}", HttpVerb::Put, "Update role", update_role)?
        .route(MODULE, "/rbac/roles/{id}", HttpVerb::Delete, "Delete role", delete_role)?
        .route(
            MODULE,
            "/rbac/permissions",
            HttpVerb::Get,
            "List permissions",
            list_permissions,
        )?
        .route(
            MODULE,
            "/rbac/permissions",
            HttpVerb::Post,
            "Create permission",
            create_permission,
        )?
        .route(
            MODULE,
            "/rbac/permissions/{id}",
            HttpVerb::Get,
            "Get permission",
            get_permission,
        )?
        .route(
            MODULE,
            "/rbac/permissions/{id}",
            HttpVerb::Put,
            "Rename permission",
            update_permission,
        )?
        .route(
            MODULE,
            "/rbac/permissions/{id}",
            HttpVerb::Delete,
            "Delete permission",
            delete_permission,
        )?
        .route(
            MODULE,
            "/rbac/permissions/{id}/roles",
            HttpVerb::Put,
            "Replace permission roles",
            set_permission_roles,
        )?
        .route(
            MODULE,
            "/rbac/permissions/{id}/roles",
            HttpVerb::Post,
            "Add permission roles",
            add_permission_roles,
        )?
        .route(MODULE, "/rbac/routes", HttpVerb::Get, "List registered routes", list_routes)?
        .route(
            MODULE,
            "/rbac/snapshot/reload",
            HttpVerb::Post,
            "Reload authorization snapshot",
            reload_snapshot,
        )
}

/// Assemble the application router and return it with the route registry
/// collected while mounting it.
pub fn build_router(
    settings: Arc<Settings>,
    db: DatabaseConnection,
    rbac: RbacService,
) -> Result<(Router, Arc<RouteRegistry>), RbacError> {
    let (router, registry) = admin_routes()?.into_parts();
    let registry = Arc::new(registry);

    let guard = AuthzGuard::new(rbac.cache().clone(), settings.rbac.environment);
    let state = AppState {
        db,
        rbac,
        registry: registry.clone(),
    };

    let router = router
        .route_layer(middleware::from_fn_with_state(guard, authorize))
        .route("/healthz", get(health))
        .layer(middleware::from_fn(caller_from_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok((router, registry))
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let settings = Arc::new(settings);
    let cache = Arc::new(SnapshotCache::load(&db).await?);
    let rbac = RbacService::new(db.clone(), cache.clone());

    let (router, registry) = build_router(settings.clone(), db.clone(), rbac.clone())?;
    rbac.sync_registry(&registry).await?;

    let _scheduler =
        jobs::init_scheduler(db, cache, settings.rbac.snapshot_refresh_secs).await?;

    let addr: SocketAddr = settings.bind_addr().parse().into_diagnostic()?;
    tracing::info!(
        %addr,
        routes = registry.routes().len(),
        environment = ?settings.rbac.environment,
        "routegate listening"
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn found<T: serde::Serialize>(value: Option<T>, what: &str) -> Response {
    match value {
        Some(v) => Json(v).into_response(),
        None => json_error(StatusCode::NOT_FOUND, format!("{what} not found")),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ---------- Roles ----------

#[derive(Debug, Deserialize)]
struct RoleQuery {
    name: Option<String>,
    parent_id: Option<RoleId>,
}

async fn list_roles(
    State(state): State<AppState>,
    Query(q): Query<RoleQuery>,
) -> Result<Response, RbacError> {
    let filter = RoleFilter {
        ids: None,
        name: q.name,
        parent_id: q.parent_id,
    };
    Ok(Json(state.rbac.find_roles(&filter).await?).into_response())
}

async fn create_role(
    State(state): State<AppState>,
    Json(input): Json<NewRole>,
) -> Result<Response, RbacError> {
    match state.rbac.create_role(input).await? {
        Some(role) => Ok((StatusCode::CREATED, Json(role)).into_response()),
        None => Ok(json_error(
            StatusCode::BAD_REQUEST,
            "parent role not found",
        )),
    }
}

async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, RbacError> {
    let role = state.rbac.find_role_by_id(&RoleId(id)).await?;
    Ok(found(role, "role"))
}

async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateRole>,
) -> Result<Response, RbacError> {
    let role = state.rbac.update_role_by_id(&RoleId(id), input).await?;
    Ok(found(role, "role"))
}

async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, RbacError> {
    let role = state.rbac.delete_role_by_id(&RoleId(id)).await?;
    Ok(found(role, "role"))
}

// ---------- Permissions ----------

#[derive(Debug, Deserialize)]
struct PermissionQuery {
    path: Option<String>,
    method: Option<HttpVerb>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleIds {
    roles: Vec<RoleId>,
}

async fn list_permissions(
    State(state): State<AppState>,
    Query(q): Query<PermissionQuery>,
) -> Result<Response, RbacError> {
    let filter = PermissionFilter {
        ids: None,
        path: q.path,
        method: q.method,
        name: q.name,
    };
    Ok(Json(state.rbac.find_permissions(&filter).await?).into_response())
}

async fn create_permission(
    State(state): State<AppState>,
    Json(input): Json<NewPermission>,
) -> Result<Response, RbacError> {
    if !is_valid_route_path(&input.route.path) {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid route path `{}`", input.route.path),
        ));
    }
    let permission = state.rbac.create_entry(input).await?;
    Ok((StatusCode::CREATED, Json(permission)).into_response())
}

async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, RbacError> {
    let permission = state.rbac.find_permission_by_id(&PermissionId(id)).await?;
    Ok(found(permission, "permission"))
}

async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdatePermission>,
) -> Result<Response, RbacError> {
    let permission = state
        .rbac
        .update_permission_by_id(&PermissionId(id), input)
        .await?;
    Ok(found(permission, "permission"))
}

async fn delete_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, RbacError> {
    let permission = state.rbac.delete_permission_by_id(&PermissionId(id)).await?;
    Ok(found(permission, "permission"))
}

async fn set_permission_roles(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RoleIds>,
) -> Result<Response, RbacError> {
    let permission = state
        .rbac
        .set_roles_for_permission_by_id(&PermissionId(id), &body.roles)
        .await?;
    Ok(found(permission, "permission"))
}

async fn add_permission_roles(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RoleIds>,
) -> Result<Response, RbacError> {
    let permission = state
        .rbac
        .add_roles_for_permission_by_id(&PermissionId(id), &body.roles)
        .await?;
    Ok(found(permission, "permission"))
}

// ---------- Registry / snapshot ----------

async fn list_routes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.routes().to_vec())
}

async fn reload_snapshot(State(state): State<AppState>) -> Response {
    let cache = state.rbac.cache();
    match jobs::trigger_job_manually(&state.db, cache, jobs::RELOAD_AUTHZ_SNAPSHOT).await {
        Ok(records) => Json(json!({
            "generation": cache.current_snapshot().generation,
            "records": records,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Snapshot reload failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
