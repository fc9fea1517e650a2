use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use sea_orm::SqlErr;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RbacError {
    #[error("Invalid module name `{0}`")]
    #[diagnostic(
        code(routegate::rbac::invalid_module),
        help("Module names are lowercase ASCII letters only, e.g. \"jobs\"")
    )]
    InvalidModuleName(String),

    #[error("Invalid route path `{path}` in module `{module}`")]
    #[diagnostic(
        code(routegate::rbac::invalid_route_path),
        help("Each segment must be `/[-a-z0-9]+` or `/{{identifier}}` with identifier `[a-zA-Z_]+`")
    )]
    InvalidRoutePath { module: String, path: String },

    #[error("Authentication required")]
    #[diagnostic(code(routegate::rbac::unauthorized))]
    Unauthorized,

    #[error("Role is not permitted to {method} {path}")]
    #[diagnostic(code(routegate::rbac::forbidden))]
    Forbidden { path: String, method: String },

    #[error("Invalid seed file: {0}")]
    #[diagnostic(
        code(routegate::rbac::invalid_seed),
        help("Roles must be declared before the roles that name them as parent")
    )]
    InvalidSeed(String),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(routegate::rbac::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(routegate::rbac::db))]
    Db(#[from] sea_orm::DbErr),
}

impl IntoResponse for RbacError {
    fn into_response(self) -> Response {
        let status = match &self {
            RbacError::Unauthorized => StatusCode::UNAUTHORIZED,
            RbacError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RbacError::InvalidSeed(_) => StatusCode::BAD_REQUEST,
            RbacError::Db(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
