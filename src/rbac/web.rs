use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::rbac::engine::{self, Decision, DenyReason, PermitReason};
use crate::rbac::errors::RbacError;
use crate::rbac::snapshot::SnapshotCache;
use crate::rbac::types::{Caller, HttpVerb, RoleId};
use crate::settings::Environment;

/// Outside production a caller holding this role skips every check.
pub const ADMIN_ROLE: &str = "admin";

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

/// State for the [`authorize`] middleware.
#[derive(Clone)]
pub struct AuthzGuard {
    pub cache: Arc<SnapshotCache>,
    pub environment: Environment,
}

impl AuthzGuard {
    pub fn new(cache: Arc<SnapshotCache>, environment: Environment) -> Self {
        Self { cache, environment }
    }

    pub fn check(&self, path: &str, method: &Method, role: Option<&RoleId>) -> Decision {
        if !self.environment.is_production() && role.is_some_and(|r| r.as_str() == ADMIN_ROLE) {
            return Decision::Permit(PermitReason::DevelopmentBypass);
        }
        // Axum answers HEAD with the GET handler, so it needs the GET grant.
        let method = if method == Method::HEAD { &Method::GET } else { method };
        let Some(verb) = HttpVerb::from_method(method) else {
            return Decision::Permit(PermitReason::Unrestricted);
        };
        let snapshot = self.cache.current_snapshot();
        engine::decide(&snapshot, path, verb, role)
    }
}

/// Use with `axum::middleware::from_fn_with_state` as a route layer so the
/// matched route pattern is available.
pub async fn authorize(State(guard): State<AuthzGuard>, request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let role = request
        .extensions()
        .get::<Caller>()
        .and_then(|caller| caller.role.clone());

    match guard.check(&path, request.method(), role.as_ref()) {
        Decision::Permit(_) => next.run(request).await,
        Decision::Deny(reason) => {
            tracing::debug!(
                %path,
                method = %request.method(),
                role = role.as_ref().map(|r| r.as_str()),
                ?reason,
                "Request denied"
            );
            let err = match reason {
                DenyReason::MissingRole => RbacError::Unauthorized,
                DenyReason::NotGranted => RbacError::Forbidden {
                    path,
                    method: request.method().to_string(),
                },
            };
            err.into_response()
        }
    }
}

/// Builds a [`Caller`] from `x-caller-id` / `x-caller-role`. Stands in for a
/// real authentication layer during development and tests.
pub async fn caller_from_headers(mut request: Request, next: Next) -> Response {
    if let Some(caller) = caller_from(request.headers()) {
        request.extensions_mut().insert(caller);
    }
    next.run(request).await
}

fn caller_from(headers: &HeaderMap) -> Option<Caller> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let id = header(CALLER_ID_HEADER)?;
    Some(Caller {
        id: id.to_string(),
        role: header(CALLER_ROLE_HEADER).map(RoleId::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::snapshot::Snapshot;
    use crate::rbac::types::{Permission, PermissionId, Route};
    use axum::http::HeaderValue;

    fn guard(environment: Environment) -> AuthzGuard {
        let snapshot = Snapshot::from_parts(
            vec![],
            vec![Permission {
                id: PermissionId::from("p1"),
                route: Route::new("/jobs", HttpVerb::Get),
                name: None,
                roles: vec![RoleId::from("staff")],
            }],
        );
        AuthzGuard::new(Arc::new(SnapshotCache::new(snapshot)), environment)
    }

    #[test]
    fn test_admin_bypass_only_outside_production() {
        let admin = RoleId::from(ADMIN_ROLE);

        let dev = guard(Environment::Development);
        assert_eq!(
            dev.check("/jobs", &Method::GET, Some(&admin)),
            Decision::Permit(PermitReason::DevelopmentBypass)
        );

        let prod = guard(Environment::Production);
        assert_eq!(
            prod.check("/jobs", &Method::GET, Some(&admin)),
            Decision::Deny(DenyReason::NotGranted)
        );
    }

    #[test]
    fn test_head_needs_the_get_grant() {
        let prod = guard(Environment::Production);
        let staff = RoleId::from("staff");
        let guest = RoleId::from("guest");
        assert_eq!(
            prod.check("/jobs", &Method::HEAD, None),
            Decision::Deny(DenyReason::MissingRole)
        );
        assert_eq!(
            prod.check("/jobs", &Method::HEAD, Some(&guest)),
            Decision::Deny(DenyReason::NotGranted)
        );
        assert!(prod.check("/jobs", &Method::HEAD, Some(&staff)).is_permit());
    }

    #[test]
    fn test_unsupported_method_is_open() {
        let prod = guard(Environment::Production);
        assert!(prod.check("/jobs", &Method::PATCH, None).is_permit());
        assert!(prod.check("/jobs", &Method::OPTIONS, None).is_permit());
    }

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(caller_from(&headers).is_none());

        headers.insert(CALLER_ID_HEADER, HeaderValue::from_static("u-1"));
        assert_eq!(
            caller_from(&headers),
            Some(Caller {
                id: "u-1".into(),
                role: None
            })
        );

        headers.insert(CALLER_ROLE_HEADER, HeaderValue::from_static("staff"));
        assert_eq!(
            caller_from(&headers).and_then(|c| c.role),
            Some(RoleId::from("staff"))
        );
    }
}
