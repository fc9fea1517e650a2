//! Boot-time registry of every (module, path, method) the application serves.
//!
//! Registration errors are programmer errors: callers propagate them out of
//! `main` so a malformed route stops the process before it listens.

use std::collections::BTreeMap;

use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use serde::Serialize;

use crate::rbac::errors::RbacError;
use crate::rbac::types::{HttpVerb, Route};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDef {
    pub module: String,
    pub path: String,
    pub method: HttpVerb,
    pub description: Option<String>,
}

impl RouteDef {
    pub fn route(&self) -> Route {
        Route::new(self.path.clone(), self.method)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    by_module: BTreeMap<String, Vec<RouteDef>>,
    routes: Vec<RouteDef>,
    paths: Vec<String>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route_path(
        &mut self,
        module: &str,
        path: &str,
        method: HttpVerb,
        description: Option<&str>,
    ) -> Result<(), RbacError> {
        if !is_valid_module_name(module) {
            return Err(RbacError::InvalidModuleName(module.to_string()));
        }
        if !is_valid_route_path(path) {
            return Err(RbacError::InvalidRoutePath {
                module: module.to_string(),
                path: path.to_string(),
            });
        }

        let def = RouteDef {
            module: module.to_string(),
            path: path.to_string(),
            method,
            description: description.map(str::to_string),
        };

        tracing::debug!(module, path, %method, "Registered route");

        self.by_module
            .entry(def.module.clone())
            .or_default()
            .push(def.clone());
        self.routes.push(def);
        self.paths.push(path.to_string());
        Ok(())
    }

    pub fn routes(&self) -> &[RouteDef] {
        &self.routes
    }

    pub fn routes_for(&self, module: &str) -> &[RouteDef] {
        self.by_module
            .get(module)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.by_module.keys().map(|k| k.as_str())
    }

    /// Flat list of registered paths, one entry per registration.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

/// `^[a-z]+$`
pub fn is_valid_module_name(module: &str) -> bool {
    !module.is_empty() && module.bytes().all(|b| b.is_ascii_lowercase())
}

/// `^((\/[-a-z0-9]+)|(\/{[a-zA-Z_]+}))+$`
pub fn is_valid_route_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(is_valid_segment)
}

fn is_valid_segment(segment: &str) -> bool {
    if let Some(inner) = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    {
        return !inner.is_empty()
            && inner
                .bytes()
                .all(|b| b.is_ascii_alphabetic() || b == b'_');
    }
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn method_filter(method: HttpVerb) -> MethodFilter {
    match method {
        HttpVerb::Get => MethodFilter::GET,
        HttpVerb::Post => MethodFilter::POST,
        HttpVerb::Put => MethodFilter::PUT,
        HttpVerb::Delete => MethodFilter::DELETE,
    }
}

/// An axum router that records every route in a [`RouteRegistry`] as it is
/// mounted, so the two cannot drift apart.
pub struct RoutedApp<S = ()> {
    router: Router<S>,
    registry: RouteRegistry,
}

impl<S> Default for RoutedApp<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RoutedApp<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            registry: RouteRegistry::new(),
        }
    }

    pub fn route<H, T>(
        mut self,
        module: &str,
        path: &str,
        method: HttpVerb,
        description: &str,
        handler: H,
    ) -> Result<Self, RbacError>
    where
        H: axum::handler::Handler<T, S>,
        T: 'static,
    {
        self.registry
            .add_route_path(module, path, method, Some(description))?;
        let method_router: MethodRouter<S> = on(method_filter(method), handler);
        self.router = self.router.route(path, method_router);
        Ok(self)
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn into_parts(self) -> (Router<S>, RouteRegistry) {
        (self.router, self.registry)
    }
}
