//! Role graph, route registry and request-time authorization.

pub mod engine;
pub mod errors;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod types;
pub mod web;

pub use engine::{decide, Decision, DenyReason, PermitReason};
pub use errors::RbacError;
pub use registry::{RouteDef, RouteRegistry, RoutedApp};
pub use service::RbacService;
pub use snapshot::{Snapshot, SnapshotCache};
pub use types::{
    Caller, HttpVerb, NewPermission, NewRole, Permission, PermissionFilter, PermissionId, Role,
    RoleFilter, RoleId, Route, UpdatePermission, UpdateRole,
};
pub use web::{authorize, caller_from_headers, AuthzGuard};
