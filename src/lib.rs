//! routegate - role-based access control for HTTP routes
//!
//! Roles form an inheritance tree, permissions bind a (route pattern, method)
//! pair to a set of roles, and an axum middleware answers every request from
//! an in-memory snapshot of that graph. All modules are exposed for testing
//! and for embedding the middleware in other services.

pub mod entities;
pub mod errors;
pub mod jobs;
pub mod rbac;
pub mod seed;
pub mod settings;
pub mod storage;
pub mod web;
