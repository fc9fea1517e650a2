#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::{PermissionBuilder, RoleBuilder};
pub use db::TestDb;
