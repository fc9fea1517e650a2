pub mod job_execution;
pub mod permission;
pub mod role;
pub mod role_permission;

pub use job_execution::Entity as JobExecution;
pub use permission::Entity as Permission;
pub use role::Entity as Role;
pub use role_permission::Entity as RolePermission;
