//! Declarative role and permission seeding.
//!
//! A seed file names roles by `name` rather than id so it can be written by
//! hand and re-applied safely:
//!
//! ```toml
//! [[roles]]
//! name = "manager"
//!
//! [[roles]]
//! name = "staff"
//! parent = "manager"
//!
//! [[permissions]]
//! path = "/jobs/{id}"
//! method = "delete"
//! roles = ["manager"]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::GateError;
use crate::rbac::registry::is_valid_route_path;
use crate::rbac::{
    HttpVerb, NewPermission, NewRole, RbacError, RbacService, RoleFilter, RoleId, Route,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub roles: Vec<SeedRole>,
    #[serde(default)]
    pub permissions: Vec<SeedPermission>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRole {
    pub name: String,
    pub description: Option<String>,
    /// Name of a role declared earlier in the file or already stored.
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPermission {
    pub path: String,
    pub method: HttpVerb,
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: usize,
    pub permissions_created: usize,
}

impl SeedFile {
    /// Format follows the extension (`.toml`, `.json`, `.yaml`).
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

/// Apply `file` through the service. Roles are matched by name and
/// permissions by route, so applying the same file twice changes nothing.
pub async fn apply(service: &RbacService, file: &SeedFile) -> Result<SeedReport, RbacError> {
    let mut report = SeedReport::default();
    let mut ids: HashMap<String, RoleId> = HashMap::new();

    for seed in &file.roles {
        if let Some(existing) = service
            .find_roles(&RoleFilter::by_name(seed.name.as_str()))
            .await?
            .pop()
        {
            ids.insert(seed.name.clone(), existing.id);
            continue;
        }

        let parent_id = match &seed.parent {
            Some(parent) => Some(lookup_role(service, &mut ids, parent).await?.ok_or_else(
                || {
                    RbacError::InvalidSeed(format!(
                        "role `{}` names unknown parent `{}`",
                        seed.name, parent
                    ))
                },
            )?),
            None => None,
        };

        let role = service
            .create_role(NewRole {
                name: seed.name.clone(),
                description: seed.description.clone(),
                parent_id,
            })
            .await?
            .ok_or_else(|| {
                RbacError::InvalidSeed(format!("parent of role `{}` disappeared", seed.name))
            })?;
        ids.insert(seed.name.clone(), role.id);
        report.roles_created += 1;
    }

    for seed in &file.permissions {
        if !is_valid_route_path(&seed.path) {
            return Err(RbacError::InvalidSeed(format!(
                "invalid route path `{}`",
                seed.path
            )));
        }

        let mut roles = Vec::with_capacity(seed.roles.len());
        for name in &seed.roles {
            let id = lookup_role(service, &mut ids, name).await?.ok_or_else(|| {
                RbacError::InvalidSeed(format!(
                    "permission `{} {}` names unknown role `{}`",
                    seed.method, seed.path, name
                ))
            })?;
            roles.push(id);
        }

        let route = Route::new(seed.path.clone(), seed.method);
        match service.find_permission_by_route(&route).await? {
            Some(existing) => {
                service
                    .add_roles_for_permission_by_id(&existing.id, &roles)
                    .await?;
            }
            None => {
                service
                    .create_entry(NewPermission {
                        route,
                        name: seed.name.clone(),
                        roles: Some(roles),
                    })
                    .await?;
                report.permissions_created += 1;
            }
        }
    }

    tracing::info!(
        roles = report.roles_created,
        permissions = report.permissions_created,
        "Applied seed file"
    );
    Ok(report)
}

async fn lookup_role(
    service: &RbacService,
    ids: &mut HashMap<String, RoleId>,
    name: &str,
) -> Result<Option<RoleId>, RbacError> {
    if let Some(id) = ids.get(name) {
        return Ok(Some(id.clone()));
    }
    let found = service.find_roles(&RoleFilter::by_name(name)).await?.pop();
    if let Some(role) = &found {
        ids.insert(name.to_string(), role.id.clone());
    }
    Ok(found.map(|r| r.id))
}
