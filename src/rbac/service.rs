//! The only write path into the role graph.
//!
//! Each public mutation runs in a single database transaction. Dropping the
//! transaction without committing rolls every write back, so an early `?`
//! leaves the graph untouched. After a commit the shared snapshot is
//! refreshed so request-time decisions see the change.

use std::collections::HashSet;
use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};

use crate::entities::{permission, role};
use crate::rbac::errors::RbacError;
use crate::rbac::registry::RouteRegistry;
use crate::rbac::snapshot::SnapshotCache;
use crate::rbac::types::{
    NewPermission, NewRole, Permission, PermissionFilter, PermissionId, Role, RoleFilter,
    RoleId, Route, UpdatePermission, UpdateRole,
};
use crate::storage;

#[derive(Clone)]
pub struct RbacService {
    db: DatabaseConnection,
    cache: Arc<SnapshotCache>,
}

impl RbacService {
    pub fn new(db: DatabaseConnection, cache: Arc<SnapshotCache>) -> Self {
        Self { db, cache }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    async fn refresh_snapshot(&self) {
        if let Err(e) = self.cache.reload(&self.db).await {
            self.cache.invalidate();
            tracing::error!(error = %e, "Failed to refresh authorization snapshot after mutation");
        }
    }

    // ---------- Roles ----------

    /// Returns `None` when `parent_id` does not name an existing role.
    pub async fn create_role(&self, input: NewRole) -> Result<Option<Role>, RbacError> {
        let txn = self.db.begin().await?;

        let parents = match &input.parent_id {
            Some(parent_id) => match storage::find_role_model(&txn, parent_id).await? {
                Some(parent) => chain_through(parent_id, &parent)?,
                None => {
                    tracing::debug!(%parent_id, "Parent role not found, role not created");
                    return Ok(None);
                }
            },
            None => Vec::new(),
        };

        let model = storage::insert_role(
            &txn,
            &input.name,
            input.description,
            input.parent_id.as_ref(),
            &parents,
        )
        .await?;
        txn.commit().await?;

        tracing::info!(role_id = %model.id, name = %model.name, "Created role");
        self.refresh_snapshot().await;

        Ok(Some(Role {
            id: RoleId(model.id),
            name: model.name,
            description: model.description,
            parents,
            permissions: Vec::new(),
            parent_id: input.parent_id,
        }))
    }

    /// Scalars are always written. The hierarchy only changes when the new
    /// parent differs from the role itself and from its current parent,
    /// exists, and does not already descend from the role.
    pub async fn update_role_by_id(
        &self,
        id: &RoleId,
        input: UpdateRole,
    ) -> Result<Option<Role>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(model) = storage::find_role_model(&txn, id).await? else {
            return Ok(None);
        };
        let current_parents = storage::parse_parents(&model)?;
        let model = storage::update_role_fields(&txn, model, &input.name, input.description).await?;

        if let Some(new_parent) = &input.parent_id {
            if new_parent != id && current_parents.first() != Some(new_parent) {
                reparent(&txn, model, id, new_parent).await?;
            }
        }

        txn.commit().await?;
        tracing::info!(role_id = %id, "Updated role");
        self.refresh_snapshot().await;

        storage::find_role(&self.db, id).await
    }

    pub async fn delete_role_by_id(&self, id: &RoleId) -> Result<Option<Role>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(model) = storage::find_role_model(&txn, id).await? else {
            return Ok(None);
        };
        let deleted = delete_role_in(&txn, model).await?;

        txn.commit().await?;
        tracing::info!(role_id = %id, "Deleted role");
        self.refresh_snapshot().await;

        Ok(Some(deleted))
    }

    /// Deletes every matching role with the same cleanup as
    /// [`Self::delete_role_by_id`]. Returns the number of roles removed.
    pub async fn delete_role(&self, filter: &RoleFilter) -> Result<u64, RbacError> {
        let txn = self.db.begin().await?;

        let ids: Vec<RoleId> = storage::find_role_models(&txn, filter)
            .await?
            .into_iter()
            .map(|m| RoleId(m.id))
            .collect();

        let mut deleted = 0;
        for id in &ids {
            // Re-read: an earlier deletion in this loop may have truncated it.
            if let Some(model) = storage::find_role_model(&txn, id).await? {
                delete_role_in(&txn, model).await?;
                deleted += 1;
            }
        }

        txn.commit().await?;
        tracing::info!(count = deleted, "Deleted roles");
        self.refresh_snapshot().await;

        Ok(deleted)
    }

    pub async fn find_role_by_id(&self, id: &RoleId) -> Result<Option<Role>, RbacError> {
        storage::find_role(&self.db, id).await
    }

    pub async fn find_roles(&self, filter: &RoleFilter) -> Result<Vec<Role>, RbacError> {
        storage::find_roles(&self.db, filter).await
    }

    // ---------- Permissions ----------

    /// Role ids that do not resolve are dropped from the association.
    pub async fn create_entry(&self, input: NewPermission) -> Result<Permission, RbacError> {
        let txn = self.db.begin().await?;

        let model = storage::insert_permission(&txn, &input.route, input.name).await?;
        let permission_id = PermissionId(model.id.clone());

        let roles = match &input.roles {
            Some(requested) => {
                let resolved = storage::resolve_role_ids(&txn, requested).await?;
                for role_id in &resolved {
                    storage::add_edge(&txn, role_id, &permission_id).await?;
                }
                resolved
            }
            None => Vec::new(),
        };

        txn.commit().await?;
        tracing::info!(
            permission_id = %permission_id,
            route = %input.route,
            roles = roles.len(),
            "Created permission"
        );
        self.refresh_snapshot().await;

        Ok(Permission {
            id: permission_id,
            route: input.route,
            name: model.name,
            roles,
        })
    }

    pub async fn update_permission_by_id(
        &self,
        id: &PermissionId,
        input: UpdatePermission,
    ) -> Result<Option<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(model) = storage::find_permission_model(&txn, id).await? else {
            return Ok(None);
        };
        storage::rename_permission(&txn, model, input.name).await?;

        txn.commit().await?;
        self.refresh_snapshot().await;

        storage::find_permission(&self.db, id).await
    }

    /// Makes the permission's role set exactly the resolvable subset of `roles`.
    pub async fn set_roles_for_permission_by_id(
        &self,
        id: &PermissionId,
        roles: &[RoleId],
    ) -> Result<Option<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(model) = storage::find_permission_model(&txn, id).await? else {
            return Ok(None);
        };
        let resolved = storage::resolve_role_ids(&txn, roles).await?;
        replace_roles_in(&txn, &model, &resolved).await?;

        txn.commit().await?;
        tracing::info!(permission_id = %id, roles = resolved.len(), "Replaced permission roles");
        self.refresh_snapshot().await;

        storage::find_permission(&self.db, id).await
    }

    /// Unknown permission ids are skipped.
    pub async fn set_roles_for_permission_by_ids(
        &self,
        ids: &[PermissionId],
        roles: &[RoleId],
    ) -> Result<Vec<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let models =
            storage::find_permission_models(&txn, &PermissionFilter::by_ids(ids.to_vec())).await?;
        let resolved = storage::resolve_role_ids(&txn, roles).await?;
        for model in &models {
            replace_roles_in(&txn, model, &resolved).await?;
        }

        txn.commit().await?;
        tracing::info!(
            permissions = models.len(),
            roles = resolved.len(),
            "Replaced roles on permissions"
        );
        self.refresh_snapshot().await;

        let found = models.into_iter().map(|m| PermissionId(m.id)).collect();
        storage::find_permissions(&self.db, &PermissionFilter::by_ids(found)).await
    }

    /// Union only: existing associations are never removed.
    pub async fn add_roles_for_permission_by_id(
        &self,
        id: &PermissionId,
        roles: &[RoleId],
    ) -> Result<Option<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(model) = storage::find_permission_model(&txn, id).await? else {
            return Ok(None);
        };
        let resolved = storage::resolve_role_ids(&txn, roles).await?;
        add_roles_in(&txn, &model, &resolved).await?;

        txn.commit().await?;
        tracing::info!(permission_id = %id, roles = resolved.len(), "Added roles to permission");
        self.refresh_snapshot().await;

        storage::find_permission(&self.db, id).await
    }

    pub async fn add_roles_for_permission_by_ids(
        &self,
        ids: &[PermissionId],
        roles: &[RoleId],
    ) -> Result<Vec<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let models =
            storage::find_permission_models(&txn, &PermissionFilter::by_ids(ids.to_vec())).await?;
        let resolved = storage::resolve_role_ids(&txn, roles).await?;
        for model in &models {
            add_roles_in(&txn, model, &resolved).await?;
        }

        txn.commit().await?;
        self.refresh_snapshot().await;

        let found = models.into_iter().map(|m| PermissionId(m.id)).collect();
        storage::find_permissions(&self.db, &PermissionFilter::by_ids(found)).await
    }

    pub async fn delete_permission_by_id(
        &self,
        id: &PermissionId,
    ) -> Result<Option<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let Some(existing) = storage::find_permission(&txn, id).await? else {
            return Ok(None);
        };
        delete_permission_in(&txn, id).await?;

        txn.commit().await?;
        tracing::info!(permission_id = %id, route = %existing.route, "Deleted permission");
        self.refresh_snapshot().await;

        Ok(Some(existing))
    }

    pub async fn delete_permission_by_ids(&self, ids: &[PermissionId]) -> Result<u64, RbacError> {
        self.delete_permission(&PermissionFilter::by_ids(ids.to_vec()))
            .await
    }

    pub async fn delete_permission(&self, filter: &PermissionFilter) -> Result<u64, RbacError> {
        let txn = self.db.begin().await?;

        let models = storage::find_permission_models(&txn, filter).await?;
        for model in &models {
            delete_permission_in(&txn, &PermissionId(model.id.clone())).await?;
        }

        txn.commit().await?;
        tracing::info!(count = models.len(), "Deleted permissions");
        self.refresh_snapshot().await;

        Ok(models.len() as u64)
    }

    pub async fn find_permission_by_id(
        &self,
        id: &PermissionId,
    ) -> Result<Option<Permission>, RbacError> {
        storage::find_permission(&self.db, id).await
    }

    pub async fn find_permission_by_route(
        &self,
        route: &Route,
    ) -> Result<Option<Permission>, RbacError> {
        Ok(
            storage::find_permissions(&self.db, &PermissionFilter::by_route(route))
                .await?
                .pop(),
        )
    }

    pub async fn find_permissions(
        &self,
        filter: &PermissionFilter,
    ) -> Result<Vec<Permission>, RbacError> {
        storage::find_permissions(&self.db, filter).await
    }

    /// Creates an unrestricted permission for every registered route that
    /// has none yet. Existing permissions are left alone.
    pub async fn sync_registry(
        &self,
        registry: &RouteRegistry,
    ) -> Result<Vec<Permission>, RbacError> {
        let txn = self.db.begin().await?;

        let mut seen = HashSet::new();
        let mut created = Vec::new();
        for def in registry.routes() {
            let route = def.route();
            if !seen.insert(route.clone()) {
                continue;
            }
            let existing =
                storage::find_permission_models(&txn, &PermissionFilter::by_route(&route)).await?;
            if !existing.is_empty() {
                continue;
            }
            let model = storage::insert_permission(&txn, &route, def.description.clone()).await?;
            created.push(Permission {
                id: PermissionId(model.id),
                route,
                name: model.name,
                roles: Vec::new(),
            });
        }

        txn.commit().await?;
        tracing::info!(created = created.len(), "Synchronized permissions with route registry");
        self.refresh_snapshot().await;

        Ok(created)
    }
}

/// `[parent_id] ++ parent.parents`
fn chain_through(parent_id: &RoleId, parent: &role::Model) -> Result<Vec<RoleId>, RbacError> {
    let mut chain = vec![parent_id.clone()];
    chain.extend(storage::parse_parents(parent)?);
    Ok(chain)
}

async fn reparent<C: ConnectionTrait>(
    db: &C,
    model: role::Model,
    id: &RoleId,
    new_parent: &RoleId,
) -> Result<(), RbacError> {
    let Some(parent) = storage::find_role_model(db, new_parent).await? else {
        tracing::debug!(role_id = %id, parent_id = %new_parent, "New parent not found, hierarchy unchanged");
        return Ok(());
    };
    let parent_chain = storage::parse_parents(&parent)?;
    if parent_chain.contains(id) {
        tracing::info!(role_id = %id, parent_id = %new_parent, "Reparent would create a cycle, hierarchy unchanged");
        return Ok(());
    }

    let chain = chain_through(new_parent, &parent)?;

    // Descendants keep their chain up to and including this role, then take
    // the new chain.
    for descendant in storage::find_descendant_models(db, id).await? {
        let mut parents = storage::parse_parents(&descendant)?;
        let Some(idx) = parents.iter().position(|p| p == id) else {
            continue;
        };
        parents.truncate(idx + 1);
        parents.extend(chain.iter().cloned());
        let parent_id = descendant.parent_id.clone().map(RoleId);
        storage::set_role_ancestry(db, descendant, parent_id.as_ref(), &parents).await?;
    }

    storage::set_role_ancestry(db, model, Some(new_parent), &chain).await?;
    tracing::info!(role_id = %id, parent_id = %new_parent, "Reparented role");
    Ok(())
}

async fn delete_role_in<C: ConnectionTrait>(db: &C, model: role::Model) -> Result<Role, RbacError> {
    let id = RoleId(model.id.clone());
    let deleted = storage::roles_from_models(db, vec![model])
        .await?
        .pop()
        .ok_or_else(|| sea_orm::DbErr::RecordNotFound(id.0.clone()))?;

    storage::remove_edges_for_role(db, &id).await?;

    // Descendants lose the deleted role and every ancestor after it.
    for descendant in storage::find_descendant_models(db, &id).await? {
        let mut parents = storage::parse_parents(&descendant)?;
        let Some(idx) = parents.iter().position(|p| *p == id) else {
            continue;
        };
        parents.truncate(idx);
        let parent_id = descendant
            .parent_id
            .clone()
            .filter(|p| *p != id.0)
            .map(RoleId);
        storage::set_role_ancestry(db, descendant, parent_id.as_ref(), &parents).await?;
    }

    storage::delete_role_row(db, &id).await?;
    Ok(deleted)
}

async fn replace_roles_in<C: ConnectionTrait>(
    db: &C,
    model: &permission::Model,
    resolved: &[RoleId],
) -> Result<(), RbacError> {
    let permission_id = PermissionId(model.id.clone());
    let previous = storage::role_ids_for_permission(db, &permission_id).await?;

    for role_id in resolved {
        storage::add_edge(db, role_id, &permission_id).await?;
    }
    let keep: HashSet<&RoleId> = resolved.iter().collect();
    for role_id in previous.iter().filter(|r| !keep.contains(r)) {
        storage::remove_edge(db, role_id, &permission_id).await?;
    }
    Ok(())
}

async fn add_roles_in<C: ConnectionTrait>(
    db: &C,
    model: &permission::Model,
    resolved: &[RoleId],
) -> Result<(), RbacError> {
    let permission_id = PermissionId(model.id.clone());
    for role_id in resolved {
        storage::add_edge(db, role_id, &permission_id).await?;
    }
    Ok(())
}

async fn delete_permission_in<C: ConnectionTrait>(
    db: &C,
    id: &PermissionId,
) -> Result<(), RbacError> {
    storage::remove_edges_for_permission(db, id).await?;
    storage::delete_permission_row(db, id).await
}
