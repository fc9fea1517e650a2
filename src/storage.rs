//! Row-level access to the role graph tables.
//!
//! Everything here is generic over `ConnectionTrait` so the same helpers run
//! against a plain connection or inside a transaction. Only
//! [`crate::rbac::service::RbacService`] calls the write helpers.

use std::collections::{HashMap, HashSet};

use base64ct::Encoding;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, Database,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Select, Set,
};

use crate::entities::{permission, role, role_permission};
use crate::errors::GateError;
use crate::rbac::errors::RbacError;
use crate::rbac::types::{
    HttpVerb, Permission, PermissionFilter, PermissionId, Role, RoleFilter, RoleId, Route,
};
use crate::settings::Database as DbCfg;

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, GateError> {
    let db = Database::connect(&cfg.url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

// ---------- Roles ----------

fn role_select(filter: &RoleFilter) -> Select<role::Entity> {
    use role::{Column, Entity};

    let mut query = Entity::find();
    if let Some(ids) = &filter.ids {
        query = query.filter(Column::Id.is_in(ids.iter().map(|id| id.0.clone())));
    }
    if let Some(name) = &filter.name {
        query = query.filter(Column::Name.eq(name.as_str()));
    }
    if let Some(parent_id) = &filter.parent_id {
        query = query.filter(Column::ParentId.eq(parent_id.as_str()));
    }
    query.order_by_asc(Column::CreatedAt).order_by_asc(Column::Id)
}

pub async fn find_role_models<C: ConnectionTrait>(
    db: &C,
    filter: &RoleFilter,
) -> Result<Vec<role::Model>, RbacError> {
    Ok(role_select(filter).all(db).await?)
}

pub async fn find_role_model<C: ConnectionTrait>(
    db: &C,
    id: &RoleId,
) -> Result<Option<role::Model>, RbacError> {
    Ok(role::Entity::find_by_id(id.0.clone()).one(db).await?)
}

pub fn parse_parents(model: &role::Model) -> Result<Vec<RoleId>, RbacError> {
    Ok(serde_json::from_str(&model.parents)?)
}

/// Assemble domain roles from rows, attaching their permission edges.
pub async fn roles_from_models<C: ConnectionTrait>(
    db: &C,
    models: Vec<role::Model>,
) -> Result<Vec<Role>, RbacError> {
    use role_permission::{Column, Entity};

    if models.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
    let edges = Entity::find()
        .filter(Column::RoleId.is_in(ids))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;

    let mut by_role: HashMap<String, Vec<PermissionId>> = HashMap::new();
    for edge in edges {
        by_role
            .entry(edge.role_id)
            .or_default()
            .push(PermissionId(edge.permission_id));
    }

    models
        .into_iter()
        .map(|model| -> Result<Role, RbacError> {
            let parents = parse_parents(&model)?;
            let permissions = by_role.remove(&model.id).unwrap_or_default();
            Ok(Role {
                id: RoleId(model.id),
                name: model.name,
                description: model.description,
                parents,
                permissions,
                parent_id: model.parent_id.map(RoleId),
            })
        })
        .collect()
}

pub async fn find_roles<C: ConnectionTrait>(
    db: &C,
    filter: &RoleFilter,
) -> Result<Vec<Role>, RbacError> {
    let models = find_role_models(db, filter).await?;
    roles_from_models(db, models).await
}

pub async fn find_role<C: ConnectionTrait>(
    db: &C,
    id: &RoleId,
) -> Result<Option<Role>, RbacError> {
    let Some(model) = find_role_model(db, id).await? else {
        return Ok(None);
    };
    Ok(roles_from_models(db, vec![model]).await?.pop())
}

pub async fn insert_role<C: ConnectionTrait>(
    db: &C,
    name: &str,
    description: Option<String>,
    parent_id: Option<&RoleId>,
    parents: &[RoleId],
) -> Result<role::Model, RbacError> {
    let model = role::ActiveModel {
        id: Set(random_id()),
        name: Set(name.to_string()),
        description: Set(description),
        parent_id: Set(parent_id.map(|p| p.0.clone())),
        parents: Set(serde_json::to_string(parents)?),
        created_at: Set(Utc::now().timestamp()),
    };
    Ok(model.insert(db).await?)
}

pub async fn update_role_fields<C: ConnectionTrait>(
    db: &C,
    model: role::Model,
    name: &str,
    description: Option<String>,
) -> Result<role::Model, RbacError> {
    let mut active: role::ActiveModel = model.into();
    active.name = Set(name.to_string());
    active.description = Set(description);
    Ok(active.update(db).await?)
}

pub async fn set_role_ancestry<C: ConnectionTrait>(
    db: &C,
    model: role::Model,
    parent_id: Option<&RoleId>,
    parents: &[RoleId],
) -> Result<role::Model, RbacError> {
    let mut active: role::ActiveModel = model.into();
    active.parent_id = Set(parent_id.map(|p| p.0.clone()));
    active.parents = Set(serde_json::to_string(parents)?);
    Ok(active.update(db).await?)
}

/// Roles whose cached ancestor chain contains `id`.
pub async fn find_descendant_models<C: ConnectionTrait>(
    db: &C,
    id: &RoleId,
) -> Result<Vec<role::Model>, RbacError> {
    use role::{Column, Entity};

    // LIKE narrows the scan; ids may contain `_`, so confirm on the parsed chain.
    let candidates = Entity::find()
        .filter(Column::Parents.contains(format!("\"{}\"", id.0)))
        .all(db)
        .await?;

    let mut descendants = Vec::with_capacity(candidates.len());
    for model in candidates {
        if model.id != id.0 && parse_parents(&model)?.contains(id) {
            descendants.push(model);
        }
    }
    Ok(descendants)
}

pub async fn delete_role_row<C: ConnectionTrait>(db: &C, id: &RoleId) -> Result<(), RbacError> {
    role::Entity::delete_by_id(id.0.clone()).exec(db).await?;
    Ok(())
}

// ---------- Permissions ----------

fn permission_select(filter: &PermissionFilter) -> Select<permission::Entity> {
    use permission::{Column, Entity};

    let mut query = Entity::find();
    if let Some(ids) = &filter.ids {
        query = query.filter(Column::Id.is_in(ids.iter().map(|id| id.0.clone())));
    }
    if let Some(path) = &filter.path {
        query = query.filter(Column::Path.eq(path.as_str()));
    }
    if let Some(method) = filter.method {
        query = query.filter(Column::Method.eq(method.as_db_value()));
    }
    if let Some(name) = &filter.name {
        query = query.filter(Column::Name.eq(name.as_str()));
    }
    query.order_by_asc(Column::CreatedAt).order_by_asc(Column::Id)
}

pub async fn find_permission_models<C: ConnectionTrait>(
    db: &C,
    filter: &PermissionFilter,
) -> Result<Vec<permission::Model>, RbacError> {
    Ok(permission_select(filter).all(db).await?)
}

pub async fn find_permission_model<C: ConnectionTrait>(
    db: &C,
    id: &PermissionId,
) -> Result<Option<permission::Model>, RbacError> {
    Ok(permission::Entity::find_by_id(id.0.clone()).one(db).await?)
}

pub async fn permissions_from_models<C: ConnectionTrait>(
    db: &C,
    models: Vec<permission::Model>,
) -> Result<Vec<Permission>, RbacError> {
    use role_permission::{Column, Entity};

    if models.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
    let edges = Entity::find()
        .filter(Column::PermissionId.is_in(ids))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;

    let mut by_permission: HashMap<String, Vec<RoleId>> = HashMap::new();
    for edge in edges {
        by_permission
            .entry(edge.permission_id)
            .or_default()
            .push(RoleId(edge.role_id));
    }

    models
        .into_iter()
        .map(|model| -> Result<Permission, RbacError> {
            let method = HttpVerb::from_db_value(&model.method).ok_or_else(|| {
                sea_orm::DbErr::Type(format!(
                    "permission {} has unknown method `{}`",
                    model.id, model.method
                ))
            })?;
            let roles = by_permission.remove(&model.id).unwrap_or_default();
            Ok(Permission {
                id: PermissionId(model.id),
                route: Route::new(model.path, method),
                name: model.name,
                roles,
            })
        })
        .collect()
}

pub async fn find_permissions<C: ConnectionTrait>(
    db: &C,
    filter: &PermissionFilter,
) -> Result<Vec<Permission>, RbacError> {
    let models = find_permission_models(db, filter).await?;
    permissions_from_models(db, models).await
}

pub async fn find_permission<C: ConnectionTrait>(
    db: &C,
    id: &PermissionId,
) -> Result<Option<Permission>, RbacError> {
    let Some(model) = find_permission_model(db, id).await? else {
        return Ok(None);
    };
    Ok(permissions_from_models(db, vec![model]).await?.pop())
}

pub async fn insert_permission<C: ConnectionTrait>(
    db: &C,
    route: &Route,
    name: Option<String>,
) -> Result<permission::Model, RbacError> {
    let model = permission::ActiveModel {
        id: Set(random_id()),
        path: Set(route.path.clone()),
        method: Set(route.method.as_db_value().to_string()),
        name: Set(name),
        created_at: Set(Utc::now().timestamp()),
    };
    Ok(model.insert(db).await?)
}

pub async fn rename_permission<C: ConnectionTrait>(
    db: &C,
    model: permission::Model,
    name: Option<String>,
) -> Result<permission::Model, RbacError> {
    let mut active: permission::ActiveModel = model.into();
    active.name = Set(name);
    Ok(active.update(db).await?)
}

pub async fn delete_permission_row<C: ConnectionTrait>(
    db: &C,
    id: &PermissionId,
) -> Result<(), RbacError> {
    permission::Entity::delete_by_id(id.0.clone()).exec(db).await?;
    Ok(())
}

// ---------- Edges ----------

/// Keep only the ids that name existing roles, preserving request order and
/// dropping duplicates.
pub async fn resolve_role_ids<C: ConnectionTrait>(
    db: &C,
    requested: &[RoleId],
) -> Result<Vec<RoleId>, RbacError> {
    if requested.is_empty() {
        return Ok(Vec::new());
    }
    let existing: HashSet<String> = role::Entity::find()
        .filter(role::Column::Id.is_in(requested.iter().map(|id| id.0.clone())))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.id)
        .collect();

    let mut seen = HashSet::new();
    Ok(requested
        .iter()
        .filter(|id| existing.contains(&id.0) && seen.insert(id.0.clone()))
        .cloned()
        .collect())
}

pub async fn role_ids_for_permission<C: ConnectionTrait>(
    db: &C,
    permission_id: &PermissionId,
) -> Result<Vec<RoleId>, RbacError> {
    use role_permission::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::PermissionId.eq(permission_id.as_str()))
        .order_by_asc(Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(|edge| RoleId(edge.role_id))
        .collect())
}

/// Insert the edge unless it already exists. Returns whether a row was added.
pub async fn add_edge<C: ConnectionTrait>(
    db: &C,
    role_id: &RoleId,
    permission_id: &PermissionId,
) -> Result<bool, RbacError> {
    use role_permission::{Column, Entity};

    let existing = Entity::find()
        .filter(Column::RoleId.eq(role_id.as_str()))
        .filter(Column::PermissionId.eq(permission_id.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let edge = role_permission::ActiveModel {
        id: NotSet,
        role_id: Set(role_id.0.clone()),
        permission_id: Set(permission_id.0.clone()),
    };
    edge.insert(db).await?;
    Ok(true)
}

pub async fn remove_edge<C: ConnectionTrait>(
    db: &C,
    role_id: &RoleId,
    permission_id: &PermissionId,
) -> Result<(), RbacError> {
    use role_permission::{Column, Entity};

    Entity::delete_many()
        .filter(Column::RoleId.eq(role_id.as_str()))
        .filter(Column::PermissionId.eq(permission_id.as_str()))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn remove_edges_for_role<C: ConnectionTrait>(
    db: &C,
    role_id: &RoleId,
) -> Result<u64, RbacError> {
    use role_permission::{Column, Entity};

    let res = Entity::delete_many()
        .filter(Column::RoleId.eq(role_id.as_str()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn remove_edges_for_permission<C: ConnectionTrait>(
    db: &C,
    permission_id: &PermissionId,
) -> Result<u64, RbacError> {
    use role_permission::{Column, Entity};

    let res = Entity::delete_many()
        .filter(Column::PermissionId.eq(permission_id.as_str()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
