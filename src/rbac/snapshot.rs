use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use sea_orm::ConnectionTrait;

use crate::rbac::errors::RbacError;
use crate::rbac::types::{HttpVerb, Permission, PermissionFilter, Role, RoleFilter, RoleId};
use crate::storage;

/// Immutable view of the whole role graph used for request-time decisions.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub roles: HashMap<RoleId, Role>,
    /// (route pattern, method) -> permission
    pub permissions: HashMap<(String, HttpVerb), Permission>,
    pub generation: u64,
    pub loaded_at: i64,
}

impl Snapshot {
    pub fn from_parts(roles: Vec<Role>, permissions: Vec<Permission>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
            permissions: permissions
                .into_iter()
                .map(|p| ((p.route.path.clone(), p.route.method), p))
                .collect(),
            generation: 0,
            loaded_at: Utc::now().timestamp(),
        }
    }

    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, RbacError> {
        let roles = storage::find_roles(db, &RoleFilter::default()).await?;
        let permissions = storage::find_permissions(db, &PermissionFilter::default()).await?;
        let snapshot = Self::from_parts(roles, permissions);

        tracing::info!(
            roles = snapshot.roles.len(),
            permissions = snapshot.permissions.len(),
            "Loaded authorization snapshot"
        );

        Ok(snapshot)
    }

    pub fn permission_for(&self, path: &str, method: HttpVerb) -> Option<&Permission> {
        self.permissions.get(&(path.to_string(), method))
    }

    pub fn role(&self, id: &RoleId) -> Option<&Role> {
        self.roles.get(id)
    }
}

/// Process-wide holder of the current [`Snapshot`]. Readers never block.
#[derive(Debug)]
pub struct SnapshotCache {
    current: ArcSwap<Snapshot>,
    generation: AtomicU64,
    stale: AtomicBool,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(Snapshot::default())
    }
}

impl SnapshotCache {
    pub fn new(snapshot: Snapshot) -> Self {
        let cache = Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            generation: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        };
        cache.replace(snapshot);
        cache
    }

    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, RbacError> {
        Ok(Self::new(Snapshot::load(db).await?))
    }

    /// Rebuild from the database and swap it in. The previous snapshot stays
    /// current if loading fails or a load that started later has already
    /// been installed.
    pub async fn reload<C: ConnectionTrait>(&self, db: &C) -> Result<u64, RbacError> {
        // The ticket is taken before reading so a slow load that saw older
        // rows can never replace one that started after it.
        let ticket = self.next_generation();
        let snapshot = Snapshot::load(db).await?;
        self.install(ticket, snapshot);
        Ok(self.current.load().generation)
    }

    /// Install `snapshot` and return its generation.
    pub fn replace(&self, snapshot: Snapshot) -> u64 {
        let ticket = self.next_generation();
        self.install(ticket, snapshot);
        self.current.load().generation
    }

    /// Reserve the generation for a snapshot about to be built.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store `snapshot` under `ticket` unless a newer generation is already
    /// current. Returns whether it was installed.
    pub fn install(&self, ticket: u64, mut snapshot: Snapshot) -> bool {
        snapshot.generation = ticket;
        let candidate = Arc::new(snapshot);
        let previous = self.current.rcu(|current| {
            if current.generation < ticket {
                Arc::clone(&candidate)
            } else {
                Arc::clone(current)
            }
        });
        let installed = previous.generation < ticket;
        if installed {
            self.stale.store(false, Ordering::SeqCst);
        } else {
            tracing::debug!(
                ticket,
                current = previous.generation,
                "Discarding snapshot older than the current one"
            );
        }
        installed
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Mark the snapshot as out of date. Cleared by the next successful
    /// install; the reload job logs a warning while it is set.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}
