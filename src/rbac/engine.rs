use crate::rbac::snapshot::Snapshot;
use crate::rbac::types::{HttpVerb, RoleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit(PermitReason),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitReason {
    /// No permission is configured for the route, or it lists no roles.
    Unrestricted,
    DirectGrant,
    Inherited,
    DevelopmentBypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingRole,
    NotGranted,
}

/// Decide whether `caller_role` may call `method path`, where `path` is the
/// route pattern (`/jobs/{id}`), not the concrete request path.
pub fn decide(
    snapshot: &Snapshot,
    path: &str,
    method: HttpVerb,
    caller_role: Option<&RoleId>,
) -> Decision {
    let Some(permission) = snapshot.permission_for(path, method) else {
        return Decision::Permit(PermitReason::Unrestricted);
    };
    if permission.roles.is_empty() {
        return Decision::Permit(PermitReason::Unrestricted);
    }

    let Some(role_id) = caller_role else {
        return Decision::Deny(DenyReason::MissingRole);
    };

    if permission.roles.contains(role_id) {
        return Decision::Permit(PermitReason::DirectGrant);
    }

    // A role unknown to the snapshot has no ancestors to inherit through.
    let inherited = snapshot
        .role(role_id)
        .map(|role| role.parents.iter().any(|p| permission.roles.contains(p)))
        .unwrap_or(false);
    if inherited {
        return Decision::Permit(PermitReason::Inherited);
    }

    Decision::Deny(DenyReason::NotGranted)
}
