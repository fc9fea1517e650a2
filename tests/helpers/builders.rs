use routegate::rbac::{
    HttpVerb, NewPermission, NewRole, Permission, RbacService, Role, RoleId, Route,
};

/// Builder for creating test roles
pub struct RoleBuilder {
    name: String,
    description: Option<String>,
    parent_id: Option<RoleId>,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            parent_id: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn child_of(mut self, parent: &Role) -> Self {
        self.parent_id = Some(parent.id.clone());
        self
    }

    pub async fn create(self, service: &RbacService) -> Role {
        service
            .create_role(NewRole {
                name: self.name,
                description: self.description,
                parent_id: self.parent_id,
            })
            .await
            .expect("Failed to create test role")
            .expect("Parent role not found")
    }
}

/// Builder for creating test permissions
pub struct PermissionBuilder {
    route: Route,
    name: Option<String>,
    roles: Option<Vec<RoleId>>,
}

impl PermissionBuilder {
    pub fn new(path: &str, method: HttpVerb) -> Self {
        Self {
            route: Route::new(path, method),
            name: None,
            roles: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn granted_to(mut self, roles: &[&Role]) -> Self {
        self.roles = Some(roles.iter().map(|r| r.id.clone()).collect());
        self
    }

    pub fn with_role_ids(mut self, roles: Vec<RoleId>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub async fn create(self, service: &RbacService) -> Permission {
        service
            .create_entry(NewPermission {
                route: self.route,
                name: self.name,
                roles: self.roles,
            })
            .await
            .expect("Failed to create test permission")
    }
}
