use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RoleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(pub String);

impl PermissionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PermissionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PermissionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// HTTP methods a permission can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            HttpVerb::Get => "get",
            HttpVerb::Post => "post",
            HttpVerb::Put => "put",
            HttpVerb::Delete => "delete",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "get" => Some(HttpVerb::Get),
            "post" => Some(HttpVerb::Post),
            "put" => Some(HttpVerb::Put),
            "delete" => Some(HttpVerb::Delete),
            _ => None,
        }
    }

    /// Maps a request method; anything outside the four verbs yields `None`.
    pub fn from_method(method: &axum::http::Method) -> Option<Self> {
        match *method {
            axum::http::Method::GET => Some(HttpVerb::Get),
            axum::http::Method::POST => Some(HttpVerb::Post),
            axum::http::Method::PUT => Some(HttpVerb::Put),
            axum::http::Method::DELETE => Some(HttpVerb::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_value())
    }
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpVerb::from_db_value(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unsupported http method `{s}`"))
    }
}

/// A route pattern such as `/jobs/{id}` plus its method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub method: HttpVerb,
}

impl Route {
    pub fn new(path: impl Into<String>, method: HttpVerb) -> Self {
        Self {
            path: path.into(),
            method,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    /// Cached ancestor chain, nearest first: `[parent_id] ++ parent.parents`.
    pub parents: Vec<RoleId>,
    pub permissions: Vec<PermissionId>,
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub route: Route,
    pub name: Option<String>,
    pub roles: Vec<RoleId>,
}

// ---------- Mutation inputs ----------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Reparent target. `None` leaves the hierarchy untouched.
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPermission {
    pub route: Route,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<RoleId>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePermission {
    #[serde(default)]
    pub name: Option<String>,
}

// ---------- Query filters ----------

/// Every field that is set must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleFilter {
    #[serde(default)]
    pub ids: Option<Vec<RoleId>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

impl RoleFilter {
    pub fn by_ids(ids: Vec<RoleId>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionFilter {
    #[serde(default)]
    pub ids: Option<Vec<PermissionId>>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub method: Option<HttpVerb>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PermissionFilter {
    pub fn by_ids(ids: Vec<PermissionId>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn by_route(route: &Route) -> Self {
        Self {
            path: Some(route.path.clone()),
            method: Some(route.method),
            ..Default::default()
        }
    }
}

// ---------- Request context ----------

/// Identity attached to a request by the upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    /// Already-resolved active role.
    pub role: Option<RoleId>,
}
