//! Authenticated session user.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Dashboard role of the authenticated user.
///
/// Parsed case-insensitively; unknown roles are kept verbatim in
/// [`Role::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Branch manager.
    Manager,
    /// Student counsellor.
    Counsellor,
    /// Platform administrator.
    Superadmin,
    /// Company director.
    Director,
    /// Any other role.
    Other(String),
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manager => "manager",
            Self::Counsellor => "counsellor",
            Self::Superadmin => "superadmin",
            Self::Director => "director",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Self::Manager,
            "counsellor" => Self::Counsellor,
            "superadmin" => Self::Superadmin,
            "director" => Self::Director,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_owned()
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated user a delivery session runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// User identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Dashboard role.
    pub role: Role,
}

impl SessionUser {
    /// Construct a user with no display name.
    #[must_use]
    pub fn new(id: impl Into<String>, role: impl Into<Role>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: role.into(),
        }
    }
}
