use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrgRole {
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    /// Admin includes Editor which includes Viewer
    pub fn includes(self, other: OrgRole) -> bool {
        self >= other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Viewer" => Ok(OrgRole::Viewer),
            "Editor" => Ok(OrgRole::Editor),
            "Admin" => Ok(OrgRole::Admin),
            other => Err(format!("Invalid org role: {}", other)),
        }
    }
}

/// User id of callers that are not a person: minted API keys and the
/// bootstrap key. Such callers own no stored OAuth token.
pub const SERVICE_ACCOUNT_USER_ID: i64 = 0;

/// Caller identity attached to every API request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedInUser {
    pub user_id: i64,
    pub org_id: i64,
    pub login: String,
    pub org_role: OrgRole,
    pub is_anonymous: bool,
}

impl SignedInUser {
    pub fn anonymous(org_id: i64, org_role: OrgRole) -> Self {
        Self {
            user_id: SERVICE_ACCOUNT_USER_ID,
            org_id,
            login: String::new(),
            org_role,
            is_anonymous: true,
        }
    }

    pub fn is_service_account(&self) -> bool {
        !self.is_anonymous && self.user_id == SERVICE_ACCOUNT_USER_ID
    }

    pub fn has_role(&self, role: OrgRole) -> bool {
        self.org_role.includes(role)
    }
}

/// OAuth token stored for a user by the login flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAuth {
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Unix timestamp (seconds)
    pub expiry: i64,
}
