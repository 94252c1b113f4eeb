//! JWT claims and staff roles.

use serde::{Deserialize, Serialize};

/// Permission required to read and answer support conversations.
pub const CHATS_PERMISSION: &str = "chats";

/// Staff role, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Support staff; capabilities come from explicit permissions.
    #[default]
    Staff,
    /// Administrator.
    Admin,
    /// Owner account.
    Superadmin,
}

impl Role {
    /// Whether this role implies every permission.
    pub fn has_all_permissions(&self) -> bool {
        matches!(self, Role::Admin | Role::Superadmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Staff => write!(f, "staff"),
            Role::Admin => write!(f, "admin"),
            Role::Superadmin => write!(f, "superadmin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (staff ID).
    pub sub: String,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Staff email.
    #[serde(default)]
    pub email: Option<String>,

    /// Staff display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Custom role claim (alternative to roles array).
    #[serde(default)]
    pub role: Option<String>,

    /// Granted permissions, e.g. `chats`.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Claims {
    /// Highest role present in `role` or `roles`.
    pub fn effective_role(&self) -> Role {
        self.role
            .iter()
            .chain(self.roles.iter())
            .filter_map(|r| r.parse::<Role>().ok())
            .max()
            .unwrap_or_default()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.effective_role().has_all_permissions()
            || self
                .permissions
                .iter()
                .any(|p| p.eq_ignore_ascii_case(permission))
    }

    /// Whether the credential allows acting on support conversations.
    pub fn can_manage_chats(&self) -> bool {
        self.has_permission(CHATS_PERMISSION)
    }

    /// Whether the credential has expired at `now` (Unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}
