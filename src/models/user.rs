//! User and role entities.
//!
//! Users are provisioned just-in-time on first Firebase authentication and
//! are soft-deleted only. Roles are seeded by the initial migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric role level carried by every authenticated request
///
/// Levels follow the seeded `roles.level` column: `user = 0`,
/// `superadmin = 1`, `admin = 2`. Because the numbering is not monotonic
/// in privilege, admin checks use [`RoleLevel::is_admin`] rather than a
/// numeric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum RoleLevel {
    User = 0,
    SuperAdmin = 1,
    Admin = 2,
}

impl RoleLevel {
    /// Parse a stored numeric level
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Self::User),
            1 => Some(Self::SuperAdmin),
            2 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Parse a role name (`user`, `admin`, `superadmin`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "superadmin" | "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Canonical role name
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "superadmin",
        }
    }

    /// Whether this level passes the admin gate
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

impl From<RoleLevel> for i16 {
    fn from(level: RoleLevel) -> Self {
        level.as_i16()
    }
}

impl TryFrom<i16> for RoleLevel {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::from_level(value as i64).ok_or_else(|| format!("unknown role level {value}"))
    }
}

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub level: i16,
}

/// User entity, joined with its role
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Stable identifier
    pub id: Uuid,

    /// Unique among non-deleted users
    pub email: String,

    /// Local password hash (random for federated users)
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub full_name: String,

    pub phone: Option<String>,

    pub avatar_url: Option<String>,

    pub role_id: Option<Uuid>,

    /// Joined `roles.name`
    pub role_name: Option<String>,

    /// Joined `roles.level`
    pub role_level: Option<i16>,

    pub is_active: bool,

    pub is_verified: bool,

    pub email_verified_at: Option<DateTime<Utc>>,

    pub last_login_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Role derived from the joined role row, if any
    pub fn role(&self) -> Option<RoleLevel> {
        self.role_level
            .and_then(|level| RoleLevel::from_level(level as i64))
            .or_else(|| self.role_name.as_deref().and_then(RoleLevel::from_name))
    }

    /// Whether the stored full name is a placeholder
    pub fn has_placeholder_name(&self) -> bool {
        let name = self.full_name.trim();
        name.is_empty() || name == DEFAULT_FULL_NAME
    }
}

/// Full name given to provisioned users without a display name
pub const DEFAULT_FULL_NAME: &str = "User";

/// Values for a freshly provisioned user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
}

/// Profile fields reconciled from identity claims
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.phone.is_none() && self.avatar_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_levels() {
        assert_eq!(RoleLevel::from_level(0), Some(RoleLevel::User));
        assert_eq!(RoleLevel::from_level(1), Some(RoleLevel::SuperAdmin));
        assert_eq!(RoleLevel::from_level(2), Some(RoleLevel::Admin));
        assert_eq!(RoleLevel::from_level(3), None);

        assert!(RoleLevel::Admin.is_admin());
        assert!(RoleLevel::SuperAdmin.is_admin());
        assert!(!RoleLevel::User.is_admin());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(RoleLevel::from_name("Admin"), Some(RoleLevel::Admin));
        assert_eq!(RoleLevel::from_name("superadmin"), Some(RoleLevel::SuperAdmin));
        assert_eq!(RoleLevel::from_name("guest"), None);
        assert_eq!(RoleLevel::SuperAdmin.name(), "superadmin");
    }

    #[test]
    fn test_role_level_serializes_as_number() {
        let json = serde_json::to_string(&RoleLevel::Admin).unwrap();
        assert_eq!(json, "2");
        let back: RoleLevel = serde_json::from_str("1").unwrap();
        assert_eq!(back, RoleLevel::SuperAdmin);
    }
}
