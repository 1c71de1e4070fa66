//! Caller roles.
//!
//! Roles form a closed set. The hierarchy rank mirrors how the login flow
//! grades users: guest < patient < provider < admin.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse permission label attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Provider,
    Patient,
    #[default]
    Guest,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Provider, Role::Patient, Role::Guest];

    /// Parse a role label, ignoring case and surrounding whitespace
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "provider" => Some(Self::Provider),
            "patient" => Some(Self::Patient),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }

    /// Parse a role label exactly as issued by the login flow (lowercase, no padding)
    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Provider => "provider",
            Self::Patient => "patient",
            Self::Guest => "guest",
        }
    }

    /// Position in the role hierarchy (higher is more privileged)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Guest => 0,
            Self::Patient => 1,
            Self::Provider => 2,
            Self::Admin => 3,
        }
    }

    /// True if this role ranks at least as high as `other`
    pub fn at_least(&self, other: Role) -> bool {
        self.rank() >= other.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join roles with commas, in the given order
pub fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(Role::from_str("admin"), Some(Role::Admin));
        assert_eq!(Role::from_str("Provider"), Some(Role::Provider));
        assert_eq!(Role::from_str(" PATIENT "), Some(Role::Patient));
        assert_eq!(Role::from_str("guest"), Some(Role::Guest));
        assert_eq!(Role::from_str("superuser"), None);
        assert_eq!(Role::from_str(""), None);
    }

    #[test]
    fn test_from_label_is_exact() {
        assert_eq!(Role::from_label("admin"), Some(Role::Admin));
        assert_eq!(Role::from_label("guest"), Some(Role::Guest));
        assert_eq!(Role::from_label("ADMIN"), None);
        assert_eq!(Role::from_label(" admin "), None);
        assert_eq!(Role::from_label("Provider"), None);
    }

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
    }

    #[test]
    fn test_hierarchy() {
        assert!(Role::Admin.at_least(Role::Provider));
        assert!(Role::Provider.at_least(Role::Patient));
        assert!(Role::Patient.at_least(Role::Patient));
        assert!(!Role::Patient.at_least(Role::Provider));
        assert!(!Role::Guest.at_least(Role::Patient));
    }

    #[test]
    fn test_default_is_guest() {
        assert_eq!(Role::default(), Role::Guest);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Role::Provider).unwrap();
        assert_eq!(json, "\"provider\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_join_roles() {
        assert_eq!(join_roles(&[Role::Provider, Role::Admin]), "provider,admin");
        assert_eq!(join_roles(&[Role::Admin]), "admin");
        assert_eq!(join_roles(&[]), "");
    }
}
