//! Unified identity for registered users and guests

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a user or guest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identifier for a guest created by code redemption
    pub fn new_guest() -> Self {
        Self(format!("guest-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Guest,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Guest => "guest",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PrincipalKind::User),
            "guest" => Some(PrincipalKind::Guest),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity subject to quota and permission checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    User {
        id: PrincipalId,
        role: String,
        is_active: bool,
    },
    Guest {
        id: PrincipalId,
        access_code: String,
    },
}

impl Principal {
    pub fn user(id: impl Into<PrincipalId>, role: impl Into<String>) -> Self {
        Principal::User {
            id: id.into(),
            role: role.into(),
            is_active: true,
        }
    }

    pub fn guest(id: PrincipalId, access_code: impl Into<String>) -> Self {
        Principal::Guest {
            id,
            access_code: access_code.into(),
        }
    }

    pub fn id(&self) -> &PrincipalId {
        match self {
            Principal::User { id, .. } | Principal::Guest { id, .. } => id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User { .. } => PrincipalKind::User,
            Principal::Guest { .. } => PrincipalKind::Guest,
        }
    }

    pub fn access_code(&self) -> Option<&str> {
        match self {
            Principal::User { .. } => None,
            Principal::Guest { access_code, .. } => Some(access_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_ids_are_unique() {
        let a = PrincipalId::new_guest();
        let b = PrincipalId::new_guest();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("guest-"));
    }

    #[test]
    fn test_principal_accessors() {
        let user = Principal::user("alice", "staff");
        assert_eq!(user.id().as_str(), "alice");
        assert_eq!(user.kind(), PrincipalKind::User);
        assert_eq!(user.access_code(), None);

        let guest = Principal::guest(PrincipalId::new("guest-1"), "GUEST001");
        assert_eq!(guest.kind(), PrincipalKind::Guest);
        assert_eq!(guest.access_code(), Some("GUEST001"));
    }

    #[test]
    fn test_kind_round_trip_strings() {
        assert_eq!(PrincipalKind::from_str("user"), Some(PrincipalKind::User));
        assert_eq!(PrincipalKind::from_str("guest"), Some(PrincipalKind::Guest));
        assert_eq!(PrincipalKind::from_str("admin"), None);
    }
}
