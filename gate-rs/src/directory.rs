//! External collaborators: identity store and role/permission graph
//!
//! The engine only consumes these through traits. [`StaticDirectory`] is an
//! in-process implementation seeded from configuration.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::authz::PermissionSet;
use crate::config::GateConfig;
use crate::error::Result;
use crate::principal::PrincipalId;

/// Account state as held by the identity store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: String,
    pub is_active: bool,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up a registered user; `None` when unknown
    async fn fetch(&self, id: &PrincipalId) -> Result<Option<Identity>>;
}

#[async_trait]
pub trait RoleGraph: Send + Sync {
    /// Resolve a role to its permissions; unknown roles resolve to nothing
    async fn resolve(&self, role: &str) -> Result<PermissionSet>;
}

/// In-memory identity store and role graph
#[derive(Clone, Default)]
pub struct StaticDirectory {
    users: Arc<RwLock<HashMap<PrincipalId, Identity>>>,
    roles: Arc<RwLock<HashMap<String, PermissionSet>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GateConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| {
                (
                    PrincipalId::new(u.id.clone()),
                    Identity {
                        role: u.role.clone(),
                        is_active: u.active,
                    },
                )
            })
            .collect();
        let roles = config
            .roles
            .permissions
            .iter()
            .map(|(role, perms)| (role.clone(), PermissionSet::from_iter(perms.iter().cloned())))
            .collect();

        Self {
            users: Arc::new(RwLock::new(users)),
            roles: Arc::new(RwLock::new(roles)),
        }
    }

    pub async fn set_user(&self, id: impl Into<PrincipalId>, role: &str, is_active: bool) {
        let mut users = self.users.write().await;
        users.insert(
            id.into(),
            Identity {
                role: role.to_string(),
                is_active,
            },
        );
    }

    pub async fn set_role<I, S>(&self, role: &str, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roles = self.roles.write().await;
        roles.insert(role.to_string(), PermissionSet::from_iter(permissions));
    }
}

#[async_trait]
impl IdentityStore for StaticDirectory {
    async fn fetch(&self, id: &PrincipalId) -> Result<Option<Identity>> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }
}

#[async_trait]
impl RoleGraph for StaticDirectory {
    async fn resolve(&self, role: &str) -> Result<PermissionSet> {
        let roles = self.roles.read().await;
        let resolved = roles.get(role).cloned().unwrap_or_default();
        debug!(role, permissions = ?resolved.len(), "Resolved role");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_and_resolve() {
        let dir = StaticDirectory::new();
        dir.set_user("alice", "staff", true).await;
        dir.set_role("staff", ["internet:access"]).await;

        let alice = dir.fetch(&PrincipalId::new("alice")).await.unwrap().unwrap();
        assert_eq!(alice.role, "staff");
        assert!(alice.is_active);
        assert!(dir.fetch(&PrincipalId::new("bob")).await.unwrap().is_none());

        let perms = dir.resolve("staff").await.unwrap();
        assert!(perms.contains("internet:access"));
        assert_eq!(dir.resolve("nobody").await.unwrap(), PermissionSet::empty());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = GateConfig::default();
        let dir = StaticDirectory::from_config(&config);
        let guest = dir.resolve(&config.roles.guest_role).await.unwrap();
        assert!(guest.contains("internet:access"));
    }
}
