//! Permission sets and the single requirement predicate
//!
//! Role checks and permission-string checks are evaluated together in
//! [`Requirement::is_satisfied`]; callers never test roles on their own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Permissions granted to a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSet {
    /// Super-privilege: every permission is granted
    All,
    Granted(BTreeSet<String>),
}

impl PermissionSet {
    pub fn empty() -> Self {
        PermissionSet::Granted(BTreeSet::new())
    }

    pub fn from_iter<I, S>(perms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionSet::Granted(perms.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, permission: &str) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Granted(set) => set.contains(permission),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PermissionSet::All)
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            PermissionSet::All => None,
            PermissionSet::Granted(set) => Some(set.len()),
        }
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a gated resource demands: any listed permission OR any listed role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    permissions: Vec<String>,
    roles: Vec<String>,
}

impl Requirement {
    pub fn permission(permission: impl Into<String>) -> Self {
        Self {
            permissions: vec![permission.into()],
            roles: Vec::new(),
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self {
            permissions: Vec::new(),
            roles: vec![role.into()],
        }
    }

    pub fn or_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn or_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn is_satisfied(&self, role: &str, granted: &PermissionSet) -> bool {
        if granted.is_all() {
            return true;
        }
        if self.permissions.is_empty() && self.roles.is_empty() {
            return true;
        }
        self.permissions.iter().any(|p| granted.contains(p))
            || self.roles.iter().any(|r| r == role)
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .permissions
            .iter()
            .map(|p| p.to_string())
            .chain(self.roles.iter().map(|r| format!("role:{}", r)))
            .collect();
        f.write_str(&parts.join(" | "))
    }
}
