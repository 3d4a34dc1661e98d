//! Permission resolution
//!
//! - [`permissions`]: permission sets and the unified role-or-permission check
//! - [`cache`]: TTL-bounded cache of resolved permission sets per principal

pub mod cache;
pub mod permissions;

pub use cache::{CacheEntry, PermissionCache};
pub use permissions::{PermissionSet, Requirement};
