//! Persistence seams
//!
//! Each store is owned by exactly one component: quota windows by the
//! ledger, sessions by the session manager, access codes by the redeemer.
//!
//! - [`memory`]: process-local maps, for tests and single-node use
//! - [`sqlite`]: sqlx-backed tables

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::access_code::{AccessCode, CodeRejection};
use crate::error::Result;
use crate::principal::PrincipalId;
use crate::quota::QuotaWindow;
use crate::session::AccessSession;

pub use memory::{MemoryCodeStore, MemoryQuotaStore, MemorySessionStore};
pub use sqlite::SqliteStore;

/// Rows keyed by (principal, window type)
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load_windows(&self, principal: &PrincipalId) -> Result<Vec<QuotaWindow>>;

    /// Upsert all given windows as one unit
    async fn save_windows(&self, windows: &[QuotaWindow]) -> Result<()>;
}

/// Result of inserting a session under the one-live-session rule
#[derive(Debug, Clone)]
pub enum LiveInsert {
    Inserted,
    /// Another live session already holds the slot
    Existing(AccessSession),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert unless the principal already has an active or paused session
    async fn insert_live(&self, session: &AccessSession) -> Result<LiveInsert>;

    async fn get(&self, id: Uuid) -> Result<Option<AccessSession>>;

    async fn find_live(&self, principal: &PrincipalId) -> Result<Option<AccessSession>>;

    /// Write the session only if the stored row is still live.
    ///
    /// Returns false when another writer already moved it to a terminal state.
    async fn update_live(&self, session: &AccessSession) -> Result<bool>;

    async fn live_for_code(&self, code: &str) -> Result<Vec<AccessSession>>;

    async fn list(&self, principal: Option<&PrincipalId>) -> Result<Vec<AccessSession>>;
}

#[async_trait]
pub trait AccessCodeStore: Send + Sync {
    /// Fails with a conflict if the code already exists
    async fn insert(&self, code: &AccessCode) -> Result<()>;

    async fn get(&self, code: &str) -> Result<Option<AccessCode>>;

    /// Validate and consume one use as a single decrement-if-positive.
    ///
    /// Returns the code as it stands after the decrement, or why it was refused.
    async fn take_use(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<AccessCode, CodeRejection>>;

    /// Give back a use taken by a redemption that failed later on
    async fn restore_use(&self, code: &str) -> Result<()>;

    /// Returns false if the code does not exist
    async fn deactivate(&self, code: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<AccessCode>>;
}

/// The three stores the engine runs on
#[derive(Clone)]
pub struct Stores {
    pub quotas: Arc<dyn QuotaStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub codes: Arc<dyn AccessCodeStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            quotas: Arc::new(MemoryQuotaStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            codes: Arc::new(MemoryCodeStore::new()),
        }
    }

    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            quotas: store.clone(),
            sessions: store.clone(),
            codes: store,
        }
    }
}
