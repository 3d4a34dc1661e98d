use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AccessCodeStore, LiveInsert, QuotaStore, SessionStore};
use crate::access_code::{AccessCode, CodeRejection};
use crate::error::{GateError, Result};
use crate::principal::PrincipalId;
use crate::quota::{QuotaWindow, WindowType};
use crate::session::AccessSession;

/// In-memory quota windows
#[derive(Default)]
pub struct MemoryQuotaStore {
    windows: Arc<RwLock<HashMap<(PrincipalId, WindowType), QuotaWindow>>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load_windows(&self, principal: &PrincipalId) -> Result<Vec<QuotaWindow>> {
        let windows = self.windows.read().await;
        Ok(WindowType::ALL
            .iter()
            .filter_map(|w| windows.get(&(principal.clone(), *w)).cloned())
            .collect())
    }

    async fn save_windows(&self, rows: &[QuotaWindow]) -> Result<()> {
        let mut windows = self.windows.write().await;
        for row in rows {
            windows.insert((row.principal_id.clone(), row.window_type), row.clone());
        }
        Ok(())
    }
}

/// In-memory sessions
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, AccessSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_live(&self, session: &AccessSession) -> Result<LiveInsert> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions
            .values()
            .find(|s| s.principal_id == session.principal_id && s.status.is_live())
        {
            return Ok(LiveInsert::Existing(existing.clone()));
        }
        sessions.insert(session.id, session.clone());
        Ok(LiveInsert::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AccessSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn find_live(&self, principal: &PrincipalId) -> Result<Option<AccessSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|s| &s.principal_id == principal && s.status.is_live())
            .cloned())
    }

    async fn update_live(&self, session: &AccessSession) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(stored) if stored.status.is_live() => {
                *stored = session.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GateError::NotFound(format!("session {}", session.id))),
        }
    }

    async fn live_for_code(&self, code: &str) -> Result<Vec<AccessSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.access_code.as_deref() == Some(code) && s.status.is_live())
            .cloned()
            .collect())
    }

    async fn list(&self, principal: Option<&PrincipalId>) -> Result<Vec<AccessSession>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<AccessSession> = sessions
            .values()
            .filter(|s| principal.map(|p| &s.principal_id == p).unwrap_or(true))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }
}

/// In-memory access codes
#[derive(Default)]
pub struct MemoryCodeStore {
    codes: Arc<RwLock<HashMap<String, AccessCode>>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessCodeStore for MemoryCodeStore {
    async fn insert(&self, code: &AccessCode) -> Result<()> {
        let mut codes = self.codes.write().await;
        if codes.contains_key(&code.code) {
            return Err(GateError::Conflict("access code already exists".to_string()));
        }
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<AccessCode>> {
        let codes = self.codes.read().await;
        Ok(codes.get(code).cloned())
    }

    async fn take_use(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<AccessCode, CodeRejection>> {
        let mut codes = self.codes.write().await;
        let Some(stored) = codes.get_mut(code) else {
            return Ok(Err(CodeRejection::NotFound));
        };
        if let Some(rejection) = stored.rejection(now) {
            return Ok(Err(rejection));
        }
        stored.uses_remaining -= 1;
        Ok(Ok(stored.clone()))
    }

    async fn restore_use(&self, code: &str) -> Result<()> {
        let mut codes = self.codes.write().await;
        if let Some(stored) = codes.get_mut(code) {
            stored.uses_remaining = (stored.uses_remaining + 1).min(stored.max_uses);
        }
        Ok(())
    }

    async fn deactivate(&self, code: &str) -> Result<bool> {
        let mut codes = self.codes.write().await;
        match codes.get_mut(code) {
            Some(stored) => {
                stored.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<AccessCode>> {
        let codes = self.codes.read().await;
        let mut all: Vec<AccessCode> = codes.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_code::NewAccessCode;
    use crate::principal::Principal;
    use crate::session::SessionStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_one_live_session_per_principal() {
        let store = MemorySessionStore::new();
        let principal = Principal::user("alice", "user");

        let first = AccessSession::start(&principal, None, now());
        assert!(matches!(store.insert_live(&first).await.unwrap(), LiveInsert::Inserted));

        let second = AccessSession::start(&principal, None, now());
        match store.insert_live(&second).await.unwrap() {
            LiveInsert::Existing(existing) => assert_eq!(existing.id, first.id),
            LiveInsert::Inserted => panic!("second live session inserted"),
        }

        let mut ended = first.clone();
        ended.end(SessionStatus::Terminated, now());
        assert!(store.update_live(&ended).await.unwrap());
        assert!(matches!(store.insert_live(&second).await.unwrap(), LiveInsert::Inserted));
    }

    #[tokio::test]
    async fn test_update_live_refuses_terminal_rows() {
        let store = MemorySessionStore::new();
        let mut session = AccessSession::start(&Principal::user("alice", "user"), None, now());
        store.insert_live(&session).await.unwrap();

        session.end(SessionStatus::Expired, now());
        assert!(store.update_live(&session).await.unwrap());

        let mut revived = session.clone();
        revived.status = SessionStatus::Active;
        revived.ended_at = None;
        assert!(!store.update_live(&revived).await.unwrap());
        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_take_use_until_exhausted() {
        let store = MemoryCodeStore::new();
        let code = NewAccessCode {
            code: Some("TWICE".to_string()),
            data_quota_mb: 10.0,
            time_quota_minutes: 10,
            max_uses: 2,
            valid_for_minutes: 60,
        }
        .build(now())
        .unwrap();
        store.insert(&code).await.unwrap();

        assert_eq!(store.take_use("TWICE", now()).await.unwrap().unwrap().uses_remaining, 1);
        assert_eq!(store.take_use("TWICE", now()).await.unwrap().unwrap().uses_remaining, 0);
        assert_eq!(
            store.take_use("TWICE", now()).await.unwrap(),
            Err(CodeRejection::Exhausted)
        );
        assert_eq!(
            store.take_use("NOPE", now()).await.unwrap(),
            Err(CodeRejection::NotFound)
        );

        store.restore_use("TWICE").await.unwrap();
        store.restore_use("TWICE").await.unwrap();
        store.restore_use("TWICE").await.unwrap();
        assert_eq!(store.get("TWICE").await.unwrap().unwrap().uses_remaining, 2);
    }
}
