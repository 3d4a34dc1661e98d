use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{AccessSession, QuotaCeiling, SessionStart, SessionStatus, TerminationCause};
use crate::clock::Clock;
use crate::config::{DuplicateStart, SessionConfig};
use crate::error::{DenyReason, GateError, Result};
use crate::locks::KeyedLocks;
use crate::principal::{Principal, PrincipalId};
use crate::quota::{DataMb, QuotaPolicies, QuotaStatus, Usage};
use crate::store::{LiveInsert, SessionStore};

/// Outcome of a usage report
#[derive(Debug, Clone, Serialize)]
pub struct UsageReceipt {
    pub session: AccessSession,
    /// Status right after recording; the session is flagged on its next check
    pub quota: QuotaStatus,
}

/// Drives session transitions
///
/// Every transition on one session runs under that session's lock, and writes
/// go through [`SessionStore::update_live`] so a session another writer has
/// already ended stays ended.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    policies: QuotaPolicies,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    locks: KeyedLocks,
}

fn session_key(id: Uuid) -> String {
    format!("session:{}", id)
}

fn principal_key(id: &PrincipalId) -> String {
    format!("principal:{}", id)
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        policies: QuotaPolicies,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            policies,
            clock,
            config,
            locks: KeyedLocks::new(),
        }
    }

    async fn load(&self, id: Uuid) -> Result<AccessSession> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("session {}", id)))
    }

    /// Write back, or return the stored row if it went terminal meanwhile.
    ///
    /// `charged` is usage already committed to the quota policy for this
    /// transition. It is refunded when the write fails or is discarded.
    async fn persist(
        &self,
        session: AccessSession,
        charged: Option<Usage>,
    ) -> Result<AccessSession> {
        let written = self.store.update_live(&session).await;
        if matches!(written, Ok(true)) {
            return Ok(session);
        }
        if let Some(usage) = charged {
            let policy = self.policies.for_session(&session);
            if let Err(e) = policy.refund(&session, usage).await {
                error!(session_id = %session.id, "Failed to refund quota usage: {}", e);
            }
        }
        written?;
        debug!(session_id = %session.id, "Session ended concurrently, keeping stored state");
        self.load(session.id).await
    }

    /// Account connected time, then apply expiry and quota rules to an
    /// active session. Nothing is written to the session store.
    ///
    /// Returns the usage charged to the quota policy, if any.
    async fn advance(
        &self,
        session: &mut AccessSession,
        now: DateTime<Utc>,
    ) -> Result<Option<Usage>> {
        if session.status != SessionStatus::Active {
            return Ok(None);
        }
        let policy = self.policies.for_session(session);
        let max = self.config.max_duration(session.kind);

        if session.elapsed(now) > max {
            let minutes = session.accrue_minutes(now.min(session.started_at + max));
            let charged = (minutes > 0).then_some(Usage::Minutes(minutes));
            if let Some(usage) = charged {
                policy.record(session, usage).await?;
            }
            session.end(SessionStatus::Expired, now);
            info!(
                session_id = %session.id,
                principal = %session.principal_id,
                "Session expired"
            );
            return Ok(charged);
        }

        let minutes = session.accrue_minutes(now);
        let charged = (minutes > 0).then_some(Usage::Minutes(minutes));
        let status = match charged {
            Some(usage) => policy.record(session, usage).await?,
            None => policy.evaluate(session).await?,
        };

        match status {
            QuotaStatus::Exceeded(scope) => {
                session.end(SessionStatus::QuotaExceeded, now);
                warn!(
                    session_id = %session.id,
                    principal = %session.principal_id,
                    quota = %scope,
                    "Session stopped, quota exceeded"
                );
            }
            QuotaStatus::Ok => session.last_active_at = now,
        }
        Ok(charged)
    }

    fn on_duplicate(&self, existing: AccessSession) -> Result<SessionStart> {
        match self.config.duplicate_start {
            DuplicateStart::Reuse => {
                debug!(
                    session_id = %existing.id,
                    principal = %existing.principal_id,
                    "Reusing live session"
                );
                Ok(SessionStart {
                    session: existing,
                    created: false,
                })
            }
            DuplicateStart::Reject => Err(GateError::Conflict(format!(
                "principal {} already has a live session",
                existing.principal_id
            ))),
        }
    }

    /// Start a session, or hand back the principal's live one
    pub async fn start(
        &self,
        principal: &Principal,
        ceiling: Option<QuotaCeiling>,
    ) -> Result<SessionStart> {
        let _guard = self.locks.lock(&principal_key(principal.id())).await;

        if let Some(existing) = self.store.find_live(principal.id()).await? {
            // A stale session may have run past its limits since the last check
            let existing = self.check(existing.id).await?;
            if existing.status.is_live() {
                return self.on_duplicate(existing);
            }
        }

        let session = AccessSession::start(principal, ceiling, self.clock.now());
        match self.store.insert_live(&session).await? {
            LiveInsert::Inserted => {
                info!(
                    session_id = %session.id,
                    principal = %session.principal_id,
                    kind = %session.kind,
                    "Session started"
                );
                Ok(SessionStart {
                    session,
                    created: true,
                })
            }
            LiveInsert::Existing(existing) => self.on_duplicate(existing),
        }
    }

    /// Per-request evaluation: expiry, then quota, else mark activity.
    ///
    /// Paused and terminal sessions are returned unchanged.
    pub async fn check(&self, id: Uuid) -> Result<AccessSession> {
        let _guard = self.locks.lock(&session_key(id)).await;
        let mut session = self.load(id).await?;
        if session.status != SessionStatus::Active {
            return Ok(session);
        }

        let now = self.clock.now();
        let charged = self.advance(&mut session, now).await?;
        self.persist(session, charged).await
    }

    /// Record data transferred by an active session
    pub async fn record_usage(&self, id: Uuid, data: DataMb) -> Result<UsageReceipt> {
        let usage = Usage::Data(data);
        usage.validate()?;

        let _guard = self.locks.lock(&session_key(id)).await;
        let mut session = self.load(id).await?;
        match session.status {
            SessionStatus::Active => {}
            SessionStatus::Paused => return Err(GateError::denied(DenyReason::SessionPaused)),
            status => return Err(GateError::denied(DenyReason::SessionTerminal(status))),
        }

        let now = self.clock.now();
        session.data_used = session.data_used.saturating_add(data);
        let quota = self.policies.for_session(&session).record(&session, usage).await?;
        session.last_active_at = now;

        debug!(
            session_id = %session.id,
            data_mb = data.as_mb(),
            total_mb = session.data_used.as_mb(),
            "Usage recorded"
        );
        let session = self.persist(session, Some(usage)).await?;
        Ok(UsageReceipt { session, quota })
    }

    /// Suspend time accounting. Pausing a paused session is a no-op.
    pub async fn pause(&self, id: Uuid) -> Result<AccessSession> {
        let _guard = self.locks.lock(&session_key(id)).await;
        let mut session = self.load(id).await?;
        if session.status == SessionStatus::Paused {
            return Ok(session);
        }

        let now = self.clock.now();
        let charged = self.advance(&mut session, now).await?;
        if session.status == SessionStatus::Active {
            session.status = SessionStatus::Paused;
            info!(session_id = %session.id, "Session paused");
        }

        let session = self.persist(session, charged).await?;
        match session.status {
            SessionStatus::Paused => Ok(session),
            status => Err(GateError::denied(DenyReason::SessionTerminal(status))),
        }
    }

    /// Resume a paused session. Resuming an active session is a no-op.
    pub async fn resume(&self, id: Uuid) -> Result<AccessSession> {
        let _guard = self.locks.lock(&session_key(id)).await;
        let mut session = self.load(id).await?;

        let now = self.clock.now();
        if session.status == SessionStatus::Paused {
            session.status = SessionStatus::Active;
            // Paused time is not connected time
            session.accrued_until = now;
            info!(session_id = %session.id, "Session resumed");
        }
        let charged = self.advance(&mut session, now).await?;

        let session = self.persist(session, charged).await?;
        match session.status {
            SessionStatus::Active => Ok(session),
            status => Err(GateError::denied(DenyReason::SessionTerminal(status))),
        }
    }

    /// End a live session. Terminating a terminal session returns it unchanged.
    pub async fn terminate(&self, id: Uuid, cause: TerminationCause) -> Result<AccessSession> {
        let _guard = self.locks.lock(&session_key(id)).await;
        let mut session = self.load(id).await?;
        if session.status.is_terminal() {
            return Ok(session);
        }

        let now = self.clock.now();
        let minutes = session.accrue_minutes(now);
        let charged = (minutes > 0).then_some(Usage::Minutes(minutes));
        if let Some(usage) = charged {
            self.policies
                .for_session(&session)
                .record(&session, usage)
                .await?;
        }
        session.end(SessionStatus::Terminated, now);
        info!(
            session_id = %session.id,
            principal = %session.principal_id,
            cause = %cause,
            "Session terminated"
        );
        self.persist(session, charged).await
    }

    /// Terminate every live session redeemed from `code`
    pub async fn terminate_for_code(&self, code: &str, cause: TerminationCause) -> Result<usize> {
        let live = self.store.live_for_code(code).await?;
        let mut ended = 0;
        for session in live {
            if self.terminate(session.id, cause).await?.status == SessionStatus::Terminated {
                ended += 1;
            }
        }
        Ok(ended)
    }

    pub async fn get(&self, id: Uuid) -> Result<AccessSession> {
        self.load(id).await
    }

    pub async fn find_live(&self, principal: &PrincipalId) -> Result<Option<AccessSession>> {
        self.store.find_live(principal).await
    }

    /// Sessions newest first, optionally for one principal
    pub async fn list(&self, principal: Option<&PrincipalId>) -> Result<Vec<AccessSession>> {
        self.store.list(principal).await
    }

    /// Drop lock entries nobody holds
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quota::{QuotaLedger, QuotaScope, WindowType};
    use crate::store::{MemoryQuotaStore, MemorySessionStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose writes can be switched to fail
    #[derive(Default)]
    struct FlakySessionStore {
        inner: MemorySessionStore,
        fail_updates: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakySessionStore {
        async fn insert_live(&self, session: &AccessSession) -> Result<LiveInsert> {
            self.inner.insert_live(session).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<AccessSession>> {
            self.inner.get(id).await
        }

        async fn find_live(&self, principal: &PrincipalId) -> Result<Option<AccessSession>> {
            self.inner.find_live(principal).await
        }

        async fn update_live(&self, session: &AccessSession) -> Result<bool> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(GateError::Storage("disk full".to_string()));
            }
            self.inner.update_live(session).await
        }

        async fn live_for_code(&self, code: &str) -> Result<Vec<AccessSession>> {
            self.inner.live_for_code(code).await
        }

        async fn list(&self, principal: Option<&PrincipalId>) -> Result<Vec<AccessSession>> {
            self.inner.list(principal).await
        }
    }

    struct Fixture {
        manager: Arc<SessionManager>,
        ledger: Arc<QuotaLedger>,
        clock: ManualClock,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
    }

    fn fixture_with(config: SessionConfig) -> Fixture {
        fixture_on(Arc::new(MemorySessionStore::new()), config)
    }

    fn fixture_on(store: Arc<dyn SessionStore>, config: SessionConfig) -> Fixture {
        let clock = ManualClock::new(t0());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let ledger = Arc::new(QuotaLedger::with_defaults(
            Arc::new(MemoryQuotaStore::new()),
            shared_clock.clone(),
        ));
        let manager = Arc::new(SessionManager::new(
            store,
            QuotaPolicies::new(ledger.clone()),
            shared_clock,
            config,
        ));
        Fixture {
            manager,
            ledger,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionConfig::default())
    }

    fn alice() -> Principal {
        Principal::user("alice", "user")
    }

    #[tokio::test]
    async fn test_expires_after_max_duration() {
        let f = fixture();
        let session = f.manager.start(&alice(), None).await.unwrap().session;

        f.clock.advance(Duration::minutes(480));
        let checked = f.manager.check(session.id).await.unwrap();
        assert_eq!(checked.status, SessionStatus::Active);

        f.clock.advance(Duration::minutes(1));
        let checked = f.manager.check(session.id).await.unwrap();
        assert_eq!(checked.status, SessionStatus::Expired);
        assert_eq!(checked.ended_at, Some(t0() + Duration::minutes(481)));
        assert_eq!(checked.time_used_minutes, 480);

        // Idempotent
        f.clock.advance(Duration::minutes(30));
        let again = f.manager.check(session.id).await.unwrap();
        assert_eq!(again, checked);
    }

    #[tokio::test]
    async fn test_quota_flagged_on_next_check() {
        let f = fixture();
        let session = f.manager.start(&alice(), None).await.unwrap().session;

        f.manager
            .record_usage(session.id, DataMb::whole(950))
            .await
            .unwrap();
        let receipt = f
            .manager
            .record_usage(session.id, DataMb::whole(100))
            .await
            .unwrap();
        assert_eq!(
            receipt.quota,
            QuotaStatus::Exceeded(QuotaScope::Window(WindowType::Daily))
        );
        assert_eq!(receipt.session.status, SessionStatus::Active);
        assert_eq!(receipt.session.data_used, DataMb::whole(1050));

        let checked = f.manager.check(session.id).await.unwrap();
        assert_eq!(checked.status, SessionStatus::QuotaExceeded);
        assert!(checked.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_is_sticky() {
        let f = fixture();
        let session = f.manager.start(&alice(), None).await.unwrap().session;

        let ended = f
            .manager
            .terminate(session.id, TerminationCause::Admin)
            .await
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Terminated);

        f.clock.advance(Duration::minutes(600));
        assert_eq!(f.manager.check(session.id).await.unwrap(), ended);
        assert!(f.manager.resume(session.id).await.is_err());
        assert!(f.manager.pause(session.id).await.is_err());
        assert!(f
            .manager
            .record_usage(session.id, DataMb::whole(1))
            .await
            .is_err());
        assert_eq!(f.manager.get(session.id).await.unwrap(), ended);
    }

    #[tokio::test]
    async fn test_paused_time_does_not_accrue() {
        let f = fixture();
        let session = f.manager.start(&alice(), None).await.unwrap().session;

        f.clock.advance(Duration::minutes(10));
        let paused = f.manager.pause(session.id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.time_used_minutes, 10);

        f.clock.advance(Duration::minutes(60));
        let resumed = f.manager.resume(session.id).await.unwrap();
        assert_eq!(resumed.time_used_minutes, 10);

        f.clock.advance(Duration::minutes(5));
        let checked = f.manager.check(session.id).await.unwrap();
        assert_eq!(checked.time_used_minutes, 15);

        let windows = f.ledger.snapshot(alice().id()).await.unwrap();
        assert!(windows.iter().all(|w| w.consumed_minutes == 15));
    }

    #[tokio::test]
    async fn test_paused_can_be_terminated() {
        let f = fixture();
        let session = f.manager.start(&alice(), None).await.unwrap().session;
        f.manager.pause(session.id).await.unwrap();

        let ended = f
            .manager
            .terminate(session.id, TerminationCause::Logout)
            .await
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_duplicate_start_reuses_or_rejects() {
        let f = fixture();
        let first = f.manager.start(&alice(), None).await.unwrap();
        assert!(first.created);
        let second = f.manager.start(&alice(), None).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.session.id, first.session.id);

        let f = fixture_with(SessionConfig {
            duplicate_start: DuplicateStart::Reject,
            ..SessionConfig::default()
        });
        f.manager.start(&alice(), None).await.unwrap();
        let err = f.manager.start(&alice(), None).await.unwrap_err();
        assert!(matches!(err, GateError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_replaces_stale_session() {
        let f = fixture();
        let first = f.manager.start(&alice(), None).await.unwrap().session;

        f.clock.advance(Duration::minutes(500));
        let second = f.manager.start(&alice(), None).await.unwrap();
        assert!(second.created);
        assert_ne!(second.session.id, first.id);
        assert_eq!(
            f.manager.get(first.id).await.unwrap().status,
            SessionStatus::Expired
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_yield_one_live_session() {
        let f = fixture();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = f.manager.clone();
            handles.push(tokio::spawn(async move {
                manager.start(&alice(), None).await.unwrap().session.id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let live: Vec<_> = f
            .manager
            .list(Some(alice().id()))
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect();
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ledger_unchanged() {
        let store = Arc::new(FlakySessionStore::default());
        let f = fixture_on(store.clone(), SessionConfig::default());
        let session = f.manager.start(&alice(), None).await.unwrap().session;
        f.manager
            .record_usage(session.id, DataMb::whole(100))
            .await
            .unwrap();
        let before = f.ledger.snapshot(alice().id()).await.unwrap();

        store.fail_updates.store(true, Ordering::SeqCst);
        let err = f
            .manager
            .record_usage(session.id, DataMb::whole(200))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Storage(_)));
        assert_eq!(f.ledger.snapshot(alice().id()).await.unwrap(), before);

        f.clock.advance(Duration::minutes(30));
        assert!(f.manager.check(session.id).await.is_err());
        assert!(f
            .manager
            .terminate(session.id, TerminationCause::Admin)
            .await
            .is_err());
        assert_eq!(f.ledger.snapshot(alice().id()).await.unwrap(), before);

        // The next successful write charges the minutes exactly once
        store.fail_updates.store(false, Ordering::SeqCst);
        let checked = f.manager.check(session.id).await.unwrap();
        assert_eq!(checked.data_used, DataMb::whole(100));
        assert_eq!(checked.time_used_minutes, 30);
        let windows = f.ledger.snapshot(alice().id()).await.unwrap();
        assert!(windows
            .iter()
            .all(|w| w.consumed_data == DataMb::whole(100) && w.consumed_minutes == 30));
    }
}
