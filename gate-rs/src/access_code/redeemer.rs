use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::types::{AccessCode, NewAccessCode};
use crate::clock::Clock;
use crate::error::{DenyReason, GateError, Result};
use crate::principal::{Principal, PrincipalId, PrincipalKind};
use crate::session::{AccessSession, SessionManager, TerminationCause};
use crate::store::AccessCodeStore;
use crate::token::{TokenAuthority, TokenPair};

/// Everything a guest gets from a successful redemption
#[derive(Debug, Clone, Serialize)]
pub struct GuestPass {
    pub principal: Principal,
    pub session: AccessSession,
    pub tokens: TokenPair,
}

/// Sole writer of access code use counters
pub struct AccessCodeRedeemer {
    codes: Arc<dyn AccessCodeStore>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenAuthority>,
    clock: Arc<dyn Clock>,
}

impl AccessCodeRedeemer {
    pub fn new(
        codes: Arc<dyn AccessCodeStore>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenAuthority>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codes,
            sessions,
            tokens,
            clock,
        }
    }

    /// Consume one use of `code` and open a guest session capped by it.
    ///
    /// Every refusal is the same authorization error; the reason is only
    /// available through [`GateError::code_rejection`] and the logs.
    pub async fn redeem(&self, code: &str) -> Result<GuestPass> {
        let code = code.trim();
        let redacted = AccessCode::redacted(code);

        let taken = match self.codes.take_use(code, self.clock.now()).await? {
            Ok(taken) => taken,
            Err(reason) => {
                warn!(code = %redacted, reason = reason.as_str(), "Access code rejected");
                return Err(GateError::denied(DenyReason::CodeRejected(reason)));
            }
        };

        match self.onboard(&taken).await {
            Ok(pass) => {
                info!(
                    code = %redacted,
                    guest = %pass.principal.id(),
                    session_id = %pass.session.id,
                    uses_remaining = taken.uses_remaining,
                    "Access code redeemed"
                );
                Ok(pass)
            }
            Err(e) => {
                warn!(code = %redacted, error = %e, "Guest onboarding failed, returning code use");
                if let Err(restore) = self.codes.restore_use(code).await {
                    error!(code = %redacted, error = %restore, "Failed to return code use");
                }
                Err(e)
            }
        }
    }

    async fn onboard(&self, code: &AccessCode) -> Result<GuestPass> {
        let principal = Principal::guest(PrincipalId::new_guest(), &code.code);
        let start = self.sessions.start(&principal, Some(code.ceiling())).await?;
        let session = start.session;

        match self
            .tokens
            .issue_pair(principal.id(), PrincipalKind::Guest, session.id)
        {
            Ok(tokens) => Ok(GuestPass {
                principal,
                session,
                tokens,
            }),
            Err(e) => {
                self.sessions
                    .terminate(session.id, TerminationCause::Admin)
                    .await?;
                Err(e)
            }
        }
    }

    /// Mint a new code
    pub async fn create(&self, request: &NewAccessCode) -> Result<AccessCode> {
        let code = request.build(self.clock.now())?;
        self.codes.insert(&code).await?;
        info!(
            code = %AccessCode::redacted(&code.code),
            max_uses = code.max_uses,
            data_mb = code.data_quota.as_mb(),
            time_minutes = code.time_quota_minutes,
            expires_at = %code.expires_at,
            "Access code created"
        );
        Ok(code)
    }

    /// Deactivate a code and end its live sessions; returns how many ended
    pub async fn revoke(&self, code: &str) -> Result<usize> {
        if !self.codes.deactivate(code).await? {
            return Err(GateError::NotFound("access code".to_string()));
        }
        let ended = self
            .sessions
            .terminate_for_code(code, TerminationCause::CodeRevoked)
            .await?;
        info!(code = %AccessCode::redacted(code), sessions_ended = ended, "Access code revoked");
        Ok(ended)
    }

    pub async fn get(&self, code: &str) -> Result<AccessCode> {
        self.codes
            .get(code)
            .await?
            .ok_or_else(|| GateError::NotFound("access code".to_string()))
    }

    /// All codes, newest first
    pub async fn list(&self) -> Result<Vec<AccessCode>> {
        self.codes.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_code::CodeRejection;
    use crate::clock::ManualClock;
    use crate::config::{SessionConfig, TokenConfig};
    use crate::quota::{DataMb, QuotaLedger, QuotaPolicies};
    use crate::session::SessionStatus;
    use crate::store::{MemoryCodeStore, MemoryQuotaStore, MemorySessionStore};
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> (AccessCodeRedeemer, Arc<SessionManager>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let ledger = Arc::new(QuotaLedger::with_defaults(
            Arc::new(MemoryQuotaStore::new()),
            shared.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            QuotaPolicies::new(ledger),
            shared.clone(),
            SessionConfig::default(),
        ));
        let tokens = Arc::new(TokenAuthority::new(&TokenConfig::default(), shared.clone()));
        let redeemer = AccessCodeRedeemer::new(
            Arc::new(MemoryCodeStore::new()),
            sessions.clone(),
            tokens,
            shared,
        );
        (redeemer, sessions, clock)
    }

    fn guest001() -> NewAccessCode {
        NewAccessCode {
            code: Some("GUEST001".to_string()),
            data_quota_mb: 500.0,
            time_quota_minutes: 120,
            max_uses: 5,
            valid_for_minutes: 24 * 60,
        }
    }

    #[tokio::test]
    async fn test_redeem_binds_code_ceiling() {
        let (redeemer, _, _) = setup();
        redeemer.create(&guest001()).await.unwrap();

        let pass = redeemer.redeem("GUEST001").await.unwrap();
        let ceiling = pass.session.ceiling.unwrap();
        assert_eq!(ceiling.data_mb, DataMb::whole(500));
        assert_eq!(ceiling.time_minutes, 120);
        assert_eq!(pass.session.access_code.as_deref(), Some("GUEST001"));
        assert_eq!(pass.session.status, SessionStatus::Active);
        assert_eq!(redeemer.get("GUEST001").await.unwrap().uses_remaining, 4);
    }

    #[tokio::test]
    async fn test_rejections_share_one_error() {
        let (redeemer, _, clock) = setup();
        redeemer.create(&guest001()).await.unwrap();

        let missing = redeemer.redeem("NOPE").await.unwrap_err();
        assert_eq!(missing.code_rejection(), Some(CodeRejection::NotFound));

        clock.advance(Duration::days(2));
        let expired = redeemer.redeem("GUEST001").await.unwrap_err();
        assert_eq!(expired.code_rejection(), Some(CodeRejection::Expired));
        assert_eq!(missing.to_string(), expired.to_string());
        assert_eq!(redeemer.get("GUEST001").await.unwrap().uses_remaining, 5);
    }

    #[tokio::test]
    async fn test_revoke_ends_guest_sessions() {
        let (redeemer, sessions, _) = setup();
        redeemer.create(&guest001()).await.unwrap();
        let first = redeemer.redeem("GUEST001").await.unwrap();
        let second = redeemer.redeem("GUEST001").await.unwrap();

        assert_eq!(redeemer.revoke("GUEST001").await.unwrap(), 2);
        for pass in [first, second] {
            let session = sessions.get(pass.session.id).await.unwrap();
            assert_eq!(session.status, SessionStatus::Terminated);
        }

        let err = redeemer.redeem("GUEST001").await.unwrap_err();
        assert_eq!(err.code_rejection(), Some(CodeRejection::Inactive));
        assert!(matches!(
            redeemer.revoke("MISSING").await.unwrap_err(),
            GateError::NotFound(_)
        ));
    }
}
