//! The gating engine
//!
//! Wires the token authority, session manager, quota ledger, permission cache
//! and access-code redeemer together behind the operations exposed to the
//! gating layer and to admin tooling.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::access_code::{AccessCode, AccessCodeRedeemer, GuestPass, NewAccessCode};
use crate::authz::{PermissionCache, PermissionSet, Requirement};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::directory::{Identity, IdentityStore, RoleGraph, StaticDirectory};
use crate::error::{AuthFailure, DenyReason, GateError, Result};
use crate::principal::{Principal, PrincipalId, PrincipalKind};
use crate::quota::{
    DataMb, QuotaCheck, QuotaLedger, QuotaLimits, QuotaPolicies, QuotaWindow, Usage, WindowType,
};
use crate::session::{AccessSession, SessionManager, SessionStatus, TerminationCause, UsageReceipt};
use crate::store::Stores;
use crate::token::{IssuedToken, TokenAuthority, TokenPair, TokenSubject};

/// A request that passed every gate
#[derive(Debug, Clone)]
pub struct Authorized {
    pub principal: Principal,
    /// Effective role; guests take the configured guest role
    pub role: String,
    pub permissions: Arc<PermissionSet>,
    pub session: AccessSession,
}

/// Result of a registered user signing in
#[derive(Debug, Clone, Serialize)]
pub struct UserLogin {
    pub session: AccessSession,
    pub tokens: TokenPair,
    /// False when an existing live session was reused
    pub created: bool,
}

/// What a maintenance pass reclaimed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub cache_entries_swept: usize,
    pub locks_pruned: usize,
}

pub struct Engine {
    identities: Arc<dyn IdentityStore>,
    ledger: Arc<QuotaLedger>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenAuthority>,
    permissions: PermissionCache,
    redeemer: AccessCodeRedeemer,
    guest_role: String,
}

impl Engine {
    pub fn new(
        config: &GateConfig,
        stores: Stores,
        identities: Arc<dyn IdentityStore>,
        roles: Arc<dyn RoleGraph>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(
            stores.quotas,
            clock.clone(),
            config.quota.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            stores.sessions,
            QuotaPolicies::new(ledger.clone()),
            clock.clone(),
            config.sessions.clone(),
        ));
        let tokens = Arc::new(TokenAuthority::new(&config.tokens, clock.clone()));
        let permissions =
            PermissionCache::new(roles, clock.clone(), &config.cache, &config.roles.super_role);
        let redeemer =
            AccessCodeRedeemer::new(stores.codes, sessions.clone(), tokens.clone(), clock);

        Self {
            identities,
            ledger,
            sessions,
            tokens,
            permissions,
            redeemer,
            guest_role: config.roles.guest_role.clone(),
        }
    }

    /// Engine over a directory seeded from `config`, on the system clock
    pub fn from_config(config: &GateConfig, stores: Stores) -> Self {
        let directory = Arc::new(StaticDirectory::from_config(config));
        Self::new(
            config,
            stores,
            directory.clone(),
            directory,
            Arc::new(SystemClock),
        )
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    /// Validate a token and tie it to its session, without checking the
    /// session's state.
    async fn bound_session(&self, subject: &TokenSubject) -> Result<AccessSession> {
        let session = match self.sessions.get(subject.session_id).await {
            Ok(session) => session,
            Err(GateError::NotFound(_)) => {
                return Err(GateError::auth(AuthFailure::UnknownSubject))
            }
            Err(e) => return Err(e),
        };
        if session.principal_id != subject.principal_id || session.kind != subject.kind {
            return Err(GateError::auth(AuthFailure::SubjectMismatch));
        }
        Ok(session)
    }

    /// Current principal and effective role behind a session
    async fn resolve_principal(&self, session: &AccessSession) -> Result<(Principal, String)> {
        match session.kind {
            PrincipalKind::User => {
                let identity = self
                    .identities
                    .fetch(&session.principal_id)
                    .await?
                    .ok_or_else(|| GateError::auth(AuthFailure::UnknownSubject))?;
                if !identity.is_active {
                    return Err(GateError::denied(DenyReason::AccountInactive));
                }
                let principal = Principal::User {
                    id: session.principal_id.clone(),
                    role: identity.role.clone(),
                    is_active: identity.is_active,
                };
                Ok((principal, identity.role))
            }
            PrincipalKind::Guest => {
                let principal = Principal::guest(
                    session.principal_id.clone(),
                    session.access_code.clone().unwrap_or_default(),
                );
                Ok((principal, self.guest_role.clone()))
            }
        }
    }

    fn require_active(session: &AccessSession) -> Result<()> {
        match session.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Paused => Err(GateError::denied(DenyReason::SessionPaused)),
            status => Err(GateError::denied(DenyReason::SessionTerminal(status))),
        }
    }

    /// Gate one request: token, then session state, then permissions
    pub async fn authorize(
        &self,
        token: &str,
        requirement: Option<&Requirement>,
    ) -> Result<Authorized> {
        let subject = self.tokens.validate(token)?;
        let session = self.bound_session(&subject).await?;
        let (principal, role) = self.resolve_principal(&session).await?;

        let session = self.sessions.check(session.id).await?;
        Self::require_active(&session)?;

        let permissions = self.permissions.get(principal.id(), &role).await?;
        if let Some(requirement) = requirement {
            if !requirement.is_satisfied(&role, &permissions) {
                debug!(
                    principal = %principal.id(),
                    required = %requirement,
                    "Permission denied"
                );
                return Err(GateError::denied(DenyReason::PermissionDenied(
                    requirement.to_string(),
                )));
            }
        }

        Ok(Authorized {
            principal,
            role,
            permissions,
            session,
        })
    }

    /// Token and session binding only; for operations that must also work
    /// on paused or ended sessions
    pub async fn authenticate(&self, token: &str) -> Result<AccessSession> {
        let subject = self.tokens.validate(token)?;
        self.bound_session(&subject).await
    }

    /// Run the per-request session evaluation and report the resulting status
    pub async fn check_session_quota(&self, session_id: Uuid) -> Result<SessionStatus> {
        Ok(self.session_status(session_id).await?.status)
    }

    /// Session as it stands after the per-request evaluation
    pub async fn session_status(&self, session_id: Uuid) -> Result<AccessSession> {
        self.sessions.check(session_id).await
    }

    /// Registered identity behind `principal_id`
    async fn identity(&self, principal_id: &PrincipalId) -> Result<Identity> {
        self.identities
            .fetch(principal_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("principal {}", principal_id)))
    }

    /// Sign in a user whose credentials were already verified elsewhere
    pub async fn open_user_session(&self, principal_id: &PrincipalId) -> Result<UserLogin> {
        let identity = self.identity(principal_id).await?;
        if !identity.is_active {
            return Err(GateError::denied(DenyReason::AccountInactive));
        }

        let principal = Principal::user(principal_id.clone(), identity.role);
        let start = self.sessions.start(&principal, None).await?;
        let tokens = self
            .tokens
            .issue_pair(principal_id, PrincipalKind::User, start.session.id)?;

        info!(
            principal = %principal_id,
            session_id = %start.session.id,
            created = start.created,
            "User signed in"
        );
        Ok(UserLogin {
            session: start.session,
            tokens,
            created: start.created,
        })
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken> {
        let subject = self.tokens.validate_refresh(refresh_token)?;
        let session = self.bound_session(&subject).await?;
        self.resolve_principal(&session).await?;

        let session = self.sessions.check(session.id).await?;
        if session.status.is_terminal() {
            return Err(GateError::denied(DenyReason::SessionTerminal(session.status)));
        }
        self.tokens
            .issue_access(&subject.principal_id, subject.kind, session.id)
    }

    /// Report data transferred by a session
    pub async fn record_usage(&self, session_id: Uuid, data: DataMb) -> Result<UsageReceipt> {
        self.sessions.record_usage(session_id, data).await
    }

    pub async fn pause(&self, session_id: Uuid) -> Result<AccessSession> {
        self.sessions.pause(session_id).await
    }

    pub async fn resume(&self, session_id: Uuid) -> Result<AccessSession> {
        self.sessions.resume(session_id).await
    }

    pub async fn logout(&self, session_id: Uuid) -> Result<AccessSession> {
        self.sessions
            .terminate(session_id, TerminationCause::Logout)
            .await
    }

    /// Onboard a guest from an access code
    pub async fn redeem(&self, code: &str) -> Result<GuestPass> {
        self.redeemer.redeem(code).await
    }

    pub async fn create_access_code(&self, request: &NewAccessCode) -> Result<AccessCode> {
        self.redeemer.create(request).await
    }

    /// Deactivate a code and end its live sessions
    pub async fn revoke_access_code(&self, code: &str) -> Result<usize> {
        self.redeemer.revoke(code).await
    }

    pub async fn list_access_codes(&self) -> Result<Vec<AccessCode>> {
        self.redeemer.list().await
    }

    pub async fn force_terminate(&self, session_id: Uuid) -> Result<AccessSession> {
        self.sessions
            .terminate(session_id, TerminationCause::Admin)
            .await
    }

    /// Drop cached permissions so the next request re-resolves them
    pub fn invalidate_permissions(&self, principal_id: &PrincipalId) -> bool {
        self.permissions.invalidate(principal_id)
    }

    /// Drop every cached permission set
    pub fn invalidate_all_permissions(&self) -> usize {
        self.permissions.invalidate_all()
    }

    pub async fn adjust_quota(
        &self,
        principal_id: &PrincipalId,
        window: WindowType,
        limits: QuotaLimits,
    ) -> Result<QuotaWindow> {
        self.identity(principal_id).await?;
        self.ledger.adjust_limits(principal_id, window, limits).await
    }

    /// Rolling windows of a registered user; guests have none
    pub async fn quota_snapshot(&self, principal_id: &PrincipalId) -> Result<Vec<QuotaWindow>> {
        self.identity(principal_id).await?;
        self.ledger.snapshot(principal_id).await
    }

    /// Would `usage` fit the principal's windows? Records nothing.
    pub async fn check_and_reserve(
        &self,
        principal_id: &PrincipalId,
        usage: Usage,
    ) -> Result<QuotaCheck> {
        self.ledger.check_and_reserve(principal_id, usage).await
    }

    pub async fn list_sessions(&self, principal_id: Option<&PrincipalId>) -> Result<Vec<AccessSession>> {
        self.sessions.list(principal_id).await
    }

    /// Periodic housekeeping; correctness never depends on it
    pub fn maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            cache_entries_swept: self.permissions.sweep_expired(),
            locks_pruned: self.ledger.prune_locks() + self.sessions.prune_locks(),
        };
        debug!(
            swept = report.cache_entries_swept,
            locks_pruned = report.locks_pruned,
            "Maintenance pass"
        );
        report
    }
}
