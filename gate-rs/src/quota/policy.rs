use async_trait::async_trait;
use std::sync::Arc;

use super::ledger::QuotaLedger;
use super::types::{QuotaScope, QuotaStatus, Usage};
use crate::error::Result;
use crate::principal::PrincipalKind;
use crate::session::AccessSession;

/// Strategy deciding whether a session is still within its allowance
#[async_trait]
pub trait QuotaPolicy: Send + Sync {
    /// Record usage the session has already incurred and report the result.
    ///
    /// The session counters already include `usage` when this is called.
    async fn record(&self, session: &AccessSession, usage: Usage) -> Result<QuotaStatus>;

    /// Status without recording anything
    async fn evaluate(&self, session: &AccessSession) -> Result<QuotaStatus>;

    /// Undo a [`record`](QuotaPolicy::record) whose session write failed
    async fn refund(&self, session: &AccessSession, usage: Usage) -> Result<()>;
}

/// Registered users: shared daily, weekly and monthly windows
pub struct RollingWindowPolicy {
    ledger: Arc<QuotaLedger>,
}

impl RollingWindowPolicy {
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl QuotaPolicy for RollingWindowPolicy {
    async fn record(&self, session: &AccessSession, usage: Usage) -> Result<QuotaStatus> {
        self.ledger.commit(&session.principal_id, usage).await
    }

    async fn evaluate(&self, session: &AccessSession) -> Result<QuotaStatus> {
        self.ledger.status(&session.principal_id).await
    }

    async fn refund(&self, session: &AccessSession, usage: Usage) -> Result<()> {
        self.ledger.refund(&session.principal_id, usage).await
    }
}

/// Guests: the fixed ceiling copied from their access code
#[derive(Debug, Clone, Copy, Default)]
pub struct OneShotPolicy;

impl OneShotPolicy {
    fn status_of(session: &AccessSession) -> QuotaStatus {
        let Some(ceiling) = session.ceiling else {
            return QuotaStatus::Ok;
        };
        if session.data_used > ceiling.data_mb || session.time_used_minutes > ceiling.time_minutes {
            QuotaStatus::Exceeded(QuotaScope::OneShot)
        } else {
            QuotaStatus::Ok
        }
    }
}

#[async_trait]
impl QuotaPolicy for OneShotPolicy {
    async fn record(&self, session: &AccessSession, _usage: Usage) -> Result<QuotaStatus> {
        Ok(Self::status_of(session))
    }

    async fn evaluate(&self, session: &AccessSession) -> Result<QuotaStatus> {
        Ok(Self::status_of(session))
    }

    // The counters live on the session itself, so an unsaved session
    // carries nothing to give back
    async fn refund(&self, _session: &AccessSession, _usage: Usage) -> Result<()> {
        Ok(())
    }
}

/// Picks the policy for a session by principal kind
#[derive(Clone)]
pub struct QuotaPolicies {
    pub users: Arc<dyn QuotaPolicy>,
    pub guests: Arc<dyn QuotaPolicy>,
}

impl QuotaPolicies {
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self {
            users: Arc::new(RollingWindowPolicy::new(ledger)),
            guests: Arc::new(OneShotPolicy),
        }
    }

    pub fn for_session(&self, session: &AccessSession) -> &dyn QuotaPolicy {
        match session.kind {
            PrincipalKind::User => self.users.as_ref(),
            PrincipalKind::Guest => self.guests.as_ref(),
        }
    }
}
