use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::principal::{Principal, PrincipalId, PrincipalKind};
use crate::quota::DataMb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Expired,
    Terminated,
    QuotaExceeded,
}

impl SessionStatus {
    /// Terminal states have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Expired | SessionStatus::Terminated | SessionStatus::QuotaExceeded
        )
    }

    /// Active or paused
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Expired => "expired",
            SessionStatus::Terminated => "terminated",
            SessionStatus::QuotaExceeded => "quota_exceeded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "expired" => Some(SessionStatus::Expired),
            "terminated" => Some(SessionStatus::Terminated),
            "quota_exceeded" => Some(SessionStatus::QuotaExceeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Logout,
    Admin,
    CodeRevoked,
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::Logout => write!(f, "logout"),
            TerminationCause::Admin => write!(f, "admin"),
            TerminationCause::CodeRevoked => write!(f, "code_revoked"),
        }
    }
}

/// Fixed allowance bound to a guest session by its access code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCeiling {
    pub data_mb: DataMb,
    pub time_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessSession {
    pub id: Uuid,
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    /// Code this guest session was redeemed from
    pub access_code: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub data_used: DataMb,
    pub time_used_minutes: i64,
    pub last_active_at: DateTime<Utc>,
    /// Connected time has been accounted up to this instant
    #[serde(skip)]
    pub accrued_until: DateTime<Utc>,
    /// One-shot allowance; only guest sessions carry one
    pub ceiling: Option<QuotaCeiling>,
}

impl AccessSession {
    pub fn start(principal: &Principal, ceiling: Option<QuotaCeiling>, now: DateTime<Utc>) -> Self {
        AccessSession {
            id: Uuid::new_v4(),
            principal_id: principal.id().clone(),
            kind: principal.kind(),
            access_code: principal.access_code().map(str::to_string),
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            data_used: DataMb::ZERO,
            time_used_minutes: 0,
            last_active_at: now,
            accrued_until: now,
            ceiling,
        }
    }

    /// Move into a terminal state, stamping `ended_at`
    pub(crate) fn end(&mut self, status: SessionStatus, at: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(at);
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }

    /// Account whole connected minutes since the last accrual.
    ///
    /// The sub-minute remainder stays pending for the next call. Paused and
    /// terminal sessions accrue nothing.
    pub(crate) fn accrue_minutes(&mut self, now: DateTime<Utc>) -> i64 {
        if self.status != SessionStatus::Active {
            return 0;
        }
        let minutes = (now - self.accrued_until).num_minutes();
        if minutes <= 0 {
            return 0;
        }
        self.time_used_minutes = self.time_used_minutes.saturating_add(minutes);
        self.accrued_until += Duration::minutes(minutes);
        minutes
    }
}

/// Outcome of a start request
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub session: AccessSession,
    /// False when an existing live session was handed back
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_status_classes() {
        assert!(SessionStatus::Active.is_live());
        assert!(SessionStatus::Paused.is_live());
        for s in [
            SessionStatus::Expired,
            SessionStatus::Terminated,
            SessionStatus::QuotaExceeded,
        ] {
            assert!(s.is_terminal());
            assert_eq!(SessionStatus::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_end_sets_ended_at_once() {
        let mut s = AccessSession::start(&Principal::user("alice", "user"), None, t0());
        assert!(s.ended_at.is_none());

        s.end(SessionStatus::Expired, t0() + Duration::minutes(481));
        assert_eq!(s.ended_at, Some(t0() + Duration::minutes(481)));

        s.end(SessionStatus::Terminated, t0() + Duration::minutes(500));
        assert_eq!(s.status, SessionStatus::Expired);
        assert_eq!(s.ended_at, Some(t0() + Duration::minutes(481)));
    }

    #[test]
    fn test_accrue_keeps_remainder() {
        let mut s = AccessSession::start(&Principal::user("alice", "user"), None, t0());

        assert_eq!(s.accrue_minutes(t0() + Duration::seconds(90)), 1);
        assert_eq!(s.accrue_minutes(t0() + Duration::seconds(150)), 1);
        assert_eq!(s.accrue_minutes(t0() + Duration::seconds(170)), 0);
        assert_eq!(s.time_used_minutes, 2);
    }

    #[test]
    fn test_paused_does_not_accrue() {
        let mut s = AccessSession::start(&Principal::user("alice", "user"), None, t0());
        s.status = SessionStatus::Paused;
        assert_eq!(s.accrue_minutes(t0() + Duration::minutes(30)), 0);
        assert_eq!(s.time_used_minutes, 0);
    }
}
