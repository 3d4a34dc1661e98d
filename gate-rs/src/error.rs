use thiserror::Error;

use crate::access_code::CodeRejection;
use crate::quota::QuotaScope;
use crate::session::SessionStatus;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Why a credential was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No bearer token was presented
    MissingToken,
    /// Token could not be decoded
    Malformed,
    /// Signature does not match the expected key
    InvalidSignature,
    /// Token is past its expiry
    Expired,
    /// Token belongs to a different family or principal kind
    WrongKind,
    /// Token subject does not match the bound session
    SubjectMismatch,
    /// Token names a session or principal this engine does not know
    UnknownSubject,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::MissingToken => write!(f, "missing token"),
            AuthFailure::Malformed => write!(f, "malformed token"),
            AuthFailure::InvalidSignature => write!(f, "invalid signature"),
            AuthFailure::Expired => write!(f, "token expired"),
            AuthFailure::WrongKind => write!(f, "wrong token kind"),
            AuthFailure::SubjectMismatch => write!(f, "token subject mismatch"),
            AuthFailure::UnknownSubject => write!(f, "unknown subject"),
        }
    }
}

/// Why an authenticated principal was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    PermissionDenied(String),
    QuotaExceeded(QuotaScope),
    SessionTerminal(SessionStatus),
    SessionPaused,
    AccountInactive,
    /// Access code refused. The reason is kept internal so callers cannot
    /// tell which codes exist.
    CodeRejected(CodeRejection),
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::PermissionDenied(p) => write!(f, "missing permission {}", p),
            DenyReason::QuotaExceeded(scope) => write!(f, "{} quota exceeded", scope),
            DenyReason::SessionTerminal(s) => write!(f, "session is {}", s),
            DenyReason::SessionPaused => write!(f, "session is paused"),
            DenyReason::AccountInactive => write!(f, "account inactive"),
            DenyReason::CodeRejected(_) => write!(f, "access code rejected"),
        }
    }
}

/// Coarse error class used by the gating layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Conflict,
    NotFound,
    Validation,
    Internal,
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Access denied: {0}")]
    Authorization(DenyReason),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token encoding error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Authentication(_) => ErrorKind::Authentication,
            GateError::Authorization(_) => ErrorKind::Authorization,
            GateError::Conflict(_) => ErrorKind::Conflict,
            GateError::NotFound(_) => ErrorKind::NotFound,
            GateError::Validation(_) => ErrorKind::Validation,
            GateError::Database(_)
            | GateError::Token(_)
            | GateError::Config(_)
            | GateError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn denied(reason: DenyReason) -> Self {
        GateError::Authorization(reason)
    }

    pub(crate) fn auth(failure: AuthFailure) -> Self {
        GateError::Authentication(failure)
    }

    /// Internal access-code rejection reason, if this is one
    pub fn code_rejection(&self) -> Option<CodeRejection> {
        match self {
            GateError::Authorization(DenyReason::CodeRejected(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            GateError::Authorization(DenyReason::QuotaExceeded(_))
                | GateError::Authorization(DenyReason::SessionTerminal(
                    SessionStatus::QuotaExceeded
                ))
        )
    }
}
