use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::principal::{PrincipalId, PrincipalKind};

/// Token family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

impl TokenUse {
    pub fn other(&self) -> TokenUse {
        match self {
            TokenUse::Access => TokenUse::Refresh,
            TokenUse::Refresh => TokenUse::Access,
        }
    }
}

/// JWT Claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (principal id)
    pub sub: String,
    pub kind: PrincipalKind,
    /// Session the token is bound to
    pub sid: Uuid,
    pub typ: TokenUse,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub jti: String,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// What a valid token asserts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub session_id: Uuid,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl From<Claims> for TokenSubject {
    fn from(claims: Claims) -> Self {
        TokenSubject {
            principal_id: PrincipalId::new(claims.sub),
            kind: claims.kind,
            session_id: claims.sid,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

/// Access token plus the refresh token that renews it
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}
