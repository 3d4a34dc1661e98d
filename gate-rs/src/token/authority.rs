use chrono::Duration;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::types::{Claims, IssuedToken, TokenPair, TokenSubject, TokenUse};
use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::error::{AuthFailure, GateError, Result};
use crate::principal::{PrincipalId, PrincipalKind};

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and validates bearer tokens
pub struct TokenAuthority {
    access: KeyPair,
    refresh: KeyPair,
    user_access_ttl: Duration,
    guest_access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenAuthority {
    pub fn new(config: &TokenConfig, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock instead
        validation.validate_exp = false;

        Self {
            access: KeyPair::from_secret(&config.access_secret),
            refresh: KeyPair::from_secret(&config.refresh_secret),
            user_access_ttl: config.access_ttl(PrincipalKind::User),
            guest_access_ttl: config.access_ttl(PrincipalKind::Guest),
            refresh_ttl: config.refresh_ttl(),
            validation,
            clock,
        }
    }

    fn keys(&self, family: TokenUse) -> &KeyPair {
        match family {
            TokenUse::Access => &self.access,
            TokenUse::Refresh => &self.refresh,
        }
    }

    /// Access token lifetime for a principal kind
    pub fn access_ttl(&self, kind: PrincipalKind) -> Duration {
        match kind {
            PrincipalKind::User => self.user_access_ttl,
            PrincipalKind::Guest => self.guest_access_ttl,
        }
    }

    /// Sign a token of `family` bound to `session_id`
    pub fn generate(
        &self,
        principal: &PrincipalId,
        kind: PrincipalKind,
        session_id: Uuid,
        family: TokenUse,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let claims = Claims {
            sub: principal.to_string(),
            kind,
            sid: session_id,
            typ: family,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys(family).encoding,
        )?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Access token with the configured lifetime for `kind`
    pub fn issue_access(
        &self,
        principal: &PrincipalId,
        kind: PrincipalKind,
        session_id: Uuid,
    ) -> Result<IssuedToken> {
        self.generate(principal, kind, session_id, TokenUse::Access, self.access_ttl(kind))
    }

    pub fn issue_refresh(
        &self,
        principal: &PrincipalId,
        kind: PrincipalKind,
        session_id: Uuid,
    ) -> Result<IssuedToken> {
        self.generate(principal, kind, session_id, TokenUse::Refresh, self.refresh_ttl)
    }

    /// Access and refresh tokens for one session
    pub fn issue_pair(
        &self,
        principal: &PrincipalId,
        kind: PrincipalKind,
        session_id: Uuid,
    ) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue_access(principal, kind, session_id)?,
            refresh: self.issue_refresh(principal, kind, session_id)?,
        })
    }

    fn decode_family(&self, token: &str, family: TokenUse) -> Result<Claims> {
        let claims = match decode::<Claims>(token, &self.keys(family).decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let failure = match e.kind() {
                    JwtErrorKind::InvalidSignature => {
                        let other = &self.keys(family.other()).decoding;
                        if decode::<Claims>(token, other, &self.validation).is_ok() {
                            AuthFailure::WrongKind
                        } else {
                            AuthFailure::InvalidSignature
                        }
                    }
                    _ => AuthFailure::Malformed,
                };
                debug!(expected = ?family, reason = %failure, "Token rejected");
                return Err(GateError::auth(failure));
            }
        };

        if claims.typ != family {
            return Err(GateError::auth(AuthFailure::WrongKind));
        }
        if self.clock.now().timestamp() >= claims.exp {
            debug!(subject = %claims.sub, "Token expired");
            return Err(GateError::auth(AuthFailure::Expired));
        }
        Ok(claims)
    }

    /// Validate an access token
    pub fn validate(&self, token: &str) -> Result<TokenSubject> {
        self.decode_family(token, TokenUse::Access).map(TokenSubject::from)
    }

    /// Validate a refresh token
    pub fn validate_refresh(&self, token: &str) -> Result<TokenSubject> {
        self.decode_family(token, TokenUse::Refresh).map(TokenSubject::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn authority() -> (TokenAuthority, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap());
        let config = TokenConfig {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            ..TokenConfig::default()
        };
        (TokenAuthority::new(&config, Arc::new(clock.clone())), clock)
    }

    fn failure(err: GateError) -> AuthFailure {
        match err {
            GateError::Authentication(f) => f,
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_generate_and_validate() {
        let (authority, _) = authority();
        let sid = Uuid::new_v4();
        let issued = authority
            .issue_access(&PrincipalId::new("alice"), PrincipalKind::User, sid)
            .unwrap();
        assert!(!issued.token.is_empty());

        let subject = authority.validate(&issued.token).unwrap();
        assert_eq!(subject.principal_id, PrincipalId::new("alice"));
        assert_eq!(subject.kind, PrincipalKind::User);
        assert_eq!(subject.session_id, sid);
        assert_eq!(subject.expires_at - subject.issued_at, 15 * 60);
    }

    #[test]
    fn test_expiry_uses_clock() {
        let (authority, clock) = authority();
        let issued = authority
            .issue_access(&PrincipalId::new("alice"), PrincipalKind::User, Uuid::new_v4())
            .unwrap();

        clock.advance(Duration::minutes(14));
        assert!(authority.validate(&issued.token).is_ok());

        clock.advance(Duration::minutes(1));
        let err = authority.validate(&issued.token).unwrap_err();
        assert_eq!(failure(err), AuthFailure::Expired);
    }

    #[test]
    fn test_families_are_not_interchangeable() {
        let (authority, _) = authority();
        let alice = PrincipalId::new("alice");
        let sid = Uuid::new_v4();
        let access = authority
            .issue_access(&alice, PrincipalKind::User, sid)
            .unwrap();
        let refresh = authority
            .issue_refresh(&alice, PrincipalKind::User, sid)
            .unwrap();

        assert_eq!(
            failure(authority.validate(&refresh.token).unwrap_err()),
            AuthFailure::WrongKind
        );
        assert_eq!(
            failure(authority.validate_refresh(&access.token).unwrap_err()),
            AuthFailure::WrongKind
        );
        assert_eq!(authority.validate_refresh(&refresh.token).unwrap().session_id, sid);
    }

    #[test]
    fn test_foreign_signature_and_garbage() {
        let (authority, clock) = authority();
        let foreign = TokenAuthority::new(
            &TokenConfig {
                access_secret: "other-access".to_string(),
                refresh_secret: "other-refresh".to_string(),
                ..TokenConfig::default()
            },
            Arc::new(clock),
        );
        let issued = foreign
            .issue_access(&PrincipalId::new("mallory"), PrincipalKind::User, Uuid::new_v4())
            .unwrap();

        assert_eq!(
            failure(authority.validate(&issued.token).unwrap_err()),
            AuthFailure::InvalidSignature
        );
        assert_eq!(
            failure(authority.validate("not-a-token").unwrap_err()),
            AuthFailure::Malformed
        );
    }
}
