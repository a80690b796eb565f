//! Bearer token verification.
//!
//! Tokens are HMAC-SHA-256 signed JWTs carrying at minimum `sub`, `exp` and
//! `iat`. The verifier checks signature and expiry, then consults the
//! revocation blacklist when a `jti` is present. A missing token yields no
//! principal rather than an error; route guards decide whether that is a 401.

use crate::blacklist::TokenBlacklist;
use chrono::{DateTime, Duration, Utc};
use forge_core::{Clock, Error, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Recognized token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Authenticated principal for compliance operations. Request-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceUser {
    pub id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub is_admin: bool,
    pub is_compliance_officer: bool,
}

impl ComplianceUser {
    pub fn from_claims(claims: &TokenClaims) -> Self {
        let is_admin = claims.roles.iter().any(|r| r == "admin");
        let is_compliance_officer =
            is_admin || claims.roles.iter().any(|r| r == "compliance_officer");
        Self {
            id: claims.sub.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            is_admin,
            is_compliance_officer,
        }
    }
}

/// Token extraction precedence: `access_token` cookie wins over the bearer
/// header.
pub fn extract_token(cookie: Option<&str>, authorization: Option<&str>) -> Option<String> {
    if let Some(token) = cookie {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Verifies signed bearer tokens and yields typed principals.
pub struct CredentialVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    blacklist: Arc<TokenBlacklist>,
    clock: Arc<dyn Clock>,
}

impl CredentialVerifier {
    /// The secret is loaded from configuration at process start and cached
    /// for the lifetime of the verifier.
    pub fn new(secret: &str, blacklist: Arc<TokenBlacklist>, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            blacklist,
            clock,
        }
    }

    /// Decode and check signature + expiry. Does not consult the blacklist;
    /// use [`verify`](Self::verify) for full verification.
    pub fn decode_token(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below, not the host's.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        let claims = match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(_) => return None,
        };

        if claims.exp <= self.clock.now().timestamp() {
            return None;
        }
        Some(claims)
    }

    /// Full verification including the revocation check. Returns `None` for
    /// any invalid, expired or revoked token.
    pub async fn verify(&self, token: &str) -> Option<TokenClaims> {
        let claims = self.decode_token(token)?;

        if let Some(jti) = &claims.jti {
            if self.blacklist.is_blacklisted(jti).await {
                warn!(jti = %&jti[..jti.len().min(8)], "blacklisted token rejected");
                return None;
            }
        }

        Some(claims)
    }

    /// Verify a raw request token pair (cookie, header) into a principal.
    /// Missing token yields `None`, not an error.
    pub async fn authenticate(
        &self,
        cookie: Option<&str>,
        authorization: Option<&str>,
    ) -> Option<ComplianceUser> {
        let token = extract_token(cookie, authorization)?;
        let claims = self.verify(&token).await?;
        Some(ComplianceUser::from_claims(&claims))
    }

    /// Mint a token. Used by login flows and by tests; `jti` is always set so
    /// the token can be revoked later.
    pub fn issue(
        &self,
        subject: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(String, TokenClaims)> {
        let claims = TokenClaims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Some(Uuid::new_v4().to_string()),
            roles,
            permissions,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::authentication(format!("failed to sign token: {}", e)))?;
        Ok((token, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{Clock, ManualClock};
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, CredentialVerifier) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let blacklist = Arc::new(TokenBlacklist::new(clock.clone()));
        let verifier = CredentialVerifier::new("test-secret", blacklist, clock.clone());
        (clock, verifier)
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let token = extract_token(Some("cookie-token"), Some("Bearer header-token"));
        assert_eq!(token.as_deref(), Some("cookie-token"));

        let token = extract_token(None, Some("Bearer header-token"));
        assert_eq!(token.as_deref(), Some("header-token"));

        assert!(extract_token(None, None).is_none());
        assert!(extract_token(None, Some("Basic abc")).is_none());
    }

    #[tokio::test]
    async fn issue_and_verify_round_trip() {
        let (clock, verifier) = setup();
        let (token, _) = verifier
            .issue(
                "user-1",
                vec!["admin".into()],
                vec!["read".into()],
                clock.now(),
                Duration::hours(1),
            )
            .unwrap();

        let user = verifier
            .authenticate(None, Some(&format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(user.id, "user-1");
        assert!(user.is_admin);
        assert!(user.is_compliance_officer);
    }

    #[tokio::test]
    async fn compliance_officer_without_admin() {
        let (clock, verifier) = setup();
        let (token, _) = verifier
            .issue(
                "user-2",
                vec!["compliance_officer".into()],
                vec![],
                clock.now(),
                Duration::hours(1),
            )
            .unwrap();

        let user = verifier.authenticate(Some(&token), None).await.unwrap();
        assert!(!user.is_admin);
        assert!(user.is_compliance_officer);
    }

    #[tokio::test]
    async fn revoked_token_yields_no_principal() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let blacklist = Arc::new(TokenBlacklist::new(clock.clone()));
        let verifier = CredentialVerifier::new("test-secret", blacklist.clone(), clock.clone());

        let (token, claims) = verifier
            .issue("user-1", vec![], vec![], clock.now(), Duration::hours(1))
            .unwrap();
        assert!(verifier.verify(&token).await.is_some());

        blacklist
            .add(claims.jti.as_deref().unwrap(), claims.expires_at())
            .await
            .unwrap();
        assert!(verifier.verify(&token).await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (clock, verifier) = setup();
        let (token, _) = verifier
            .issue("user-1", vec![], vec![], clock.now(), Duration::minutes(5))
            .unwrap();
        assert!(verifier.verify(&token).await.is_some());
        clock.advance(Duration::minutes(6));
        assert!(verifier.verify(&token).await.is_none());
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let (_, verifier) = setup();
        assert!(verifier.verify("not-a-jwt").await.is_none());
    }
}
