use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: u64,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time left before expiry at millisecond precision, or `None` once
    /// expired. Never longer than the token actually has.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let millis = self.exp.saturating_mul(1000) - now.timestamp_millis();
        (millis > 0).then(|| Duration::from_millis(millis as u64))
    }
}

/// A verifiable bearer credential. Outside the signer it is just a string
/// with a known expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    encoded: String,
    claims: Claims,
}

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> u64 {
        self.claims.sub
    }

    pub fn kind(&self) -> TokenKind {
        self.claims.kind
    }
}

/// Issues and verifies HS256 JWTs with fixed per-kind lifetimes.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("access_lifetime", &self.access_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(
        key: impl AsRef<[u8]>,
        access_lifetime: Duration,
        refresh_lifetime: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(key.as_ref()),
            decoding: DecodingKey::from_secret(key.as_ref()),
            access_lifetime,
            refresh_lifetime,
        }
    }

    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_lifetime,
            TokenKind::Refresh => self.refresh_lifetime,
        }
    }

    pub fn issue(&self, subject: u64, kind: TokenKind) -> Result<SignedToken> {
        self.issue_at(subject, kind, Utc::now())
    }

    pub fn issue_at(&self, subject: u64, kind: TokenKind, now: DateTime<Utc>) -> Result<SignedToken> {
        let lifetime = i64::try_from(self.lifetime(kind).as_secs()).context("token lifetime")?;
        let claims = Claims {
            sub: subject,
            kind,
            iat: now.timestamp(),
            exp: now.timestamp() + lifetime,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let encoded = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("encoding token")?;
        Ok(SignedToken { encoded, claims })
    }

    pub fn verify(&self, raw: &str) -> Result<SignedToken> {
        self.verify_at(raw, Utc::now())
    }

    /// Check signature and algorithm with `jsonwebtoken`, then expiry against
    /// `now`. A token is live while `now < exp`.
    pub fn verify_at(&self, raw: &str, now: DateTime<Utc>) -> Result<SignedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is judged against the caller's clock below
        validation.validate_exp = false;
        validation.leeway = 0;
        let claims = jsonwebtoken::decode::<Claims>(raw, &self.decoding, &validation)
            .context("decoding token")?
            .claims;
        if claims.exp <= now.timestamp() {
            bail!("token expired");
        }
        Ok(SignedToken {
            encoded: raw.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    fn signer() -> TokenSigner {
        TokenSigner::new(
            "test-key",
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let token = signer.issue(7, TokenKind::Refresh).unwrap();
        let verified = signer.verify(token.as_str()).unwrap();
        assert_eq!(verified.subject(), 7);
        assert_eq!(verified.kind(), TokenKind::Refresh);
        assert_eq!(verified.claims(), token.claims());
    }

    #[test]
    fn test_lifetime_per_kind() {
        let signer = signer();
        let now = Utc::now();
        let access = signer.issue_at(1, TokenKind::Access, now).unwrap();
        let refresh = signer.issue_at(1, TokenKind::Refresh, now).unwrap();
        assert_eq!(access.claims().exp - now.timestamp(), 300);
        assert_eq!(refresh.claims().exp - now.timestamp(), 3600);
    }

    #[test]
    fn test_verify_fails_with_wrong_key() {
        let token = signer().issue(1, TokenKind::Access).unwrap();
        let other = TokenSigner::new("other-key", Duration::from_secs(1), Duration::from_secs(1));
        assert!(other.verify(token.as_str()).is_err());
    }

    #[test]
    fn test_verify_rejects_expired() {
        let signer = signer();
        let issued = Utc::now() - chrono::Duration::seconds(600);
        let token = signer.issue_at(1, TokenKind::Access, issued).unwrap();
        let err = signer.verify(token.as_str()).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_verify_rejects_tampered_claims() {
        let signer = signer();
        let token = signer.issue(1, TokenKind::Access).unwrap();
        let forged_claims = Claims {
            sub: 999,
            ..token.claims().clone()
        };
        let mut parts: Vec<String> = token.as_str().split('.').map(String::from).collect();
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert!(signer.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let signer = signer();
        assert!(signer.verify("").is_err());
        assert!(signer.verify("not-a-token").is_err());
        assert!(signer.verify("a.b.c.d").is_err());
        assert!(signer.verify("a.b.!!!").is_err());
    }

    #[test]
    fn test_remaining_lifetime() {
        let signer = signer();
        let now = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        let token = signer.issue_at(1, TokenKind::Access, now).unwrap();
        assert_eq!(
            token.claims().remaining_at(now),
            Some(Duration::from_secs(300))
        );
        let later = now + chrono::Duration::seconds(301);
        assert!(token.claims().remaining_at(later).is_none());
    }

    #[test]
    fn test_remaining_lifetime_never_outlives_token() {
        let signer = signer();
        // 900ms into second 1000
        let issued = Utc.timestamp_millis_opt(1_000_900).unwrap();
        let token = signer.issue_at(1, TokenKind::Refresh, issued).unwrap();
        assert_eq!(token.claims().exp, 1000 + 3600);

        let remaining = token.claims().remaining_at(issued).unwrap();
        assert_eq!(remaining, Duration::from_millis(3_599_100));
        let entry_expiry = issued.timestamp_millis() + remaining.as_millis() as i64;
        assert!(entry_expiry <= token.claims().exp * 1000);

        let just_before = Utc.timestamp_millis_opt(token.claims().exp * 1000 - 1).unwrap();
        assert_eq!(
            token.claims().remaining_at(just_before),
            Some(Duration::from_millis(1))
        );
        let at_expiry = token.claims().expires_at();
        assert!(token.claims().remaining_at(at_expiry).is_none());
        assert!(signer.verify_at(token.as_str(), at_expiry).is_err());
        assert!(signer.verify_at(token.as_str(), just_before).is_ok());
    }

    #[test]
    fn test_rejects_other_algorithms() {
        let signer = signer();
        let claims = signer.issue(1, TokenKind::Access).unwrap().claims().clone();
        let hs512 = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-key"),
        )
        .unwrap();
        assert!(signer.verify(&hs512).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("test-key"));
    }
}
