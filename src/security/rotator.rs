use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::ApiError;
use crate::security::audit_log::AuditLogger;
use crate::security::issuer::{TokenIssuer, TokenPair};
use crate::security::signer::TokenKind;

/// Single-use refresh exchange.
///
/// Each successful call retires the presented refresh handle and returns a
/// new one that points at the same signed refresh token, plus a freshly
/// minted access handle. The store is only mutated after the presented
/// handle resolves and its token verifies.
#[derive(Debug, Clone)]
pub struct TokenRotator {
    issuer: TokenIssuer,
    audit: AuditLogger,
}

impl TokenRotator {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self {
            issuer,
            audit: AuditLogger::new(),
        }
    }

    pub async fn rotate(&self, handle: Option<&str>) -> Result<TokenPair, ApiError> {
        self.rotate_at(handle, Utc::now()).await
    }

    /// Rotate with every expiry decision taken against the single instant
    /// `now`. Both replacement handles are prepared before the presented one
    /// is consumed, so a failure leaves the store as it was.
    pub async fn rotate_at(
        &self,
        handle: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, ApiError> {
        let handle = match handle.map(str::trim) {
            Some(h) if !h.is_empty() => h,
            _ => return Err(ApiError::MissingRefreshToken),
        };

        let store = self.issuer.store();
        let Some(raw) = store.get(handle).await else {
            self.audit.refresh_rejected("unknown or expired handle");
            return Err(ApiError::InvalidOrExpiredRefreshToken);
        };

        let signer = self.issuer.signer();
        let refresh = match signer.verify_at(&raw, now) {
            Ok(token) if token.kind() == TokenKind::Refresh => token,
            Ok(_) => {
                self.audit.refresh_rejected("handle does not wrap a refresh token");
                return Err(ApiError::TokenInvalid);
            }
            Err(err) => {
                debug!(error = %err, "Refresh token verification failed");
                self.audit.refresh_rejected("verification failed");
                return Err(ApiError::TokenInvalid);
            }
        };

        let access = signer.issue_at(refresh.subject(), TokenKind::Access, now)?;
        let next_access = self.issuer.prepare(&access, now)?;
        let next_refresh = self.issuer.prepare(&refresh, now)?;

        // Only the caller whose delete removed the live entry may rotate.
        if !store.delete(handle).await {
            self.audit.rotation_lost_race(refresh.subject());
            return Err(ApiError::InvalidOrExpiredRefreshToken);
        }

        let pair = TokenPair {
            access: self.issuer.commit(next_access).await,
            refresh: self.issuer.commit(next_refresh).await,
        };
        self.audit.token_rotated(refresh.subject());
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::credential_store::{CredentialStore, InMemoryCredentialStore};
    use crate::security::signer::TokenSigner;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (InMemoryCredentialStore, TokenIssuer, TokenRotator) {
        let store = InMemoryCredentialStore::new();
        let signer = Arc::new(TokenSigner::new(
            "k",
            Duration::from_secs(300),
            Duration::from_secs(3600),
        ));
        let issuer = TokenIssuer::new(signer, Arc::new(store.clone()));
        let rotator = TokenRotator::new(issuer.clone());
        (store, issuer, rotator)
    }

    async fn refresh_handle(issuer: &TokenIssuer, subject: u64) -> String {
        let token = issuer.signer().issue(subject, TokenKind::Refresh).unwrap();
        issuer.wrap(&token).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_handle() {
        let (_, _, rotator) = setup();
        assert!(matches!(
            rotator.rotate(None).await,
            Err(ApiError::MissingRefreshToken)
        ));
        assert!(matches!(
            rotator.rotate(Some("  ")).await,
            Err(ApiError::MissingRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let (_, _, rotator) = setup();
        assert!(matches!(
            rotator.rotate(Some("nope")).await,
            Err(ApiError::InvalidOrExpiredRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_rotation_is_single_use() {
        let (store, issuer, rotator) = setup();
        let h1 = refresh_handle(&issuer, 11).await;

        let first = rotator.rotate(Some(h1.as_str())).await.unwrap();
        assert_ne!(first.refresh, h1);

        assert!(matches!(
            rotator.rotate(Some(h1.as_str())).await,
            Err(ApiError::InvalidOrExpiredRefreshToken)
        ));

        let second = rotator.rotate(Some(first.refresh.as_str())).await.unwrap();
        assert_ne!(second.refresh, first.refresh);
        // old access handles stay valid until they expire
        assert!(store.get(&first.access).await.is_some());
    }

    #[tokio::test]
    async fn test_rotation_keeps_underlying_refresh_token() {
        let (store, issuer, rotator) = setup();
        let h1 = refresh_handle(&issuer, 11).await;
        let before = store.get(&h1).await.unwrap();

        let pair = rotator.rotate(Some(h1.as_str())).await.unwrap();
        assert_eq!(store.get(&pair.refresh).await.unwrap(), before);

        let access = store.get(&pair.access).await.unwrap();
        let access = issuer.signer().verify(&access).unwrap();
        assert_eq!(access.subject(), 11);
        assert_eq!(access.kind(), TokenKind::Access);
    }

    #[tokio::test]
    async fn test_access_handle_cannot_refresh() {
        let (store, issuer, rotator) = setup();
        let access = issuer.issue_access(4).await.unwrap();
        assert!(matches!(
            rotator.rotate(Some(access.as_str())).await,
            Err(ApiError::TokenInvalid)
        ));
        assert!(store.get(&access).await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_token_leaves_store_untouched() {
        let (store, _, rotator) = setup();
        store
            .put("forged", "not.a.token", Duration::from_secs(60))
            .await;
        assert!(matches!(
            rotator.rotate(Some("forged")).await,
            Err(ApiError::TokenInvalid)
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_handle_dies_with_its_refresh_token() {
        let store = InMemoryCredentialStore::new();
        let signer = Arc::new(TokenSigner::new(
            "k",
            Duration::from_secs(300),
            Duration::from_secs(1),
        ));
        let issuer = TokenIssuer::new(signer, Arc::new(store.clone()));
        let rotator = TokenRotator::new(issuer.clone());

        let token = issuer.signer().issue(8, TokenKind::Refresh).unwrap();
        let handle = issuer.wrap(&token).await.unwrap();
        let left = token.claims().remaining_at(Utc::now()).unwrap_or_default();
        tokio::time::sleep(left + Duration::from_millis(20)).await;

        // the entry is gone no later than the token itself
        assert!(store.get(&handle).await.is_none());
        assert!(matches!(
            rotator.rotate(Some(handle.as_str())).await,
            Err(ApiError::InvalidOrExpiredRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_rotation_at_expiry_leaves_store_untouched() {
        let (store, issuer, rotator) = setup();
        let token = issuer.signer().issue(9, TokenKind::Refresh).unwrap();
        let handle = issuer.wrap(&token).await.unwrap();

        let at_expiry = token.claims().expires_at();
        assert!(matches!(
            rotator.rotate_at(Some(handle.as_str()), at_expiry).await,
            Err(ApiError::TokenInvalid)
        ));
        // no handle consumed, no orphan access handle
        assert_eq!(store.len().await, 1);
        assert!(store.get(&handle).await.is_some());

        let before_expiry = at_expiry - chrono::Duration::seconds(60);
        let pair = rotator
            .rotate_at(Some(handle.as_str()), before_expiry)
            .await
            .unwrap();
        assert!(store.get(&handle).await.is_none());
        assert!(store.get(&pair.refresh).await.is_some());
        assert!(store.get(&pair.access).await.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_rotations_have_one_winner() {
        let (_, issuer, rotator) = setup();
        let handle = refresh_handle(&issuer, 21).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let rotator = rotator.clone();
                let handle = handle.clone();
                tokio::spawn(async move { rotator.rotate(Some(handle.as_str())).await })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => wins += 1,
                Err(ApiError::InvalidOrExpiredRefreshToken) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
    }
}
