use anyhow::anyhow;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;
use crate::security::audit_log::AuditLogger;
use crate::security::auth::IdentityVerifier;
use crate::security::credential_store::CredentialStore;
use crate::security::signer::{SignedToken, TokenKind, TokenSigner};

/// Client-facing credential pair. Both values are opaque handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_handle() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Mints signed tokens and registers them behind opaque handles.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    signer: Arc<TokenSigner>,
    store: Arc<dyn CredentialStore>,
    audit: AuditLogger,
}

impl TokenIssuer {
    pub fn new(signer: Arc<TokenSigner>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            signer,
            store,
            audit: AuditLogger::new(),
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Verify credentials and issue an opaque access/refresh pair.
    ///
    /// Nothing is written to the store unless the identity check passes.
    pub async fn login(
        &self,
        identity: &dyn IdentityVerifier,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, ApiError> {
        let Some(user_id) = identity.verify_credentials(email, password).await else {
            self.audit.login_failure(email);
            return Err(ApiError::InvalidCredentials);
        };

        let refresh = self.signer.issue(user_id, TokenKind::Refresh)?;
        let access = self.signer.issue(user_id, TokenKind::Access)?;
        let pair = TokenPair {
            access: self.wrap(&access).await?,
            refresh: self.wrap(&refresh).await?,
        };
        self.audit.login_success(user_id);
        Ok(pair)
    }

    /// Mint a fresh access token for `subject` and wrap it.
    pub async fn issue_access(&self, subject: u64) -> Result<String, ApiError> {
        let access = self.signer.issue(subject, TokenKind::Access)?;
        self.wrap(&access).await
    }

    /// Register `token` under a new handle that lives exactly as long as the
    /// token has left.
    pub async fn wrap(&self, token: &SignedToken) -> Result<String, ApiError> {
        let pending = self.prepare(token, Utc::now())?;
        Ok(self.commit(pending).await)
    }

    /// Pick a handle and TTL for `token` as of `now` without touching the
    /// store. Fails if the token is already expired at `now`.
    pub fn prepare(&self, token: &SignedToken, now: DateTime<Utc>) -> Result<PendingHandle, ApiError> {
        let ttl = token
            .claims()
            .remaining_at(now)
            .ok_or_else(|| anyhow!("refusing to wrap an expired token"))?;
        Ok(PendingHandle {
            handle: generate_handle(),
            token: token.clone(),
            ttl,
        })
    }

    /// Store a prepared handle. Cannot fail.
    pub async fn commit(&self, pending: PendingHandle) -> String {
        self.store
            .put(&pending.handle, pending.token.as_str(), pending.ttl)
            .await;
        debug!(
            subject = pending.token.subject(),
            kind = ?pending.token.kind(),
            ttl_ms = pending.ttl.as_millis() as u64,
            "Registered opaque handle"
        );
        pending.handle
    }
}

/// A handle chosen for a token but not yet written to the store.
#[derive(Debug, Clone)]
pub struct PendingHandle {
    handle: String,
    token: SignedToken,
    ttl: Duration,
}

impl PendingHandle {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
