use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::security::audit_log::AuditLogger;
use crate::security::credential_store::CredentialStore;
use crate::security::signer::{Claims, TokenKind, TokenSigner};

/// Authenticates inbound bearer values.
///
/// A bearer that names a live opaque handle is swapped for the signed token
/// behind it. Anything else is handed to signature verification unchanged
/// when `accept_raw_tokens` is on, so raw signed access tokens keep working
/// and garbage still fails verification. With the flag off, an unknown handle
/// is rejected immediately.
#[derive(Debug, Clone)]
pub struct TokenResolver {
    signer: Arc<TokenSigner>,
    store: Arc<dyn CredentialStore>,
    accept_raw_tokens: bool,
    audit: AuditLogger,
}

impl TokenResolver {
    pub fn new(
        signer: Arc<TokenSigner>,
        store: Arc<dyn CredentialStore>,
        accept_raw_tokens: bool,
    ) -> Self {
        Self {
            signer,
            store,
            accept_raw_tokens,
            audit: AuditLogger::new(),
        }
    }

    pub async fn authenticate(&self, bearer: &str) -> Result<Claims, ApiError> {
        let raw = match self.store.get(bearer).await {
            Some(signed) => signed,
            None if self.accept_raw_tokens => {
                self.audit.raw_bearer_passthrough();
                bearer.to_string()
            }
            None => {
                self.audit.bearer_rejected("unknown handle");
                return Err(ApiError::TokenInvalid);
            }
        };

        let token = self.signer.verify(&raw).map_err(|err| {
            debug!(error = %err, "Bearer verification failed");
            self.audit.bearer_rejected("verification failed");
            ApiError::TokenInvalid
        })?;

        if token.kind() != TokenKind::Access {
            self.audit.bearer_rejected("not an access token");
            return Err(ApiError::TokenInvalid);
        }
        Ok(token.claims().clone())
    }
}

/// Pull the credential out of an `Authorization: Bearer <value>` header.
pub fn bearer_value(header: &str) -> Option<&str> {
    let (scheme, value) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
