use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::api::SharedState;
use crate::error::ApiError;
use crate::security::resolver::bearer_value;
use crate::users::User;

/// The account behind the request's `Authorization: Bearer` credential.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::NotAuthenticated)?;
        let bearer = bearer_value(header).ok_or(ApiError::NotAuthenticated)?;

        let claims = state.resolver.authenticate(bearer).await?;
        // a valid token for a deleted account is still a bad token
        let user = state
            .users
            .get(claims.sub)
            .await
            .ok_or(ApiError::TokenInvalid)?;
        Ok(AuthUser(user))
    }
}
