use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use super::routes::ServerContext;
use crate::ledger::PlayerId;

/// Seam to the external authentication service: the engine only needs to
/// turn an opaque bearer token into a stable player id.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<PlayerId>;
}

/// Repository demo convention: the token *is* the player id. Unknown
/// players are minted with the configured initial balance on first ledger
/// touch, so any well-formed token yields a playable session.
#[derive(Default)]
pub struct DemoTokenResolver;

const MAX_TOKEN_LEN: usize = 128;

#[async_trait]
impl TokenResolver for DemoTokenResolver {
    async fn resolve(&self, token: &str) -> Option<PlayerId> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return None;
        }
        if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(PlayerId::new(token))
    }
}

/// Extractor for authenticated endpoints. Rejects with `UNAUTHENTICATED`
/// when the bearer token is missing or cannot be resolved.
pub struct AuthedPlayer(pub PlayerId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthedPlayer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<Arc<ServerContext>>()
            .cloned()
            .ok_or_else(|| ApiError::internal("server context missing"))?;
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthenticated)?;
        let player = ctx
            .auth
            .resolve(token)
            .await
            .ok_or(ApiError::Unauthenticated)?;
        Ok(AuthedPlayer(player))
    }
}
