use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    iat: i64,
    exp: i64,
}

pub fn mint_session_token(
    cfg: &AuthConfig,
    user_id: UserId,
) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expires_at = now + Duration::seconds(cfg.ttl_seconds);
    let claims = Claims {
        sub: user_id.0,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )?;
    Ok((token, expires_at))
}

fn verify_session_token(cfg: &AuthConfig, token: &str) -> Option<UserId> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some(UserId(data.claims.sub))
}

/// Resolves the caller from the `Authorization: Bearer` header. Anything
/// missing, malformed, or expired is `Unauthenticated` — no partial
/// processing happens before this check.
pub fn require_authenticated_user(
    headers: &HeaderMap,
    cfg: &AuthConfig,
) -> Result<UserId, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::Unauthenticated,
                "not logged in; sign in and try again",
            )
        })?;

    verify_session_token(cfg, token).ok_or_else(|| {
        ApiError::new(
            ErrorCode::Unauthenticated,
            "session expired; sign in and try again",
        )
    })
}
