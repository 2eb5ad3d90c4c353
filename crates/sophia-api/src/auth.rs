use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use clap::ValueEnum;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// Shared secret in the `x-api-key` header.
    ApiKey,
    /// HS256 bearer token in the `Authorization` header.
    Jwt,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub api_key: Option<String>,
    pub jwt_secret: Option<String>,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.mode {
            AuthMode::ApiKey => {
                if self.api_key.as_deref().map_or(true, str::is_empty) {
                    return Err("SOPHIA_API_KEY must be set when auth mode is api-key".into());
                }
            }
            AuthMode::Jwt => {
                if self.jwt_secret.as_deref().map_or(true, str::is_empty) {
                    return Err("SOPHIA_JWT_SECRET must be set when auth mode is jwt".into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Authenticated caller. Extracting it enforces the configured auth mode.
pub struct AuthUser {
    pub subject: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AuthConfig::from_ref(state);

        match config.mode {
            AuthMode::ApiKey => {
                let expected = config
                    .api_key
                    .as_deref()
                    .ok_or_else(|| ApiError::Unauthorized("api key auth not configured".into()))?;
                let presented = parts
                    .headers
                    .get("x-api-key")
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| ApiError::Unauthorized("missing x-api-key header".into()))?;
                if presented != expected {
                    return Err(ApiError::Unauthorized("invalid api key".into()));
                }
                Ok(AuthUser {
                    subject: "api-key".into(),
                })
            }
            AuthMode::Jwt => {
                let secret = config
                    .jwt_secret
                    .as_deref()
                    .ok_or_else(|| ApiError::Unauthorized("jwt auth not configured".into()))?;
                let token = parts
                    .headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
                let data = decode::<Claims>(
                    token,
                    &DecodingKey::from_secret(secret.as_bytes()),
                    &Validation::new(Algorithm::HS256),
                )
                .map_err(|err| ApiError::Unauthorized(format!("invalid token: {err}")))?;
                Ok(AuthUser {
                    subject: data.claims.sub,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_mode_requires_key() {
        let config = AuthConfig {
            mode: AuthMode::ApiKey,
            api_key: None,
            jwt_secret: None,
        };
        assert!(config.validate().is_err());

        let config = AuthConfig {
            mode: AuthMode::ApiKey,
            api_key: Some("secret".into()),
            jwt_secret: None,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn jwt_mode_requires_secret() {
        let config = AuthConfig {
            mode: AuthMode::Jwt,
            api_key: None,
            jwt_secret: Some(String::new()),
        };
        assert!(config.validate().is_err());
    }
}
