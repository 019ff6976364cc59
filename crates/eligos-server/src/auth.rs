//! Token issuance and verification, password hashing, and the bearer
//! extractor for protected routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use eligos_core::UserId;

use crate::error::ApiError;
use crate::server::AppState;

pub const ISSUER: &str = "eligos";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("malformed authorization header")]
    InvalidAuthHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 signing material plus the password hashing cost.
#[derive(Clone)]
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
    bcrypt_cost: u32,
}

impl AuthKeys {
    pub fn new(secret: &SecretString, ttl_days: i64, bcrypt_cost: u32) -> Self {
        let raw = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(raw),
            decoding: DecodingKey::from_secret(raw),
            validation,
            ttl: chrono::Duration::days(ttl_days),
            bcrypt_cost,
        }
    }

    pub fn issue_token(&self, user: &UserId) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.to_string(),
            iss: ISSUER.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Verify a token and return the identity it was issued to.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;
        Ok(UserId::from_raw(data.claims.sub))
    }

    /// bcrypt on a blocking thread.
    pub async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub async fn verify_password(&self, password: String, hash: String) -> Result<bool, AuthError> {
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }
    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// The verified caller of a protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?;
        let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        let token = bearer_token(value)?;
        Ok(Self(state.auth.verify(token)?))
    }
}
