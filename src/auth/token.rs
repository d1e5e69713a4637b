//! HS256 access and refresh tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::UserRole;
use crate::config::AuthConfig;
use crate::error::AppError;
use crate::store::User;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Invalid token type")]
    WrongKind,
    #[error("failed to sign token: {0}")]
    Encode(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(msg) => AppError::Internal(msg),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

/// Response body for login and refresh.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_token_minutes),
            refresh_ttl: Duration::days(config.refresh_token_days),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Scopes default to every permission of the user's role.
    pub fn issue_access(&self, user: &User, scopes: Option<Vec<String>>) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: Some(user.email.clone()),
            role: Some(user.role),
            scopes: scopes.unwrap_or_else(|| user.role.permission_strings()),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
            kind: TokenKind::Access,
            jti: None,
        };
        self.sign(&claims)
    }

    pub fn issue_refresh(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: None,
            role: None,
            scopes: Vec::new(),
            exp: (now + self.refresh_ttl).timestamp(),
            iat: now.timestamp(),
            kind: TokenKind::Refresh,
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };
        self.sign(&claims)
    }

    pub fn issue_pair(&self, user: &User, scopes: Option<Vec<String>>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(user, scopes)?,
            refresh_token: self.issue_refresh(user)?,
            token_type: "bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Verify signature, expiry, and that the token is of `expected` kind.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;
        if data.claims.kind != expected {
            return Err(TokenError::WrongKind);
        }
        Ok(data.claims)
    }

    #[cfg(test)]
    pub(crate) fn sign_claims(&self, claims: &Claims) -> String {
        self.sign(claims).unwrap()
    }
}
