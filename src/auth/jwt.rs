use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;

/// What a token is allowed to be used for. Encoded into the claims so a
/// password-reset token can never authenticate a request, no matter how
/// well-formed it is otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    EmailVerification,
    PasswordReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    session_ttl: Duration,
    remember_me_ttl: Duration,
    verification_ttl: Duration,
    reset_ttl: Duration,
}

impl TokenService {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            session_ttl: Duration::hours(config.session_token_expiry_hours),
            remember_me_ttl: Duration::days(config.remember_me_expiry_days),
            verification_ttl: Duration::hours(config.verification_token_expiry_hours),
            reset_ttl: Duration::minutes(config.reset_token_expiry_minutes),
        }
    }

    pub fn issue(&self, subject: Uuid, purpose: TokenPurpose, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject,
            purpose,
            iss: self.issuer.clone(),
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn session_token(&self, subject: Uuid, remember_me: bool) -> Result<String> {
        self.issue(subject, TokenPurpose::Session, self.session_duration(remember_me))
    }

    pub fn verification_token(&self, subject: Uuid) -> Result<String> {
        self.issue(subject, TokenPurpose::EmailVerification, self.verification_ttl)
    }

    pub fn reset_token(&self, subject: Uuid) -> Result<String> {
        self.issue(subject, TokenPurpose::PasswordReset, self.reset_ttl)
    }

    /// Expired tokens fail with `Expired`; bad signatures, wrong issuers,
    /// malformed payloads, and purpose mismatches all fail with `Invalid`.
    pub fn verify(&self, token: &str, expected: TokenPurpose) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[self.issuer.clone()]);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.purpose != expected {
            return Err(TokenError::Invalid);
        }

        Ok(data.claims)
    }

    pub fn session_duration(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.session_ttl
        }
    }

    pub fn reset_duration(&self) -> Duration {
        self.reset_ttl
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
}
