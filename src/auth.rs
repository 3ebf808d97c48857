//! Passwords and session tokens
//!
//! Passwords are stored as Argon2id PHC strings; the salt column keeps a copy
//! of the salt embedded in the hash. Session tokens are HS256 JWTs whose `sid` claim names the
//! `sessions` row that must still be live for the token to be accepted.

use chrono::{DateTime, Utc};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::SessionableType;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing failed: {0}")]
    Hash(String),
}

/// Columns written for a new password
#[derive(Debug, Clone)]
pub struct StoredPassword {
    pub salt: String,
    pub hash: String,
}

pub fn hash_password(password: &str) -> Result<StoredPassword, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hash(e.to_string()))?;

    Ok(StoredPassword {
        salt: salt.as_str().to_string(),
        hash: hash.to_string(),
    })
}

/// False for a wrong password and for a hash that does not parse
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: Uuid,
    /// Principal kind
    pub typ: SessionableType,
    /// Session row id
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(
        session_id: Uuid,
        sessionable_type: SessionableType,
        principal_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: principal_id,
            typ: sessionable_type,
            sid: session_id,
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

/// Issues and verifies session tokens with one shared secret
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}
