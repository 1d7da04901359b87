use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::ClockState;

/// Role
///
/// The RBAC role carried inside every token. Only `Admin` is privileged for the
/// review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Committee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Committee => "committee",
            Role::Admin => "admin",
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Study committee members and admins may publish materials.
    pub fn can_upload(&self) -> bool {
        matches!(self, Role::Committee | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "committee" => Ok(Role::Committee),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims
///
/// The signed payload. `jti` is the token's unique id and doubles as its
/// revocation key; `iat`/`exp` are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Lifetime left at `now`, or `None` once the token has expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at() - now)
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }
}

/// TokenError
///
/// Why a token was refused. Each kind stays distinct so callers can log and
/// react to them separately.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token type {found:?} presented where {expected:?} was required")]
    WrongType {
        expected: TokenType,
        found: TokenType,
    },
    #[error("token lifetime must be positive")]
    InvalidLifetime,
}

/// IssuedToken
///
/// What `TokenCodec::issue` hands back: the compact token plus the metadata the
/// caller needs without decoding it again.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// TokenCodec
///
/// Signs and verifies stateless HS256 JWTs. The codec never touches a store;
/// revocation is layered on top by the session manager. Expiry is judged
/// against the injected clock, not the library's system-time check.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    clock: ClockState,
}

impl TokenCodec {
    pub fn new(secret: &[u8], clock: ClockState) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            clock,
        }
    }

    pub fn issue(
        &self,
        subject: i64,
        role: Role,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        if ttl.num_seconds() <= 0 {
            return Err(TokenError::InvalidLifetime);
        }

        let issued_at = self.clock.now();
        let expires_at = issued_at + ttl;
        let claims = Claims {
            sub: subject,
            role,
            token_type,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };

        // Encoding only fails on key/serialization problems, which cannot
        // happen for an HMAC secret and this claim set.
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Malformed)?;

        Ok(IssuedToken {
            token,
            id: claims.jti,
            expires_at: claims.expires_at(),
        })
    }

    /// Full verification: signature, type and expiry.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = self.decode_signed(token, expected)?;
        if claims.remaining(self.clock.now()).is_none() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Signature and type only. Used by logout, which must still recognise a
    /// token that has already run out.
    pub fn decode_signed(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        let claims = data.claims;
        if claims.token_type != expected {
            return Err(TokenError::WrongType {
                expected,
                found: claims.token_type,
            });
        }
        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed);
        }
        Ok(claims)
    }
}
