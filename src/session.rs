use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    clock::ClockState,
    revocation::{Revocation, RevocationStore},
    store::{KeyStoreState, StoreError},
    token::{Claims, Role, TokenCodec, TokenError, TokenType},
};

/// Refresh tokens live this many times longer than access tokens.
pub const REFRESH_TTL_MULTIPLIER: i32 = 24;

// --- User directory contract ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectStatus {
    Active,
    Banned { reason: Option<String> },
}

/// Subject
///
/// The slice of a user record the session layer needs: who they are, what
/// role they currently hold, and whether they may still hold a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: i64,
    pub role: Role,
    pub status: SubjectStatus,
}

/// UserAccount
///
/// A subject plus the credentials needed to log in. Only the login path ever
/// loads one of these.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub subject: Subject,
    pub username: String,
    pub password_hash: String,
}

/// NewAccount
///
/// A self-registered account, already hashed. It is stored as an active student.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub real_name: String,
    pub password_hash: String,
}

/// UserDirectory
///
/// External collaborator backed by the relational store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Current role and status of a subject, or `None` if the account is gone.
    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, StoreError>;

    /// Looks an account up by username, falling back to email.
    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, StoreError>;

    async fn record_login(&self, id: i64) -> Result<(), StoreError>;

    /// Inserts an active student account. `Ok(None)` when the username or the
    /// email (case-insensitively) is already taken.
    async fn create_account(&self, account: NewAccount) -> Result<Option<Subject>, StoreError>;

    /// Stored password hash of an account, `None` if the account is gone.
    async fn password_hash(&self, id: i64) -> Result<Option<String>, StoreError>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError>;
}

pub type UserDirectoryState = Arc<dyn UserDirectory>;

// --- Session manager ---

/// SessionError
///
/// Every variant except `Store` is an "unauthorized" outcome for the client;
/// they stay separate so logs and metrics can tell replay from expiry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("token has expired")]
    Expired,
    #[error("token rejected: {0}")]
    Malformed(TokenError),
    #[error("token has been revoked")]
    Revoked,
    #[error("account is disabled")]
    SubjectDisabled { reason: Option<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => SessionError::Expired,
            other => SessionError::Malformed(other),
        }
    }
}

/// TokenPair
///
/// The credentials handed to a client on login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub access_ttl: Duration,
}

impl SessionPolicy {
    pub fn refresh_ttl(&self) -> Duration {
        self.access_ttl * REFRESH_TTL_MULTIPLIER
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::hours(2),
        }
    }
}

/// SessionManager
///
/// Issues token pairs and enforces their lifecycle: validation (signature and
/// expiry locally, then one blacklist round-trip), single-use refresh rotation,
/// and logout. The blacklist lives only in the external store; nothing is
/// cached here, and a store failure is always reported, never read as "valid".
#[derive(Clone)]
pub struct SessionManager {
    codec: TokenCodec,
    revocations: RevocationStore,
    directory: UserDirectoryState,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        codec: TokenCodec,
        store: KeyStoreState,
        directory: UserDirectoryState,
        clock: ClockState,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            codec,
            revocations: RevocationStore::new(store, clock),
            directory,
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn issue_pair(&self, subject: i64, role: Role) -> Result<TokenPair, SessionError> {
        let access = self
            .codec
            .issue(subject, role, TokenType::Access, self.policy.access_ttl)?;
        let refresh =
            self.codec
                .issue(subject, role, TokenType::Refresh, self.policy.refresh_ttl())?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.policy.access_ttl.num_seconds(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }

    pub async fn validate(&self, access_token: &str) -> Result<Claims, SessionError> {
        let claims = self.codec.verify(access_token, TokenType::Access)?;

        match self.revocations.is_revoked(claims.jti).await {
            Ok(false) => Ok(claims),
            Ok(true) => {
                tracing::warn!(
                    subject = claims.sub,
                    token_id = %claims.jti,
                    "revoked access token presented"
                );
                Err(SessionError::Revoked)
            }
            Err(e) => {
                tracing::error!(error = %e, "revocation lookup failed; refusing token");
                Err(e.into())
            }
        }
    }

    /// Exchanges a refresh token for a new pair. The presented token is
    /// blacklisted on the way out, so of several concurrent calls with the same
    /// token only the one that writes the blacklist entry gets a pair back.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let claims = self.codec.verify(refresh_token, TokenType::Refresh)?;

        if self.revocations.is_revoked(claims.jti).await? {
            tracing::warn!(
                subject = claims.sub,
                token_id = %claims.jti,
                "rotated refresh token reused"
            );
            return Err(SessionError::Revoked);
        }

        let subject = match self.directory.get_subject(claims.sub).await? {
            Some(subject) => subject,
            None => {
                tracing::info!(subject = claims.sub, "refresh for unknown subject");
                return Err(SessionError::SubjectDisabled { reason: None });
            }
        };
        if let SubjectStatus::Banned { reason } = subject.status {
            tracing::info!(subject = claims.sub, "refresh refused for banned subject");
            return Err(SessionError::SubjectDisabled { reason });
        }

        let pair = self.issue_pair(subject.id, subject.role)?;

        match self
            .revocations
            .revoke_until(claims.jti, claims.expires_at())
            .await?
        {
            Revocation::Recorded => {
                tracing::info!(subject = subject.id, "refresh token rotated");
                Ok(pair)
            }
            Revocation::AlreadyRevoked => {
                tracing::warn!(
                    subject = claims.sub,
                    token_id = %claims.jti,
                    "lost refresh race; token already rotated"
                );
                Err(SessionError::Revoked)
            }
            Revocation::Expired => Err(SessionError::Expired),
        }
    }

    /// Blacklists an access token for the rest of its lifetime. Logging out
    /// twice, or with an already expired token, succeeds without doing anything.
    pub async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let claims = self.codec.decode_signed(access_token, TokenType::Access)?;

        match self
            .revocations
            .revoke_until(claims.jti, claims.expires_at())
            .await?
        {
            Revocation::Recorded => tracing::info!(subject = claims.sub, "logged out"),
            Revocation::AlreadyRevoked => {
                tracing::debug!(subject = claims.sub, "logout repeated")
            }
            Revocation::Expired => {
                tracing::debug!(subject = claims.sub, "logout with expired token")
            }
        }
        Ok(())
    }
}
