use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    models::{ChangePasswordRequest, RegisterRequest, UserProfile},
    password,
    rate_limit::{LoginTarget, LoginThrottle},
    session::{
        NewAccount, SessionError, SessionManager, SubjectStatus, TokenPair, UserDirectoryState,
    },
    store::StoreError,
    token::Role,
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;
const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    /// Deliberately silent about which throttle tripped.
    #[error("too many login attempts, try again later")]
    LimitExceeded,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is disabled")]
    SubjectDisabled { reason: Option<String> },
    #[error("username or email is already registered")]
    AccountExists,
    #[error("current password is incorrect")]
    WrongPassword,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("account not found")]
    AccountMissing,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Session(SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SessionError> for LoginError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(e) => LoginError::Store(e),
            other => LoginError::Session(other),
        }
    }
}

/// LoginOutcome
///
/// A fresh session for a successfully authenticated account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginOutcome {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub tokens: TokenPair,
}

/// LoginService
///
/// The throttled front door plus account self-service. Both login windows are
/// counted before any password check, so a throttled request never reaches
/// the hash.
#[derive(Clone)]
pub struct LoginService {
    throttle: LoginThrottle,
    directory: UserDirectoryState,
    sessions: SessionManager,
}

impl LoginService {
    pub fn new(
        throttle: LoginThrottle,
        directory: UserDirectoryState,
        sessions: SessionManager,
    ) -> Self {
        Self {
            throttle,
            directory,
            sessions,
        }
    }

    /// `login` may be a username or an email. Either one counts against the
    /// same per-account window once it resolves.
    pub async fn login(
        &self,
        client_ip: &str,
        login: &str,
        password: &str,
    ) -> Result<LoginOutcome, LoginError> {
        let account = self.directory.find_by_login(login).await?;
        let target = match &account {
            Some(account) => LoginTarget::Account(account.subject.id),
            None => LoginTarget::Unknown(login),
        };
        if !self.throttle.admit(client_ip, target).await? {
            return Err(LoginError::LimitExceeded);
        }

        let account = account.ok_or(LoginError::InvalidCredentials)?;

        if !password::verify_password_blocking(password.to_string(), account.password_hash.clone())
            .await
        {
            tracing::info!(user_id = account.subject.id, "login with wrong password");
            return Err(LoginError::InvalidCredentials);
        }

        if let SubjectStatus::Banned { reason } = account.subject.status {
            tracing::info!(user_id = account.subject.id, "login refused for banned account");
            return Err(LoginError::SubjectDisabled {
                reason: reason.filter(|r| !r.trim().is_empty()),
            });
        }

        let tokens = self
            .sessions
            .issue_pair(account.subject.id, account.subject.role)?;

        // Bookkeeping only; a failure here must not undo a valid login.
        if let Err(e) = self.directory.record_login(account.subject.id).await {
            tracing::warn!(user_id = account.subject.id, error = %e, "failed to stamp last login");
        }

        tracing::info!(user_id = account.subject.id, role = %account.subject.role, "login succeeded");
        Ok(LoginOutcome {
            user_id: account.subject.id,
            username: account.username,
            role: account.subject.role,
            tokens,
        })
    }

    /// Creates an active student account. No session is issued; the caller
    /// logs in afterwards.
    pub async fn register(&self, req: RegisterRequest) -> Result<UserProfile, LoginError> {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();

        if !USERNAME_LEN.contains(&username.chars().count())
            || username.chars().any(|c| c.is_whitespace() || c == '@')
        {
            return Err(LoginError::InvalidInput(
                "username must be 3 to 50 characters without spaces or '@'",
            ));
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(LoginError::InvalidInput("email address is not valid")),
        }
        check_password_strength(&req.password)?;

        let password_hash = password::hash_password_blocking(req.password)
            .await
            .map_err(LoginError::Hashing)?;

        let subject = self
            .directory
            .create_account(NewAccount {
                username,
                email,
                real_name: req.real_name.trim().to_string(),
                password_hash,
            })
            .await?
            .ok_or(LoginError::AccountExists)?;

        tracing::info!(user_id = subject.id, "account registered");
        Ok(UserProfile {
            id: subject.id,
            role: subject.role,
        })
    }

    /// Replaces the password of `user_id` after checking the current one.
    /// Sessions already issued stay valid.
    pub async fn change_password(
        &self,
        user_id: i64,
        req: ChangePasswordRequest,
    ) -> Result<(), LoginError> {
        check_password_strength(&req.new_password)?;

        let current = self
            .directory
            .password_hash(user_id)
            .await?
            .ok_or(LoginError::AccountMissing)?;

        if !password::verify_password_blocking(req.old_password, current).await {
            tracing::info!(user_id, "password change with wrong current password");
            return Err(LoginError::WrongPassword);
        }

        let hash = password::hash_password_blocking(req.new_password)
            .await
            .map_err(LoginError::Hashing)?;
        self.directory.update_password(user_id, &hash).await?;

        tracing::info!(user_id, "password changed");
        Ok(())
    }
}

fn check_password_strength(password: &str) -> Result<(), LoginError> {
    let len = password.chars().count();
    if (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        Ok(())
    } else {
        Err(LoginError::InvalidInput("password must be 6 to 128 characters"))
    }
}
