use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc};
use std::{sync::Arc, time::Duration};

use crate::{
    clock::ClockState,
    keys::{RateLimitKey, StoreKey},
    store::{KeyStoreState, StoreError},
};

/// RateLimitDecision
///
/// The result of counting one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u64,
    /// When the current window's counter expires.
    pub reset_at: DateTime<Utc>,
}

/// RateLimiter
///
/// Fixed-window counter over the external key store. The window opens on the
/// first request for a key and closes when the store expires it; requests
/// straddling a boundary can therefore reach up to twice the limit in a short
/// span, which is the accepted behaviour. Counting relies on the store's
/// atomic increment, never a local read-modify-write.
#[derive(Clone)]
pub struct RateLimiter {
    store: KeyStoreState,
    clock: ClockState,
}

impl RateLimiter {
    pub fn new(store: KeyStoreState, clock: ClockState) -> Self {
        Self { store, clock }
    }

    pub async fn check_and_increment(
        &self,
        key: &StoreKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, StoreError> {
        let counter = self.store.increment(key, window).await?;
        let reset_at = self.clock.now()
            + ChronoDuration::from_std(counter.ttl).unwrap_or(ChronoDuration::zero());

        Ok(RateLimitDecision {
            allowed: counter.value <= limit,
            remaining: limit.saturating_sub(counter.value),
            reset_at,
        })
    }
}

// --- Login throttling ---

#[derive(Debug, Clone, Copy)]
pub struct LoginLimits {
    pub per_ip: u64,
    pub ip_window: Duration,
    pub per_user: u64,
    pub user_window: Duration,
}

impl Default for LoginLimits {
    fn default() -> Self {
        Self {
            per_ip: 20,
            ip_window: Duration::from_secs(60 * 60),
            per_user: 5,
            user_window: Duration::from_secs(15 * 60),
        }
    }
}

/// LoginTarget
///
/// What the per-account window is keyed by. An identifier that resolves to an
/// account is counted against the account id, so the username and the email
/// of one account share a single budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginTarget<'a> {
    Account(i64),
    Unknown(&'a str),
}

impl LoginTarget<'_> {
    fn key(&self) -> StoreKey {
        match self {
            LoginTarget::Account(id) => RateLimitKey::login_account(*id),
            LoginTarget::Unknown(login) => RateLimitKey::login_name(login),
        }
    }
}

/// LoginThrottle
///
/// Two independent windows guard the login endpoint: one per client IP and one
/// per target account. Both must pass before credentials are checked. The
/// caller only learns that the attempt was throttled, never which dimension
/// tripped.
#[derive(Clone)]
pub struct LoginThrottle {
    limiter: RateLimiter,
    limits: LoginLimits,
}

impl LoginThrottle {
    pub fn new(limiter: RateLimiter, limits: LoginLimits) -> Self {
        Self { limiter, limits }
    }

    /// Returns `Ok(true)` when the attempt may proceed. The per-account counter
    /// is left alone when the IP window has already refused the attempt.
    pub async fn admit(
        &self,
        client_ip: &str,
        target: LoginTarget<'_>,
    ) -> Result<bool, StoreError> {
        let by_ip = self
            .limiter
            .check_and_increment(
                &RateLimitKey::login_ip(client_ip),
                self.limits.per_ip,
                self.limits.ip_window,
            )
            .await?;
        if !by_ip.allowed {
            tracing::warn!(client_ip, "login throttled by client address");
            return Ok(false);
        }

        let by_target = self
            .limiter
            .check_and_increment(&target.key(), self.limits.per_user, self.limits.user_window)
            .await?;
        if !by_target.allowed {
            tracing::warn!(login = ?target, "login throttled by account");
            return Ok(false);
        }

        Ok(true)
    }
}

// --- Daily download quota ---

pub const DOWNLOAD_DAILY_LIMIT_KEY: &str = "download_daily_limit";
pub const DEFAULT_DAILY_DOWNLOAD_LIMIT: i64 = 20;

/// ConfigStore
///
/// Operator-editable settings kept in the relational store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when the key is absent. A present value that is not an
    /// integer is reported as `StoreError::Corrupt`.
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Inserts a setting unless one already exists.
    async fn create_default(
        &self,
        key: &str,
        value: i64,
        description: &str,
        category: &str,
    ) -> Result<(), StoreError>;
}

pub type ConfigStoreState = Arc<dyn ConfigStore>;

/// QuotaCheck
///
/// What `DownloadQuota::consume` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    /// No limit configured; nothing was counted.
    Unlimited,
    Counted(RateLimitDecision),
}

impl QuotaCheck {
    pub fn allowed(&self) -> bool {
        match self {
            QuotaCheck::Unlimited => true,
            QuotaCheck::Counted(decision) => decision.allowed,
        }
    }
}

/// DownloadQuota
///
/// Per-user daily download allowance. Windows are calendar days in the server
/// timezone, so each key expires at the next local midnight rather than a
/// fixed span after first use. The limit is re-read from the config store on
/// every call so operators can change it live.
#[derive(Clone)]
pub struct DownloadQuota {
    limiter: RateLimiter,
    config: ConfigStoreState,
    clock: ClockState,
    timezone: FixedOffset,
}

impl DownloadQuota {
    pub fn new(
        limiter: RateLimiter,
        config: ConfigStoreState,
        clock: ClockState,
        timezone: FixedOffset,
    ) -> Self {
        Self {
            limiter,
            config,
            clock,
            timezone,
        }
    }

    /// The configured limit, seeding the default entry when none exists.
    pub async fn current_limit(&self) -> Result<i64, StoreError> {
        match self.config.get_int(DOWNLOAD_DAILY_LIMIT_KEY).await {
            Ok(Some(limit)) => Ok(limit),
            Ok(None) => {
                self.config
                    .create_default(
                        DOWNLOAD_DAILY_LIMIT_KEY,
                        DEFAULT_DAILY_DOWNLOAD_LIMIT,
                        "Maximum downloads per user per day",
                        "download",
                    )
                    .await?;
                tracing::info!(
                    limit = DEFAULT_DAILY_DOWNLOAD_LIMIT,
                    "seeded default daily download limit"
                );
                Ok(DEFAULT_DAILY_DOWNLOAD_LIMIT)
            }
            Err(StoreError::Corrupt { detail, .. }) => {
                tracing::warn!(%detail, "unreadable daily download limit; using default");
                Ok(DEFAULT_DAILY_DOWNLOAD_LIMIT)
            }
            Err(e) => Err(e),
        }
    }

    /// Counts one download for `user_id` today. Call this only at the moment
    /// the download is actually granted.
    pub async fn consume(&self, user_id: i64) -> Result<QuotaCheck, StoreError> {
        let limit = self.current_limit().await?;
        if limit <= 0 {
            return Ok(QuotaCheck::Unlimited);
        }

        let (day, until_midnight) = self.today();
        let decision = self
            .limiter
            .check_and_increment(
                &RateLimitKey::daily_download(user_id, day),
                limit as u64,
                until_midnight,
            )
            .await?;

        if !decision.allowed {
            tracing::info!(user_id, limit, "daily download quota exhausted");
        }
        Ok(QuotaCheck::Counted(decision))
    }

    /// Today's date in the server timezone and the time left until it ends.
    fn today(&self) -> (NaiveDate, Duration) {
        let local = self.clock.now().with_timezone(&self.timezone);
        let day = local.date_naive();
        let next_midnight = day
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .and_then(|midnight| midnight.and_local_timezone(self.timezone).single());

        let left = next_midnight
            .and_then(|midnight| (midnight - local).to_std().ok())
            .filter(|left| !left.is_zero())
            .unwrap_or(Duration::from_secs(1));
        (day, left)
    }
}
