use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

/// StoreKey
///
/// A key into the shared expiring key store. Values can only be produced by the
/// builders below, so every subsystem writing to the store lives under its own
/// namespace and two unrelated features can never collide on a hand-formatted
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Namespaces. Each subsystem owns exactly one prefix.
const SESSION_PREFIX: &str = "session";
const RATE_LIMIT_PREFIX: &str = "ratelimit";

/// Keys owned by the session subsystem.
pub struct SessionKey;

impl SessionKey {
    /// Blacklist entry for a revoked token, keyed by its unique id.
    pub fn revoked(token_id: Uuid) -> StoreKey {
        StoreKey(format!("{SESSION_PREFIX}:revoked:{}", token_id.simple()))
    }
}

/// Keys owned by the rate limiting subsystem.
pub struct RateLimitKey;

impl RateLimitKey {
    pub fn login_ip(ip: &str) -> StoreKey {
        StoreKey(format!("{RATE_LIMIT_PREFIX}:login:ip:{}", escape(ip.trim())))
    }

    /// Login window of a known account, shared by every identifier (username or
    /// email) that resolves to it.
    pub fn login_account(user_id: i64) -> StoreKey {
        StoreKey(format!("{RATE_LIMIT_PREFIX}:login:account:{user_id}"))
    }

    /// Login window of an identifier that matched no account.
    pub fn login_name(login: &str) -> StoreKey {
        StoreKey(format!(
            "{RATE_LIMIT_PREFIX}:login:name:{}",
            escape(&login.trim().to_lowercase())
        ))
    }

    pub fn daily_download(user_id: i64, day: NaiveDate) -> StoreKey {
        StoreKey(format!(
            "{RATE_LIMIT_PREFIX}:download:user:{user_id}:{}",
            day.format("%Y-%m-%d")
        ))
    }
}

/// Percent-encodes a caller-supplied segment. The encoding is injective and
/// never yields the `:` separator, so no input can land in another bucket.
fn escape(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
