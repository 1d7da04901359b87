use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    clock::ClockState,
    keys::SessionKey,
    store::{KeyStoreState, StoreError},
};

const REVOKED_SENTINEL: &str = "1";

/// Outcome of a revocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    /// This call wrote the blacklist entry.
    Recorded,
    /// The token was already blacklisted by someone else.
    AlreadyRevoked,
    /// The token had already expired; nothing was written.
    Expired,
}

/// RevocationStore
///
/// Negative records only: an entry means "do not honour this token", and its
/// TTL matches what was left of the token's lifetime, so the blacklist never
/// outgrows the set of live tokens. The absence of an entry means "not
/// revoked", never "unknown token".
#[derive(Clone)]
pub struct RevocationStore {
    store: KeyStoreState,
    clock: ClockState,
}

impl RevocationStore {
    pub fn new(store: KeyStoreState, clock: ClockState) -> Self {
        Self { store, clock }
    }

    /// Blacklists `token_id` for `ttl`. A zero TTL is a no-op.
    pub async fn revoke(&self, token_id: Uuid, ttl: Duration) -> Result<Revocation, StoreError> {
        if ttl.is_zero() {
            return Ok(Revocation::Expired);
        }

        let key = SessionKey::revoked(token_id);
        let created = self
            .store
            .set_if_absent(&key, REVOKED_SENTINEL, ttl)
            .await?;

        if created {
            tracing::debug!(token_id = %token_id, ttl_secs = ttl.as_secs(), "token revoked");
            Ok(Revocation::Recorded)
        } else {
            Ok(Revocation::AlreadyRevoked)
        }
    }

    /// Blacklists `token_id` for whatever is left until `expires_at`.
    pub async fn revoke_until(
        &self,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Revocation, StoreError> {
        match (expires_at - self.clock.now()).to_std() {
            Ok(ttl) => self.revoke(token_id, ttl).await,
            Err(_) => Ok(Revocation::Expired),
        }
    }

    pub async fn is_revoked(&self, token_id: Uuid) -> Result<bool, StoreError> {
        self.store.exists(&SessionKey::revoked(token_id)).await
    }
}
