use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use study_portal::{
    clock::{Clock, ClockState, ManualClock},
    keys::RateLimitKey,
    rate_limit::{
        ConfigStore, DEFAULT_DAILY_DOWNLOAD_LIMIT, DOWNLOAD_DAILY_LIMIT_KEY, DownloadQuota,
        LoginLimits, LoginTarget, LoginThrottle, QuotaCheck, RateLimiter,
    },
    store::{ExpiringKeyStore, InMemoryKeyStore, StoreError},
};

// --- Mock Config Store ---

#[derive(Default)]
struct MockConfig {
    values: Mutex<HashMap<String, Result<i64, StoreError>>>,
    seeded: Mutex<Vec<(String, i64, String)>>,
}

impl MockConfig {
    fn with_limit(limit: i64) -> Self {
        let config = Self::default();
        config
            .values
            .lock()
            .insert(DOWNLOAD_DAILY_LIMIT_KEY.to_string(), Ok(limit));
        config
    }

    fn corrupt() -> Self {
        let config = Self::default();
        config.values.lock().insert(
            DOWNLOAD_DAILY_LIMIT_KEY.to_string(),
            Err(StoreError::Corrupt {
                key: DOWNLOAD_DAILY_LIMIT_KEY.to_string(),
                detail: "\"twenty\"".to_string(),
            }),
        );
        config
    }
}

#[async_trait]
impl ConfigStore for MockConfig {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.values.lock().get(key).cloned().transpose()
    }

    async fn create_default(
        &self,
        key: &str,
        value: i64,
        _description: &str,
        category: &str,
    ) -> Result<(), StoreError> {
        self.values
            .lock()
            .entry(key.to_string())
            .or_insert(Ok(value));
        self.seeded
            .lock()
            .push((key.to_string(), value, category.to_string()));
        Ok(())
    }
}

fn clock_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap(),
    ))
}

fn limiter(clock: &Arc<ManualClock>) -> (RateLimiter, Arc<InMemoryKeyStore>) {
    let store = Arc::new(InMemoryKeyStore::new(clock.clone() as ClockState));
    (
        RateLimiter::new(store.clone(), clock.clone() as ClockState),
        store,
    )
}

// --- Fixed window ---

#[tokio::test]
async fn test_fixed_window_allows_up_to_the_limit() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let (limiter, _) = limiter(&clock);
    let key = RateLimitKey::login_account(11);
    let window = Duration::from_secs(15 * 60);

    for expected_remaining in (0..5).rev() {
        let decision = limiter.check_and_increment(&key, 5, window).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
    }

    let sixth = limiter.check_and_increment(&key, 5, window).await.unwrap();
    assert!(!sixth.allowed);
    assert_eq!(sixth.remaining, 0);
    assert_eq!(sixth.reset_at, clock.now() + ChronoDuration::minutes(15));

    clock.advance(ChronoDuration::minutes(15));
    let fresh = limiter.check_and_increment(&key, 5, window).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_admit_exactly_the_limit() {
    const ATTEMPTS: u64 = 16;
    let clock = clock_at(2024, 4, 2, 10, 0);
    let (limiter, store) = limiter(&clock);
    let key = RateLimitKey::login_ip("10.0.0.42");

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            tokio::spawn(async move {
                limiter
                    .check_and_increment(&key, ATTEMPTS / 2, Duration::from_secs(60))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().allowed {
            allowed += 1;
        }
    }

    assert_eq!(allowed, ATTEMPTS / 2);
    assert_eq!(
        store.get(&key).await.unwrap().as_deref(),
        Some(ATTEMPTS.to_string().as_str())
    );
}

#[tokio::test]
async fn test_limiter_propagates_store_failures() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let (limiter, store) = limiter(&clock);
    store.set_offline(true);

    let result = limiter
        .check_and_increment(&RateLimitKey::login_ip("10.0.0.1"), 5, Duration::from_secs(60))
        .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

// --- Login throttle ---

#[tokio::test]
async fn test_account_window_trips_after_five_attempts() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let (limiter, _) = limiter(&clock);
    let throttle = LoginThrottle::new(limiter, LoginLimits::default());
    let alice = LoginTarget::Account(1);

    for _ in 0..5 {
        assert!(throttle.admit("10.0.0.1", alice).await.unwrap());
    }
    assert!(!throttle.admit("10.0.0.2", alice).await.unwrap());
    // Other accounts from the same address are unaffected.
    assert!(throttle.admit("10.0.0.1", LoginTarget::Account(2)).await.unwrap());

    clock.advance(ChronoDuration::minutes(15));
    assert!(throttle.admit("10.0.0.1", alice).await.unwrap());
}

#[tokio::test]
async fn test_ip_window_trips_after_twenty_attempts() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let (limiter, store) = limiter(&clock);
    let throttle = LoginThrottle::new(limiter, LoginLimits::default());

    for i in 0..20 {
        let name = format!("user{i}");
        assert!(throttle.admit("10.0.0.9", LoginTarget::Unknown(&name)).await.unwrap());
    }
    let fresh = LoginTarget::Unknown("fresh-user");
    assert!(!throttle.admit("10.0.0.9", fresh).await.unwrap());

    // The refused attempt never touched the per-name counter.
    assert!(
        !store
            .exists(&RateLimitKey::login_name("fresh-user"))
            .await
            .unwrap()
    );

    clock.advance(ChronoDuration::hours(1));
    assert!(throttle.admit("10.0.0.9", fresh).await.unwrap());
}

// --- Daily download quota ---

fn quota(
    clock: &Arc<ManualClock>,
    config: Arc<MockConfig>,
    offset_hours: i32,
) -> DownloadQuota {
    let (limiter, _) = limiter(clock);
    DownloadQuota::new(
        limiter,
        config,
        clock.clone() as ClockState,
        FixedOffset::east_opt(offset_hours * 3600).unwrap(),
    )
}

#[tokio::test]
async fn test_missing_limit_is_seeded_with_the_default() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let config = Arc::new(MockConfig::default());
    let quota = quota(&clock, config.clone(), 0);

    assert_eq!(
        quota.current_limit().await.unwrap(),
        DEFAULT_DAILY_DOWNLOAD_LIMIT
    );
    assert_eq!(
        config.seeded.lock().as_slice(),
        &[(
            DOWNLOAD_DAILY_LIMIT_KEY.to_string(),
            DEFAULT_DAILY_DOWNLOAD_LIMIT,
            "download".to_string()
        )]
    );

    // Second read finds the seeded value.
    quota.current_limit().await.unwrap();
    assert_eq!(config.seeded.lock().len(), 1);
}

#[tokio::test]
async fn test_unparseable_limit_falls_back_to_default() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let quota = quota(&clock, Arc::new(MockConfig::corrupt()), 0);
    assert_eq!(
        quota.current_limit().await.unwrap(),
        DEFAULT_DAILY_DOWNLOAD_LIMIT
    );
}

#[tokio::test]
async fn test_non_positive_limit_disables_the_quota() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    for limit in [0, -1] {
        let quota = quota(&clock, Arc::new(MockConfig::with_limit(limit)), 0);
        for _ in 0..50 {
            assert_eq!(quota.consume(7).await.unwrap(), QuotaCheck::Unlimited);
        }
    }
}

#[tokio::test]
async fn test_quota_resets_at_local_midnight() {
    // 23:50 UTC+2 on 2 April.
    let clock = clock_at(2024, 4, 2, 21, 50);
    let quota = quota(&clock, Arc::new(MockConfig::with_limit(3)), 2);

    for _ in 0..3 {
        assert!(quota.consume(7).await.unwrap().allowed());
    }
    let refused = quota.consume(7).await.unwrap();
    assert!(!refused.allowed());
    match refused {
        QuotaCheck::Counted(decision) => assert_eq!(
            decision.reset_at,
            Utc.with_ymd_and_hms(2024, 4, 2, 22, 0, 0).unwrap()
        ),
        QuotaCheck::Unlimited => panic!("quota should be counted"),
    }

    // Other users have their own allowance.
    assert!(quota.consume(8).await.unwrap().allowed());

    clock.advance(ChronoDuration::minutes(10));
    assert!(quota.consume(7).await.unwrap().allowed());
}

#[tokio::test]
async fn test_limit_changes_apply_immediately() {
    let clock = clock_at(2024, 4, 2, 10, 0);
    let config = Arc::new(MockConfig::with_limit(1));
    let quota = quota(&clock, config.clone(), 0);

    assert!(quota.consume(7).await.unwrap().allowed());
    assert!(!quota.consume(7).await.unwrap().allowed());

    config
        .values
        .lock()
        .insert(DOWNLOAD_DAILY_LIMIT_KEY.to_string(), Ok(5));
    assert!(quota.consume(7).await.unwrap().allowed());
}
