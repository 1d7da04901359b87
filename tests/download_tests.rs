use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use study_portal::{
    clock::{ClockState, ManualClock},
    download::{DownloadError, DownloadService},
    models::{CreateMaterialRequest, Material, MaterialStatus, UpdateMaterialRequest},
    rate_limit::{ConfigStore, DownloadQuota, QuotaCheck, RateLimiter},
    repository::MaterialRepository,
    review::ReviewState,
    storage::{MockStorageService, StorageState},
    store::{InMemoryKeyStore, StoreError},
};

// --- Mocks ---

#[derive(Default)]
struct MockMaterialRepo {
    rows: Mutex<HashMap<i64, Material>>,
    downloads: Mutex<Vec<(i64, i64)>>,
    fail_recording: bool,
}

impl MockMaterialRepo {
    fn with(materials: &[(i64, MaterialStatus)]) -> Self {
        let repo = Self::default();
        for &(id, status) in materials {
            repo.rows.lock().insert(
                id,
                Material {
                    id,
                    uploader_id: 1,
                    file_key: format!("materials/{id}.pdf"),
                    status,
                    ..Material::default()
                },
            );
        }
        repo
    }
}

#[async_trait]
impl MaterialRepository for MockMaterialRepo {
    async fn create(
        &self,
        _uploader_id: i64,
        _req: CreateMaterialRequest,
    ) -> Result<Material, StoreError> {
        Ok(Material::default())
    }

    async fn find(&self, id: i64) -> Result<Option<Material>, StoreError> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn transition(
        &self,
        _id: i64,
        _expected: MaterialStatus,
        _next: &ReviewState,
        _edit: Option<&UpdateMaterialRequest>,
    ) -> Result<Option<Material>, StoreError> {
        Ok(None)
    }

    async fn mark_deleted(&self, _id: i64) -> Result<Option<Material>, StoreError> {
        Ok(None)
    }

    async fn record_download(&self, material_id: i64, user_id: i64) -> Result<(), StoreError> {
        if self.fail_recording {
            return Err(StoreError::Unavailable("db down".into()));
        }
        self.downloads.lock().push((material_id, user_id));
        Ok(())
    }
}

struct FixedLimit(i64);

#[async_trait]
impl ConfigStore for FixedLimit {
    async fn get_int(&self, _key: &str) -> Result<Option<i64>, StoreError> {
        Ok(Some(self.0))
    }

    async fn create_default(
        &self,
        _key: &str,
        _value: i64,
        _description: &str,
        _category: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

const APPROVED: i64 = 1;
const PENDING: i64 = 2;
const DELETED: i64 = 3;

fn daily_quota(limit: i64) -> DownloadQuota {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 14, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryKeyStore::new(clock.clone() as ClockState));
    DownloadQuota::new(
        RateLimiter::new(store, clock.clone() as ClockState),
        Arc::new(FixedLimit(limit)),
        clock as ClockState,
        FixedOffset::east_opt(0).unwrap(),
    )
}

fn setup(
    limit: i64,
    storage: MockStorageService,
    repo: MockMaterialRepo,
) -> (Arc<MockMaterialRepo>, DownloadService) {
    with_quota(daily_quota(limit), storage, repo)
}

fn with_quota(
    quota: DownloadQuota,
    storage: MockStorageService,
    repo: MockMaterialRepo,
) -> (Arc<MockMaterialRepo>, DownloadService) {
    let repo = Arc::new(repo);
    let service = DownloadService::new(
        repo.clone(),
        quota,
        Arc::new(storage) as StorageState,
    );
    (repo, service)
}

fn catalogue() -> MockMaterialRepo {
    MockMaterialRepo::with(&[
        (APPROVED, MaterialStatus::Approved),
        (PENDING, MaterialStatus::Pending),
        (DELETED, MaterialStatus::Deleted),
    ])
}

#[tokio::test]
async fn test_download_grants_signed_url_and_counts() {
    let (repo, service) = setup(2, MockStorageService::new(), catalogue());

    let grant = service.get_download_url(APPROVED, 42).await.unwrap();
    assert!(grant.url.contains("materials/1.pdf"));
    assert_eq!(grant.remaining_today(), Some(1));
    assert_eq!(repo.downloads.lock().as_slice(), &[(APPROVED, 42)]);

    let second = service.get_download_url(APPROVED, 42).await.unwrap();
    assert_eq!(second.remaining_today(), Some(0));

    match service.get_download_url(APPROVED, 42).await.unwrap_err() {
        DownloadError::LimitExceeded { reset_at } => {
            assert_eq!(reset_at, Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap())
        }
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
    assert_eq!(repo.downloads.lock().len(), 2);
}

#[tokio::test]
async fn test_unapproved_materials_do_not_consume_quota() {
    let (repo, service) = setup(1, MockStorageService::new(), catalogue());

    assert_eq!(
        service.get_download_url(PENDING, 42).await.unwrap_err(),
        DownloadError::NotApproved
    );
    assert_eq!(
        service.get_download_url(DELETED, 42).await.unwrap_err(),
        DownloadError::NotApproved
    );
    assert_eq!(
        service.get_download_url(404, 42).await.unwrap_err(),
        DownloadError::NotFound
    );

    // The single allowed download is still available.
    assert!(service.get_download_url(APPROVED, 42).await.is_ok());
    assert_eq!(repo.downloads.lock().len(), 1);
}

#[tokio::test]
async fn test_signing_failure_does_not_consume_quota() {
    // Both services count against the same daily window.
    let quota = daily_quota(1);
    let (failing_repo, failing) =
        with_quota(quota.clone(), MockStorageService::new_failing(), catalogue());
    let (repo, working) = with_quota(quota, MockStorageService::new(), catalogue());

    for _ in 0..3 {
        assert!(matches!(
            failing.get_download_url(APPROVED, 42).await,
            Err(DownloadError::Signing(_))
        ));
    }
    assert!(failing_repo.downloads.lock().is_empty());

    // The single allowed download is still available, and then it is gone.
    let grant = working.get_download_url(APPROVED, 42).await.unwrap();
    assert_eq!(grant.remaining_today(), Some(0));
    assert!(matches!(
        working.get_download_url(APPROVED, 42).await,
        Err(DownloadError::LimitExceeded { .. })
    ));
    assert_eq!(repo.downloads.lock().len(), 1);
}

#[tokio::test]
async fn test_unlimited_when_limit_disabled() {
    let (_, service) = setup(0, MockStorageService::new(), catalogue());
    for _ in 0..30 {
        let grant = service.get_download_url(APPROVED, 42).await.unwrap();
        assert_eq!(grant.quota, QuotaCheck::Unlimited);
        assert_eq!(grant.remaining_today(), None);
    }
}

#[tokio::test]
async fn test_bookkeeping_failure_keeps_the_grant() {
    let repo = MockMaterialRepo {
        fail_recording: true,
        ..catalogue()
    };
    let (_, service) = setup(5, MockStorageService::new(), repo);
    assert!(service.get_download_url(APPROVED, 42).await.is_ok());
}
