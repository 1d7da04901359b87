use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    models::MaterialStatus,
    rate_limit::{DownloadQuota, QuotaCheck},
    repository::MaterialRepositoryState,
    storage::StorageState,
    store::StoreError,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("material not found")]
    NotFound,
    #[error("material is not available for download")]
    NotApproved,
    #[error("daily download limit reached")]
    LimitExceeded { reset_at: DateTime<Utc> },
    #[error("could not sign download url: {0}")]
    Signing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// DownloadGrant
///
/// A signed link plus what the quota said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGrant {
    pub url: String,
    pub quota: QuotaCheck,
}

impl DownloadGrant {
    /// Downloads left today, `None` when no limit is configured.
    pub fn remaining_today(&self) -> Option<u64> {
        match self.quota {
            QuotaCheck::Unlimited => None,
            QuotaCheck::Counted(decision) => Some(decision.remaining),
        }
    }
}

/// DownloadService
///
/// Hands out signed links for approved materials. The quota is only charged
/// once a link has actually been produced, so refused or failed requests never
/// cost the user a download.
#[derive(Clone)]
pub struct DownloadService {
    repo: MaterialRepositoryState,
    quota: DownloadQuota,
    storage: StorageState,
}

impl DownloadService {
    pub fn new(repo: MaterialRepositoryState, quota: DownloadQuota, storage: StorageState) -> Self {
        Self {
            repo,
            quota,
            storage,
        }
    }

    pub async fn get_download_url(
        &self,
        material_id: i64,
        user_id: i64,
    ) -> Result<DownloadGrant, DownloadError> {
        let material = self
            .repo
            .find(material_id)
            .await?
            .ok_or(DownloadError::NotFound)?;

        if material.status != MaterialStatus::Approved {
            return Err(DownloadError::NotApproved);
        }

        let url = self
            .storage
            .get_presigned_download_url(&material.file_key)
            .await
            .map_err(|e| {
                tracing::error!(material_id, error = %e, "presign failed");
                DownloadError::Signing(e)
            })?;

        let quota = self.quota.consume(user_id).await?;
        if let QuotaCheck::Counted(decision) = quota {
            if !decision.allowed {
                return Err(DownloadError::LimitExceeded {
                    reset_at: decision.reset_at,
                });
            }
        }

        if let Err(e) = self.repo.record_download(material_id, user_id).await {
            tracing::warn!(material_id, user_id, error = %e, "failed to record download");
        }

        tracing::info!(material_id, user_id, "download granted");
        Ok(DownloadGrant { url, quota })
    }
}
