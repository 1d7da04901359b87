use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    clock::ClockState,
    models::{CreateMaterialRequest, Material, MaterialStatus, ReviewOutcome, UpdateMaterialRequest},
    repository::MaterialRepositoryState,
    store::StoreError,
    token::Role,
};

/// Actor
///
/// Whoever is acting on a material: the uploader, a reviewer, or a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("material not found")]
    NotFound,
    #[error("not allowed to act on this material")]
    AccessDenied,
    #[error("a {status} material cannot be edited by its uploader")]
    NotEditable { status: MaterialStatus },
    #[error("material has already been reviewed ({status})")]
    AlreadyReviewed { status: MaterialStatus },
    #[error("a rejection reason is required")]
    MissingReason,
    #[error("material changed concurrently, reload and retry")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// ReviewState
///
/// The workflow-owned columns of a material, as computed by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewState {
    pub status: MaterialStatus,
    pub reviewer_id: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl ReviewState {
    pub fn of(material: &Material) -> Self {
        Self {
            status: material.status,
            reviewer_id: material.reviewer_id,
            reviewed_at: material.reviewed_at,
            rejection_reason: material.rejection_reason.clone(),
        }
    }

    /// Back in the queue with no trace of an earlier review.
    pub fn pending() -> Self {
        Self {
            status: MaterialStatus::Pending,
            reviewer_id: None,
            reviewed_at: None,
            rejection_reason: None,
        }
    }
}

/// Public iff approved; otherwise only the uploader and privileged actors.
pub fn is_visible_to(material: &Material, viewer: Option<&Actor>) -> bool {
    if material.status == MaterialStatus::Approved {
        return true;
    }
    viewer.is_some_and(|actor| actor.is_privileged() || actor.id == material.uploader_id)
}

/// Review columns after `actor` edits `material`.
///
/// Privileged edits leave the review untouched. An uploader may edit only a
/// pending or rejected material, and doing so always sends it back to pending.
pub fn plan_submit(material: &Material, actor: &Actor) -> Result<ReviewState, ReviewError> {
    if actor.is_privileged() {
        return Ok(ReviewState::of(material));
    }
    if material.uploader_id != actor.id {
        return Err(ReviewError::AccessDenied);
    }
    match material.status {
        MaterialStatus::Pending | MaterialStatus::Rejected => Ok(ReviewState::pending()),
        status => Err(ReviewError::NotEditable { status }),
    }
}

/// Review columns after a reviewer decides on `material`.
pub fn plan_decision(
    material: &Material,
    reviewer_id: i64,
    outcome: ReviewOutcome,
    rejection_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ReviewState, ReviewError> {
    if material.status != MaterialStatus::Pending {
        return Err(ReviewError::AlreadyReviewed {
            status: material.status,
        });
    }

    let rejection_reason = match outcome {
        ReviewOutcome::Approved => None,
        ReviewOutcome::Rejected => {
            let reason = rejection_reason
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .ok_or(ReviewError::MissingReason)?;
            Some(reason.to_string())
        }
    };

    Ok(ReviewState {
        status: outcome.into(),
        reviewer_id: Some(reviewer_id),
        reviewed_at: Some(now),
        rejection_reason,
    })
}

/// ReviewWorkflow
///
/// Applies the moderation state machine to stored materials. Every write is a
/// compare-and-set on the status the decision was based on, so two reviewers
/// racing on the same material cannot both succeed.
#[derive(Clone)]
pub struct ReviewWorkflow {
    repo: MaterialRepositoryState,
    clock: ClockState,
}

impl ReviewWorkflow {
    pub fn new(repo: MaterialRepositoryState, clock: ClockState) -> Self {
        Self { repo, clock }
    }

    /// New materials always start pending.
    pub async fn create(
        &self,
        uploader: &Actor,
        req: CreateMaterialRequest,
    ) -> Result<Material, ReviewError> {
        let material = self.repo.create(uploader.id, req).await?;
        tracing::info!(material_id = material.id, uploader = uploader.id, "material submitted");
        Ok(material)
    }

    pub async fn submit(
        &self,
        id: i64,
        actor: &Actor,
        edit: UpdateMaterialRequest,
    ) -> Result<Material, ReviewError> {
        let material = self.load(id).await?;
        let next = plan_submit(&material, actor)?;

        match self
            .repo
            .transition(id, material.status, &next, Some(&edit))
            .await?
        {
            Some(updated) => {
                tracing::info!(
                    material_id = id,
                    actor = actor.id,
                    from = %material.status,
                    to = %updated.status,
                    "material edited"
                );
                Ok(updated)
            }
            None => Err(self.explain_lost_race(id, false).await),
        }
    }

    pub async fn decide(
        &self,
        id: i64,
        reviewer_id: i64,
        outcome: ReviewOutcome,
        rejection_reason: Option<&str>,
    ) -> Result<Material, ReviewError> {
        let material = self.load(id).await?;
        let next = plan_decision(
            &material,
            reviewer_id,
            outcome,
            rejection_reason,
            self.clock.now(),
        )?;

        match self
            .repo
            .transition(id, MaterialStatus::Pending, &next, None)
            .await?
        {
            Some(updated) => {
                tracing::info!(material_id = id, reviewer_id, status = %updated.status, "material reviewed");
                Ok(updated)
            }
            None => {
                tracing::warn!(material_id = id, reviewer_id, "concurrent review lost the race");
                Err(self.explain_lost_race(id, true).await)
            }
        }
    }

    /// Administrative removal, allowed from any state.
    pub async fn delete(&self, id: i64) -> Result<Material, ReviewError> {
        let material = self.repo.mark_deleted(id).await?.ok_or(ReviewError::NotFound)?;
        tracing::info!(material_id = id, "material deleted");
        Ok(material)
    }

    /// Fetches a material, applying the visibility rule for `viewer`.
    pub async fn view(&self, id: i64, viewer: Option<&Actor>) -> Result<Material, ReviewError> {
        let material = self.load(id).await?;
        if !is_visible_to(&material, viewer) {
            return Err(ReviewError::AccessDenied);
        }
        Ok(material)
    }

    async fn load(&self, id: i64) -> Result<Material, ReviewError> {
        self.repo.find(id).await?.ok_or(ReviewError::NotFound)
    }

    /// Works out why a compare-and-set matched no row. For a failed decision a
    /// status change means someone else already reviewed the material.
    async fn explain_lost_race(&self, id: i64, deciding: bool) -> ReviewError {
        match self.repo.find(id).await {
            Ok(None) => ReviewError::NotFound,
            Ok(Some(current)) if deciding => ReviewError::AlreadyReviewed {
                status: current.status,
            },
            Ok(Some(_)) => ReviewError::Conflict,
            Err(e) => ReviewError::Store(e),
        }
    }
}
