use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use crate::token::Role;

// --- Core Application Schemas (Mapped to Database) ---

/// MaterialStatus
///
/// Moderation state of an uploaded material. `Deleted` is terminal and only
/// reachable through administrative removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MaterialStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Deleted,
}

impl MaterialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialStatus::Pending => "pending",
            MaterialStatus::Approved => "approved",
            MaterialStatus::Rejected => "rejected",
            MaterialStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MaterialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MaterialStatus::Pending),
            "approved" => Ok(MaterialStatus::Approved),
            "rejected" => Ok(MaterialStatus::Rejected),
            "deleted" => Ok(MaterialStatus::Deleted),
            other => Err(format!("unknown material status: {other}")),
        }
    }
}

impl TryFrom<String> for MaterialStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Material
///
/// A study material record from the `materials` table. The review columns
/// (`status`, `reviewer_id`, `reviewed_at`, `rejection_reason`) are written only
/// by the review workflow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct Material {
    pub id: i64,
    pub uploader_id: i64,
    pub title: String,
    pub description: String,
    pub course_name: String,
    pub category: String,

    // Object storage reference; URLs are signed on demand.
    pub file_name: String,
    pub file_key: String,
    pub file_size: i64,
    pub mime_type: String,

    #[sqlx(try_from = "String")]
    pub status: MaterialStatus,
    pub reviewer_id: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Present iff `status` is `rejected`.
    pub rejection_reason: Option<String>,

    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ReviewOutcome
///
/// The two decisions a reviewer can make on a pending material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
}

impl From<ReviewOutcome> for MaterialStatus {
    fn from(outcome: ReviewOutcome) -> Self {
        match outcome {
            ReviewOutcome::Approved => MaterialStatus::Approved,
            ReviewOutcome::Rejected => MaterialStatus::Rejected,
        }
    }
}

// --- Request Payloads (Input Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// CreateMaterialRequest
///
/// Submitted after the client has uploaded the file itself; `file_key` points at
/// the stored object.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateMaterialRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub course_name: String,
    pub category: String,
    pub file_name: String,
    pub file_key: String,
    pub file_size: i64,
    pub mime_type: String,
}

/// UpdateMaterialRequest
///
/// Partial edit of the descriptive fields. Omitted fields keep their value.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateMaterialRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewMaterialRequest {
    pub outcome: ReviewOutcome,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

// --- Output Schemas ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DownloadUrlResponse {
    pub download_url: String,
    /// Downloads left today, absent when no daily limit is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_today: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: i64,
    pub role: Role,
}
