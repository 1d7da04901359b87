use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

use crate::{
    models::{CreateMaterialRequest, Material, MaterialStatus, UpdateMaterialRequest},
    rate_limit::ConfigStore,
    review::ReviewState,
    session::{NewAccount, Subject, SubjectStatus, UserAccount, UserDirectory},
    store::StoreError,
    token::Role,
};

/// MaterialRepository
///
/// Persistence contract for study materials. The review workflow is the only
/// writer of the review columns and goes through `transition`, which is a
/// compare-and-set on the current status.
#[async_trait]
pub trait MaterialRepository: Send + Sync {
    /// Inserts a new material in `pending`.
    async fn create(
        &self,
        uploader_id: i64,
        req: CreateMaterialRequest,
    ) -> Result<Material, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<Material>, StoreError>;

    /// Writes `next` (and the optional descriptive edit) only if the stored
    /// status still equals `expected`. `Ok(None)` means no row matched: the
    /// material is gone or someone else moved it first.
    async fn transition(
        &self,
        id: i64,
        expected: MaterialStatus,
        next: &ReviewState,
        edit: Option<&UpdateMaterialRequest>,
    ) -> Result<Option<Material>, StoreError>;

    /// Administrative removal from any state.
    async fn mark_deleted(&self, id: i64) -> Result<Option<Material>, StoreError>;

    /// Bumps the download counter and appends a download record.
    async fn record_download(&self, material_id: i64, user_id: i64) -> Result<(), StoreError>;
}

/// MaterialRepositoryState
///
/// The type shared through the application state.
pub type MaterialRepositoryState = Arc<dyn MaterialRepository>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("database pool timed out".into()),
            sqlx::Error::ColumnDecode { index, source } => StoreError::Corrupt {
                key: index,
                detail: source.to_string(),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

const MATERIAL_COLUMNS: &str = "id, uploader_id, title, description, course_name, category, \
     file_name, file_key, file_size, mime_type, status, reviewer_id, reviewed_at, \
     rejection_reason, download_count, created_at, updated_at";

/// PostgresRepository
///
/// Backs materials, the user directory and the operator settings with one
/// PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaterialRepository for PostgresRepository {
    async fn create(
        &self,
        uploader_id: i64,
        req: CreateMaterialRequest,
    ) -> Result<Material, StoreError> {
        let query = format!(
            "INSERT INTO materials \
                 (uploader_id, title, description, course_name, category, \
                  file_name, file_key, file_size, mime_type, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW()) \
             RETURNING {MATERIAL_COLUMNS}"
        );

        let material = sqlx::query_as::<_, Material>(&query)
            .bind(uploader_id)
            .bind(req.title)
            .bind(req.description)
            .bind(req.course_name)
            .bind(req.category)
            .bind(req.file_name)
            .bind(req.file_key)
            .bind(req.file_size)
            .bind(req.mime_type)
            .bind(MaterialStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .inspect_err(|e| tracing::error!("create material error: {:?}", e))?;

        Ok(material)
    }

    async fn find(&self, id: i64) -> Result<Option<Material>, StoreError> {
        let query = format!("SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = $1");
        let material = sqlx::query_as::<_, Material>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(material)
    }

    /// transition
    ///
    /// Single conditional UPDATE. Descriptive fields use COALESCE so a partial
    /// edit only touches what was sent; a decision passes no edit at all.
    async fn transition(
        &self,
        id: i64,
        expected: MaterialStatus,
        next: &ReviewState,
        edit: Option<&UpdateMaterialRequest>,
    ) -> Result<Option<Material>, StoreError> {
        let edit = edit.cloned().unwrap_or_default();
        let query = format!(
            "UPDATE materials \
             SET status = $3, \
                 reviewer_id = $4, \
                 reviewed_at = $5, \
                 rejection_reason = $6, \
                 title = COALESCE($7, title), \
                 description = COALESCE($8, description), \
                 course_name = COALESCE($9, course_name), \
                 category = COALESCE($10, category), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {MATERIAL_COLUMNS}"
        );

        let material = sqlx::query_as::<_, Material>(&query)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.status.as_str())
            .bind(next.reviewer_id)
            .bind(next.reviewed_at)
            .bind(next.rejection_reason.as_deref())
            .bind(edit.title)
            .bind(edit.description)
            .bind(edit.course_name)
            .bind(edit.category)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|e| tracing::error!("material transition error: {:?}", e))?;

        Ok(material)
    }

    async fn mark_deleted(&self, id: i64) -> Result<Option<Material>, StoreError> {
        let query = format!(
            "UPDATE materials SET status = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {MATERIAL_COLUMNS}"
        );
        let material = sqlx::query_as::<_, Material>(&query)
            .bind(id)
            .bind(MaterialStatus::Deleted.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(material)
    }

    async fn record_download(&self, material_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE materials SET download_count = download_count + 1 WHERE id = $1")
            .bind(material_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO download_records (material_id, user_id, created_at) VALUES ($1, $2, NOW())",
        )
        .bind(material_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// --- User directory ---

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    role: String,
    status: String,
    ban_reason: Option<String>,
}

impl UserRow {
    fn subject(&self) -> Result<Subject, StoreError> {
        let role = self.role.parse::<Role>().map_err(|detail| StoreError::Corrupt {
            key: format!("users.role[{}]", self.id),
            detail,
        })?;
        let status = match self.status.as_str() {
            "banned" => SubjectStatus::Banned {
                reason: self.ban_reason.clone(),
            },
            _ => SubjectStatus::Active,
        };
        Ok(Subject {
            id: self.id,
            role,
            status,
        })
    }
}

const USER_COLUMNS: &str = "id, username, password_hash, role, status, ban_reason";

#[async_trait]
impl UserDirectory for PostgresRepository {
    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.subject()).transpose()
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, StoreError> {
        // Exact username wins over an email match.
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE username = $1 OR LOWER(email) = LOWER($1) \
             ORDER BY (username = $1) DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(login.trim())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let subject = row.subject()?;
                Ok(Some(UserAccount {
                    subject,
                    username: row.username,
                    password_hash: row.password_hash,
                }))
            }
            None => Ok(None),
        }
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Option<Subject>, StoreError> {
        // NOT EXISTS catches mixed-case emails, ON CONFLICT a concurrent insert.
        let query = format!(
            "INSERT INTO users (username, email, real_name, password_hash, role, status) \
             SELECT $1, $2, $3, $4, $5, 'active' \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM users WHERE username = $1 OR LOWER(email) = LOWER($2) \
             ) \
             ON CONFLICT DO NOTHING \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.real_name)
            .bind(&account.password_hash)
            .bind(Role::Student.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.subject()).transpose()
    }

    async fn password_hash(&self, id: i64) -> Result<Option<String>, StoreError> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// --- Operator settings ---

#[async_trait]
impl ConfigStore for PostgresRepository {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT config_value FROM system_configs WHERE config_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        value
            .map(|raw| {
                raw.trim().parse::<i64>().map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    detail: format!("{raw:?}: {e}"),
                })
            })
            .transpose()
    }

    async fn create_default(
        &self,
        key: &str,
        value: i64,
        description: &str,
        category: &str,
    ) -> Result<(), StoreError> {
        // Idempotent: a concurrent seed or an operator edit wins.
        sqlx::query(
            "INSERT INTO system_configs (config_key, config_value, description, category) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (config_key) DO NOTHING",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(description)
        .bind(category)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
