use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    download::DownloadError, login::LoginError, review::ReviewError, session::SessionError,
};

/// ApiError
///
/// Everything a handler can fail with, mapped onto HTTP in one place.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("insufficient role for this operation")]
    Forbidden,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Login(e) => match e {
                LoginError::LimitExceeded => StatusCode::TOO_MANY_REQUESTS,
                LoginError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                LoginError::SubjectDisabled { .. } => StatusCode::FORBIDDEN,
                LoginError::AccountExists => StatusCode::CONFLICT,
                LoginError::WrongPassword | LoginError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                LoginError::AccountMissing => StatusCode::NOT_FOUND,
                LoginError::Hashing(_) | LoginError::Session(_) | LoginError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Session(e) => match e {
                SessionError::SubjectDisabled { .. } => StatusCode::FORBIDDEN,
                SessionError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::UNAUTHORIZED,
            },
            ApiError::Review(e) => match e {
                ReviewError::NotFound => StatusCode::NOT_FOUND,
                ReviewError::AccessDenied | ReviewError::NotEditable { .. } => {
                    StatusCode::FORBIDDEN
                }
                ReviewError::AlreadyReviewed { .. } | ReviewError::Conflict => {
                    StatusCode::CONFLICT
                }
                ReviewError::MissingReason => StatusCode::BAD_REQUEST,
                ReviewError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Download(e) => match e {
                DownloadError::NotFound => StatusCode::NOT_FOUND,
                DownloadError::NotApproved => StatusCode::FORBIDDEN,
                DownloadError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                DownloadError::Signing(_) | DownloadError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// Client-facing message. Infrastructure details stay in the logs.
    fn message(&self) -> String {
        match self {
            ApiError::Login(LoginError::SubjectDisabled { reason: Some(reason) })
            | ApiError::Session(SessionError::SubjectDisabled { reason: Some(reason) }) => {
                format!("account is disabled: {reason}")
            }
            ApiError::Session(SessionError::Store(_)) => {
                "session service temporarily unavailable".to_string()
            }
            ApiError::Session(_) => "invalid or expired session".to_string(),
            _ if self.status() == StatusCode::INTERNAL_SERVER_ERROR => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let mut body = json!({ "error": self.message() });

        if let ApiError::Download(DownloadError::LimitExceeded { reset_at }) = &self {
            body["reset_at"] = json!(reset_at);
            let retry_after = reset_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            return (status, [(header::RETRY_AFTER, retry_after)], Json(body)).into_response();
        }

        (status, Json(body)).into_response()
    }
}
