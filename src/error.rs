//! Unified application error model and mapping helpers.
//! Views and the HTTP layer share one error enum; collaborator failures
//! (`ApiError`) are converted into it at the nearest view boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Field-level input problems. Recovered locally, never reaches session/auth code.
    Validation { code: String, message: String },
    NotFound { code: String, message: String },
    /// Authorization denial. Distinct from NotFound and never turned into a redirect.
    Permission { code: String, message: String },
    /// Transient collaborator failure; the caller offers a retry, nothing retries automatically.
    Network { code: String, message: String },
    Auth { code: String, message: String },
    Conflict { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Permission { code, .. }
            | AppError::Network { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Permission { message, .. }
            | AppError::Network { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn permission<S: Into<String>>(code: S, msg: S) -> Self { AppError::Permission { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Only transient failures get a retry affordance.
    pub fn retryable(&self) -> bool {
        matches!(self, AppError::Network { .. })
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Permission { .. } => 403,
            AppError::Network { .. } => 503,
            AppError::Auth { .. } => 401,
            AppError::Conflict { .. } => 409,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<crate::backend::ApiError> for AppError {
    fn from(err: crate::backend::ApiError) -> Self {
        use crate::backend::ApiError;
        match err {
            ApiError::NotFound(what) => AppError::not_found("not_found".to_string(), format!("{} was not found.", what)),
            ApiError::Network(detail) => AppError::network("network_error".to_string(), format!("Unable to reach the server ({}). Please try again.", detail)),
            ApiError::InvalidCredentials(msg) => AppError::auth("invalid_credentials".to_string(), msg),
            ApiError::Rejected { status, message } if status == 409 => AppError::conflict("conflict".to_string(), message),
            ApiError::Rejected { status, message } if status == 403 => AppError::permission("forbidden".to_string(), message),
            ApiError::Rejected { message, .. } => AppError::validation("rejected".to_string(), message),
            ApiError::Decode(detail) => AppError::internal("decode_error".to_string(), detail),
            ApiError::Internal(detail) => AppError::internal("internal_error".to_string(), detail),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}
