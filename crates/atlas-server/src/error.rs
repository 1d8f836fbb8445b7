use atlas_engine::attribution::AttributionError;
use atlas_engine::collector::CollectorError;
use atlas_engine::diff::DiffError;
use atlas_engine::frame::FrameError;
use atlas_engine::query::QueryError;
use atlas_store::DbError;
use atlas_util_error::FmtCompact as _;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use snafu::Snafu;
use tracing::{info, warn};

use crate::routes::AppJson;

const LOG_TARGET: &str = "atlas::server";

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("{entity} not found"))]
    NotFound { entity: String },
    #[snafu(display("Validation failed"))]
    Validation { errors: Vec<FieldError> },
    #[snafu(display("Upstream exhausted: {message}"))]
    Upstream { message: String },
    #[snafu(display("{message}"))]
    Internal { message: String },
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(target: LOG_TARGET, err = %self, "Request error");
        } else {
            info!(target: LOG_TARGET, err = %self, "Request error");
        }

        let body = match self {
            ApiError::Validation { errors } => ErrorBody {
                error: "Validation failed".to_owned(),
                errors: Some(errors),
            },
            other => ErrorBody {
                error: other.to_string(),
                errors: None,
            },
        };

        (status, AppJson(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Self::invalid_field("body", rejection.body_text())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self::Internal {
            message: err.fmt_compact().to_string(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::FrameNotFound { .. } => Self::not_found("frame"),
            other => Self::Internal {
                message: other.fmt_compact().to_string(),
            },
        }
    }
}

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::IntervalNotFound { .. } => Self::not_found("interval"),
            other => Self::Internal {
                message: other.fmt_compact().to_string(),
            },
        }
    }
}

impl From<DiffError> for ApiError {
    fn from(err: DiffError) -> Self {
        Self::Internal {
            message: err.fmt_compact().to_string(),
        }
    }
}

impl From<AttributionError> for ApiError {
    fn from(err: AttributionError) -> Self {
        Self::Internal {
            message: err.fmt_compact().to_string(),
        }
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Client { source } if source.is_transient() => Self::Upstream {
                message: source.fmt_compact().to_string(),
            },
            CollectorError::EgoUnresolved => {
                Self::invalid_field("username", "supply username or a known user_id")
            }
            other => Self::Internal {
                message: other.fmt_compact().to_string(),
            },
        }
    }
}
