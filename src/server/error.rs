use crate::media::{ExtractError, PlanError, TranscodeError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Every way a request can fail before the response body starts streaming.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    UnsupportedInput(String),

    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Option<String>,
    },

    #[error("{message}")]
    UpstreamBlocked { message: String, details: String },

    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Transcode(String),

    #[error("{0}")]
    Busy(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::UnsupportedInput(_) | Self::InvalidResponse(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Upstream { status, .. } => *status,
            Self::UpstreamBlocked { .. } => StatusCode::FORBIDDEN,
            Self::Transcode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Upstream { details, .. } => details.as_deref(),
            Self::UpstreamBlocked { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Render as `{ "error": ..., "details": ... }`, the shape `/info` uses.
    pub fn into_json(self) -> Response {
        let message = self.to_string();
        let body = ErrorBody {
            error: &message,
            details: self.details(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Plain-text rendering, used by `/download`.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match self.details() {
            Some(details) => format!("{}: {}", self, details),
            None => self.to_string(),
        };
        (self.status(), body).into_response()
    }
}

impl From<ExtractError> for ProxyError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Blocked(details) => Self::UpstreamBlocked {
                message: "Access blocked by upstream. Try a different URL or add cookies."
                    .to_string(),
                details,
            },
            ExtractError::Failed(details) => Self::Upstream {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Failed to fetch info".to_string(),
                details: Some(details),
            },
            other => Self::Upstream {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Failed to fetch info".to_string(),
                details: Some(other.to_string()),
            },
        }
    }
}

impl From<PlanError> for ProxyError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NoInputUrl => Self::Upstream {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
                details: None,
            },
            other => Self::UnsupportedInput(other.to_string()),
        }
    }
}

impl From<TranscodeError> for ProxyError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Busy => Self::Busy(err.to_string()),
            other => Self::Transcode(format!("FFmpeg error: {}", other)),
        }
    }
}
