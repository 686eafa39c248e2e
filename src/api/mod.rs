//! Read API
//!
//! Serves stored items to the dashboard, bootstrapping polling for queries
//! seen for the first time.

pub mod bootstrap;
pub mod routes;

pub use bootstrap::{
    Bootstrapper, ItemPage, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use routes::{router, serve, AppState};

use crate::storage::StorageError;
use crate::HarvestError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Errors returned to read API clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid page.")]
    InvalidPage,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error.")]
    Internal(#[from] HarvestError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPage => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Internal(HarvestError::Storage(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            tracing::error!(error = %e, "Read request failed");
        }
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
