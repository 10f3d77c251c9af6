use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("Section {section} omitted: {reason}")]
    PartialAggregation {
        section: &'static str,
        reason: String,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("History error: {0}")]
    History(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Config source error: {0}")]
    ConfigSource(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Misconfigured: {0}")]
    Configuration(String),

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{self}");
        }

        (status, self.to_string()).into_response()
    }
}
