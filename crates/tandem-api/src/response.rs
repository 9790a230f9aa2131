//! Uniform JSON envelope and error-to-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use tandem_core::ReleaseError;
use tandem_routing::RoutingError;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error kind, e.g. `concurrency_conflict`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            kind: None,
        }),
    )
        .into_response()
}

pub fn status_for(error: &ReleaseError) -> StatusCode {
    match error {
        ReleaseError::Configuration(_) => StatusCode::BAD_REQUEST,
        ReleaseError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
        ReleaseError::ConcurrencyConflict(_) | ReleaseError::InvalidTransition(_) | ReleaseError::Aborted(_) => {
            StatusCode::CONFLICT
        }
        ReleaseError::SourceFetch(_)
        | ReleaseError::Build(_)
        | ReleaseError::HealthCheckTimeout(_)
        | ReleaseError::DeployLaunch(_) => StatusCode::BAD_GATEWAY,
        ReleaseError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn release_error(error: &ReleaseError) -> Response {
    (
        status_for(error),
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(error.to_string()),
            kind: Some(error.kind()),
        }),
    )
        .into_response()
}

pub fn routing_error(error: &RoutingError) -> Response {
    let status = match error {
        RoutingError::UnknownListener(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(&error.to_string(), status)
}
