//! Routing and environment inspection handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use tandem_core::{EnvironmentName, ImageTag, TargetGroupId};
use tandem_routing::{Action, RequestInfo};

use crate::ApiState;
use crate::response::{error_response, routing_error, ApiResponse};

/// Summary of an installed listener.
#[derive(Debug, Serialize)]
pub struct ListenerSummary {
    pub name: String,
    pub restricted: bool,
    pub rules: usize,
    pub default_action: Action,
}

/// GET /api/v1/listeners
pub async fn list_listeners(State(state): State<ApiState>) -> impl IntoResponse {
    let listeners: Vec<ListenerSummary> = state
        .routing
        .list()
        .iter()
        .map(|l| ListenerSummary {
            name: l.name().to_string(),
            restricted: l.is_restricted(),
            rules: l.rules().len(),
            default_action: l.default_action().clone(),
        })
        .collect();
    ApiResponse::ok(listeners).into_response()
}

/// Request attributes to evaluate, as query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct DecisionQuery {
    pub source: Option<String>,
    pub path: Option<String>,
}

/// GET /api/v1/listeners/:name/decision?source=&path=
pub async fn listener_decision(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<DecisionQuery>,
) -> impl IntoResponse {
    let req = RequestInfo::from_raw(query.source.as_deref(), query.path.as_deref());
    match state.routing.evaluate(&name, &req) {
        Ok(decision) => ApiResponse::ok(decision).into_response(),
        Err(e) => routing_error(&e),
    }
}

/// Deployment group as operators see it.
#[derive(Debug, Serialize)]
pub struct DeploymentGroupView {
    pub name: String,
    pub environment: EnvironmentName,
    pub listener: String,
    pub live: TargetGroupId,
    pub shadow: TargetGroupId,
    pub live_task_set: Option<String>,
    pub live_tag: Option<ImageTag>,
    pub updated_at: u64,
}

/// GET /api/v1/deployment-groups/:name
pub async fn get_deployment_group(State(state): State<ApiState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.store.get_deployment_group(&name) {
        Ok(Some(group)) => ApiResponse::ok(DeploymentGroupView {
            live: group.live_target().clone(),
            shadow: group.shadow_target().clone(),
            name: group.name,
            environment: group.environment,
            listener: group.listener,
            live_task_set: group.live_task_set,
            live_tag: group.live_tag,
            updated_at: group.updated_at,
        })
        .into_response(),
        Ok(None) => error_response("deployment group not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/environments/:name
pub async fn get_environment(State(state): State<ApiState>, Path(name): Path<String>) -> impl IntoResponse {
    let Some(environment) = EnvironmentName::parse(&name) else {
        return error_response(&format!("unknown environment '{name}'"), StatusCode::NOT_FOUND);
    };
    match state.store.get_environment_status(environment) {
        Ok(Some(status)) => ApiResponse::ok(status).into_response(),
        Ok(None) => error_response("environment has not been deployed yet", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
