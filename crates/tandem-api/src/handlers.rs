//! Pipeline, promotion, and run handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use tandem_core::PipelineKind;
use tandem_pipeline::PushOutcome;

use crate::ApiState;
use crate::response::{error_response, release_error, ApiResponse};

// ── Source hooks ───────────────────────────────────────────────

/// Push notification body.
#[derive(Debug, Deserialize)]
pub struct PushEvent {
    pub branch: String,
    pub revision: String,
}

/// POST /api/v1/hooks/push
pub async fn push_hook(State(state): State<ApiState>, Json(event): Json<PushEvent>) -> impl IntoResponse {
    info!(branch = %event.branch, revision = %event.revision, "push received");
    match state.coordinator.on_push(&event.branch, &event.revision) {
        Ok(outcome @ PushOutcome::Started { .. }) => (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response(),
        Ok(outcome @ PushOutcome::Ignored { .. }) => ApiResponse::ok(outcome).into_response(),
        Err(e) => release_error(&e),
    }
}

// ── Promotion ──────────────────────────────────────────────────

/// GET /api/v1/promotion
pub async fn get_promotion(State(state): State<ApiState>) -> impl IntoResponse {
    match state.promoter.current() {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("no tag has been promoted yet", StatusCode::NOT_FOUND),
        Err(e) => release_error(&e),
    }
}

/// Promotion request body.
#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub tag: String,
    #[serde(default)]
    pub promoted_by: Option<String>,
}

/// PUT /api/v1/promotion
pub async fn put_promotion(State(state): State<ApiState>, Json(req): Json<PromoteRequest>) -> impl IntoResponse {
    match state.promoter.promote(&req.tag, req.promoted_by.as_deref()).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => release_error(&e),
    }
}

// ── Runs ───────────────────────────────────────────────────────

/// Production start body. `{}` is a valid request.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// POST /api/v1/pipelines/production/runs
pub async fn start_production(State(state): State<ApiState>, Json(req): Json<StartRequest>) -> impl IntoResponse {
    match state.coordinator.start_production(req.requested_by.as_deref()) {
        Ok(run) => (StatusCode::ACCEPTED, ApiResponse::ok(run)).into_response(),
        Err(e) => release_error(&e),
    }
}

/// GET /api/v1/pipelines/:pipeline/runs
pub async fn list_runs(State(state): State<ApiState>, Path(pipeline): Path<String>) -> impl IntoResponse {
    let Some(kind) = PipelineKind::parse(&pipeline) else {
        return error_response(&format!("unknown pipeline '{pipeline}'"), StatusCode::NOT_FOUND);
    };
    match state.coordinator.list_runs(Some(kind)) {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => release_error(&e),
    }
}

/// GET /api/v1/runs/:id
pub async fn get_run(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.coordinator.get_run(&id) {
        Ok(Some(run)) => ApiResponse::ok(run).into_response(),
        Ok(None) => error_response("run not found", StatusCode::NOT_FOUND),
        Err(e) => release_error(&e),
    }
}

/// POST /api/v1/runs/:id/abort
pub async fn abort_run(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.coordinator.abort(&id) {
        Ok(Some(run)) => (StatusCode::ACCEPTED, ApiResponse::ok(run)).into_response(),
        Ok(None) => error_response("run not found", StatusCode::NOT_FOUND),
        Err(e) => release_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_pipeline::testing::Harness;

    fn test_state(h: &Harness) -> ApiState {
        ApiState {
            store: h.store.clone(),
            coordinator: h.coordinator.clone(),
            promoter: h.promoter.clone(),
            routing: h.table.clone(),
        }
    }

    fn push(branch: &str) -> Json<PushEvent> {
        Json(PushEvent {
            branch: branch.to_string(),
            revision: "abc1234def5678".to_string(),
        })
    }

    #[tokio::test]
    async fn push_on_tracked_branch_is_accepted() {
        let h = Harness::new();
        let resp = push_hook(State(test_state(&h)), push("main")).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn push_on_other_branch_is_ignored() {
        let h = Harness::new();
        let resp = push_hook(State(test_state(&h)), push("feature/x")).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(h.coordinator.list_runs(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_push_conflicts() {
        let h = Harness::new();
        h.builder.set_delay(std::time::Duration::from_millis(200));
        let state = test_state(&h);
        push_hook(State(state.clone()), push("main")).await;
        let resp = push_hook(State(state), push("main")).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn promotion_is_absent_at_bootstrap() {
        let h = Harness::new();
        let resp = get_promotion(State(test_state(&h))).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn promoting_an_unbuilt_tag_is_rejected() {
        let h = Harness::new();
        let req = Json(PromoteRequest {
            tag: "abc1234".to_string(),
            promoted_by: None,
        });
        let resp = put_promotion(State(test_state(&h)), req).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_pipeline_and_run() {
        let h = Harness::new();
        let state = test_state(&h);
        let resp = list_runs(State(state.clone()), Path("qa".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = get_run(State(state.clone()), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = abort_run(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn production_start_is_accepted() {
        let h = Harness::new();
        let resp = start_production(State(test_state(&h)), Json(StartRequest::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
}
