//! tandem-api: REST API for the Tandem release orchestrator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/hooks/push` | Source push notification; starts staging |
//! | GET | `/api/v1/promotion` | Current promotion record |
//! | PUT | `/api/v1/promotion` | Promote a built tag to production |
//! | POST | `/api/v1/pipelines/production/runs` | Start the production pipeline |
//! | GET | `/api/v1/pipelines/{pipeline}/runs` | List runs of one pipeline |
//! | GET | `/api/v1/runs/{id}` | Run details |
//! | POST | `/api/v1/runs/{id}/abort` | Abort an in-flight run |
//! | GET | `/api/v1/listeners` | Installed listeners |
//! | GET | `/api/v1/listeners/{name}/decision` | Evaluate a request against a listener |
//! | GET | `/api/v1/deployment-groups/{name}` | Live and shadow target groups |
//! | GET | `/api/v1/environments/{name}` | Image an environment runs |

pub mod handlers;
pub mod response;
pub mod traffic_handlers;

use axum::Router;
use axum::routing::{get, post};
use tandem_pipeline::{Promoter, RunCoordinator};
use tandem_routing::RoutingTable;
use tandem_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub coordinator: RunCoordinator,
    pub promoter: Promoter,
    pub routing: RoutingTable,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/hooks/push", post(handlers::push_hook))
        .route("/promotion", get(handlers::get_promotion).put(handlers::put_promotion))
        .route("/pipelines/production/runs", post(handlers::start_production))
        .route("/pipelines/{pipeline}/runs", get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/runs/{id}/abort", post(handlers::abort_run))
        .route("/listeners", get(traffic_handlers::list_listeners))
        .route("/listeners/{name}/decision", get(traffic_handlers::listener_decision))
        .route("/deployment-groups/{name}", get(traffic_handlers::get_deployment_group))
        .route("/environments/{name}", get(traffic_handlers::get_environment))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
