//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Upload pipeline and read projections
        .route("/v1/nodes", post(handlers::save_nodes))
        .route("/v1/nodes/batch", post(handlers::get_nodes_batch))
        .route("/v1/nodes/count", get(handlers::get_node_count))
        .route("/v1/nodes/{cid}", get(handlers::get_node))
        .route(
            "/v1/nodes/{cid}/published",
            post(handlers::set_published_on),
        )
        .route("/v1/chunks/{cid}", get(handlers::get_chunk))
        // Chain follower intake and archival status
        .route(
            "/v1/archival/confirmations",
            post(handlers::post_confirmations),
        )
        .route("/v1/archival/progress", get(handlers::get_progress))
        .route("/v1/archival/sweep", post(handlers::trigger_sweep))
        .route(
            "/v1/objects/{root_cid}/archival",
            get(handlers::get_object_archival),
        );

    let mut router = Router::new().merge(api_routes);

    // When enabled, this endpoint should only be reachable by the scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
