//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Directory
        .route("/establishments", post(handlers::register_establishment))
        .route("/establishments/:id/counters", get(handlers::list_counters))
        .route("/counters", post(handlers::register_counter))
        .route("/patients", post(handlers::register_patient))
        // Service requests
        .route("/requests", post(handlers::submit_request))
        .route("/requests/:key", get(handlers::get_request))
        .route("/requests/:key/accept", post(handlers::accept_request))
        .route("/requests/:key/reject", post(handlers::reject_request))
        .route("/requests/:key/reissue", post(handlers::reissue_request))
        .route("/patients/:uid/requests", get(handlers::list_patient_requests))
        .route("/counters/:id/requests", get(handlers::list_pending_requests))
        // Arrival authorizations
        .route(
            "/authorizations/:uid",
            get(handlers::get_authorization).delete(handlers::revoke_authorization),
        )
        .route(
            "/authorizations/:uid/reassign",
            post(handlers::reassign_authorization),
        )
        .route("/authorizations/:uid/chain", get(handlers::get_chain))
        .route("/counters/:id/awaiting", get(handlers::list_awaiting))
        // Arrivals
        .route("/arrivals", post(handlers::scan_arrival))
        .route(
            "/arrivals/:uid",
            get(handlers::get_pending_arrival).delete(handlers::abandon_arrival),
        )
        .route("/arrivals/:uid/pin", post(handlers::submit_pin))
        .route("/patients/:uid/arrivals", get(handlers::list_arrivals))
        // Active queue
        .route("/counters/:id/admit", post(handlers::admit_next))
        .route("/counters/:id/queue", get(handlers::get_counter_queue))
        .route("/queue/:key", get(handlers::get_queue_entry))
        .route("/queue/:key/end", post(handlers::end_service))
        // Notifications and events
        .route(
            "/patients/:uid/notifications",
            get(handlers::list_notifications),
        )
        .route("/counters/:id/events", get(handlers::stream_counter_events));

    // Build router with middleware
    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
