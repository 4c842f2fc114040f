//! Route definitions for the REST API.

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::{handlers, state::ServerState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the router with every endpoint mounted under `/dbaas`.
pub fn create_router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/engines", get(handlers::list_engines_handler))
        .route("/skus", get(handlers::list_skus_handler))
        .route("/host", get(handlers::host_handler))
        .route("/instances", get(handlers::list_instances_handler))
        .route("/instances", post(handlers::create_instance_handler))
        .route("/instances/{id}", get(handlers::get_instance_handler))
        .route("/instances/{id}", delete(handlers::destroy_instance_handler))
        .route("/instances/{id}/start", post(handlers::start_instance_handler))
        .route("/instances/{id}/stop", post(handlers::stop_instance_handler))
        .route(
            "/instances/{id}/restart",
            post(handlers::restart_instance_handler),
        )
        .route("/instances/{id}/logs", get(handlers::logs_handler))
        .route("/instances/{id}/stats", get(handlers::stats_handler))
        .route("/instances/{id}/inspect", get(handlers::inspect_handler))
        .route("/instances/{id}/metrics", get(handlers::metrics_handler))
        .route("/instances/{id}/health", get(handlers::health_handler))
        .route("/instances/{id}/snapshot", post(handlers::create_snapshot_handler))
        .route("/instances/{id}/snapshots", get(handlers::list_snapshots_handler))
        .route(
            "/instances/{id}/restore/{sid}",
            post(handlers::restore_snapshot_handler),
        )
        .route(
            "/instances/{id}/snapshots/{sid}",
            delete(handlers::delete_snapshot_handler),
        )
        .route("/instances/{id}/export", get(handlers::export_handler))
        .route(
            "/instances/{id}/credentials/rotate",
            post(handlers::rotate_credentials_handler),
        )
        .with_state(state);

    Router::new().nest("/dbaas", api)
}
