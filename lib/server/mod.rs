//! The REST resource API.
//!
//! Mounted under `/dbaas` for the embedding HTTP host. Authentication and
//! authorization live outside the control plane: the host supplies a
//! `check(permission, subject)` predicate consulted with `dbaas:read` /
//! `dbaas:write` and the caller identity (from the host-set
//! `x-dbaas-subject` header) before every guarded handler runs.
//!
//! Endpoints:
//! - GET  /engines, /skus, /host - catalog and environment info
//! - GET/POST /instances, GET /instances/{id} - create and inspect
//! - POST /instances/{id}/start|stop|restart, DELETE /instances/{id}
//! - GET  /instances/{id}/logs|stats|inspect|metrics|health
//! - POST /instances/{id}/snapshot, GET /instances/{id}/snapshots
//! - POST /instances/{id}/restore/{sid}, DELETE /instances/{id}/snapshots/{sid}
//! - GET  /instances/{id}/export - streamed logical dump
//! - POST /instances/{id}/credentials/rotate

mod handlers;
mod routes;
mod state;
mod types;

use tokio::net::TcpListener;

use crate::PodbaseResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::*;
pub use routes::*;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Binds the listen address and serves the API until the process exits.
pub async fn serve(state: ServerState, addr: std::net::SocketAddr) -> PodbaseResult<()> {
    let router = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("REST API listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
