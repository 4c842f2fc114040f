//! HTTP request handlers for the REST API.
//!
//! Handlers check the host's permission predicate, delegate to the control
//! plane, and map the error taxonomy onto HTTP status codes: validation to
//! 400, collisions to 409, missing resources to 404, refused permissions to
//! 403, everything else to 500.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;

use crate::engine;
use crate::host;
use crate::lifecycle::CreateInstanceSpec;
use crate::models::{Instance, InstanceStatus};
use crate::sku;
use crate::store;
use crate::{PodbaseError, PodbaseResult};

use super::{
    state::{Permission, ServerState, Subject},
    types::{
        CreateSpec, EnginesResponse, ErrorResponse, InstanceResponse, ListQuery, LogEntry,
        LogsQuery, LogsResponse, RotateResponse, SkusResponse, SnapshotRequest, SnapshotsResponse,
    },
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A handler failure carrying its HTTP mapping.
pub struct ApiError(StatusCode, String);

impl From<PodbaseError> for ApiError {
    fn from(error: PodbaseError) -> Self {
        let status = if error.is_validation() {
            StatusCode::BAD_REQUEST
        } else if error.is_collision() {
            StatusCode::CONFLICT
        } else if error.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `GET /engines`.
pub async fn list_engines_handler() -> Json<EnginesResponse> {
    Json(EnginesResponse {
        engines: engine::list_engines(),
    })
}

/// Handler for `GET /skus`.
pub async fn list_skus_handler() -> Json<SkusResponse> {
    Json(SkusResponse {
        skus: sku::list_skus(),
    })
}

/// Handler for `GET /host`.
pub async fn host_handler(State(state): State<ServerState>) -> Json<host::HostCapacity> {
    Json(host::host_capacity(state.manager.orchestrator()).await)
}

/// Handler for `GET /instances`.
pub async fn list_instances_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<InstanceResponse>>> {
    check(&state, &subject, Permission::Read)?;

    let status = match &query.status {
        Some(raw) => Some(raw.parse::<InstanceStatus>().map_err(|_| {
            ApiError(
                StatusCode::BAD_REQUEST,
                format!("unknown status filter '{raw}'"),
            )
        })?),
        None => None,
    };

    let instances =
        store::list_instances(state.manager.pool(), query.engine.as_deref(), status).await?;
    let responses = instances
        .into_iter()
        .map(|instance| to_response(instance, None, None))
        .collect::<PodbaseResult<Vec<_>>>()?;
    Ok(Json(responses))
}

/// Handler for `POST /instances`.
pub async fn create_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Json(spec): Json<CreateSpec>,
) -> ApiResult<(StatusCode, Json<InstanceResponse>)> {
    check(&state, &subject, Permission::Write)?;

    let instance = state
        .manager
        .create(CreateInstanceSpec {
            engine: spec.engine,
            name: spec.name,
            database_name: spec.database_name,
            sku: spec.sku,
            memory_limit_mb: spec.memory_limit_mb,
            cpu_limit: spec.cpu_limit,
            storage_limit_gb: spec.storage_limit_gb,
            external_access: spec.external_access,
            tls_enabled: spec.tls_enabled,
            tls_cert: spec.tls_cert.map(String::into_bytes),
            tls_key: spec.tls_key.map(String::into_bytes),
            vnet_name: spec.vnet_name,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(to_response(instance, None, None)?)))
}

/// Handler for `GET /instances/{id}`.
pub async fn get_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstanceResponse>> {
    check(&state, &subject, Permission::Read)?;

    let instance = must_get(&state, id).await?;
    let health = state.health.current(id).await.ok();
    let metrics = store::latest_metrics_sample(state.manager.pool(), id).await?;
    Ok(Json(to_response(instance, health, metrics)?))
}

/// Handler for `POST /instances/{id}/start`.
pub async fn start_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstanceResponse>> {
    check(&state, &subject, Permission::Write)?;
    let instance = state.manager.start(id).await?;
    Ok(Json(to_response(instance, None, None)?))
}

/// Handler for `POST /instances/{id}/stop`.
pub async fn stop_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstanceResponse>> {
    check(&state, &subject, Permission::Write)?;
    let instance = state.manager.stop(id).await?;
    Ok(Json(to_response(instance, None, None)?))
}

/// Handler for `POST /instances/{id}/restart`.
pub async fn restart_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstanceResponse>> {
    check(&state, &subject, Permission::Write)?;
    let instance = state.manager.restart(id).await?;
    Ok(Json(to_response(instance, None, None)?))
}

/// Handler for `DELETE /instances/{id}`. Idempotent.
pub async fn destroy_instance_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    check(&state, &subject, Permission::Write)?;
    state.manager.destroy(id).await?;
    Ok(Json(serde_json::json!({})))
}

/// Handler for `GET /instances/{id}/logs`.
pub async fn logs_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    check(&state, &subject, Permission::Read)?;

    let instance = must_get(&state, id).await?;
    let raw = state
        .manager
        .orchestrator()
        .logs(
            &instance.container_ref(),
            query.tail.or(Some(100)),
            query.since.as_deref(),
            query.until.as_deref(),
        )
        .await?;

    let filter = query.level.map(|level| level.to_lowercase());
    let entries = raw
        .lines()
        .filter(|line| !line.is_empty())
        .filter(|line| {
            filter
                .as_ref()
                .map(|needle| line.to_lowercase().contains(needle))
                .unwrap_or(true)
        })
        .map(parse_log_line)
        .collect();
    Ok(Json(LogsResponse { entries }))
}

/// Handler for `GET /instances/{id}/stats`.
pub async fn stats_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<crate::orchestrator::ContainerStats>> {
    check(&state, &subject, Permission::Read)?;
    let instance = must_get(&state, id).await?;
    let stats = state
        .manager
        .orchestrator()
        .stats(&instance.container_ref())
        .await?;
    Ok(Json(stats))
}

/// Handler for `GET /instances/{id}/inspect`.
pub async fn inspect_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    check(&state, &subject, Permission::Read)?;
    let instance = must_get(&state, id).await?;
    let inspect = state
        .manager
        .orchestrator()
        .inspect(&instance.container_ref())
        .await?;
    Ok(Json(inspect.raw))
}

/// Handler for `GET /instances/{id}/metrics`.
pub async fn metrics_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<crate::metrics::MetricsView>> {
    check(&state, &subject, Permission::Read)?;
    must_get(&state, id).await?;
    Ok(Json(state.metrics.view(id).await?))
}

/// Handler for `GET /instances/{id}/health`.
pub async fn health_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<crate::health::HealthCurrent>> {
    check(&state, &subject, Permission::Read)?;
    must_get(&state, id).await?;
    Ok(Json(state.health.current(id).await?))
}

/// Handler for `POST /instances/{id}/snapshot`.
pub async fn create_snapshot_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
    body: Option<Json<SnapshotRequest>>,
) -> ApiResult<Json<crate::models::Snapshot>> {
    check(&state, &subject, Permission::Write)?;
    let notes = body.and_then(|Json(request)| request.notes);
    let snapshot = state.snapshots.create(id, notes.as_deref()).await?;
    Ok(Json(snapshot))
}

/// Handler for `GET /instances/{id}/snapshots`.
pub async fn list_snapshots_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<SnapshotsResponse>> {
    check(&state, &subject, Permission::Read)?;
    must_get(&state, id).await?;
    Ok(Json(SnapshotsResponse {
        snapshots: state.snapshots.list(id).await?,
    }))
}

/// Handler for `POST /instances/{id}/restore/{sid}`.
pub async fn restore_snapshot_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path((id, sid)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    check(&state, &subject, Permission::Write)?;
    state.snapshots.restore(id, sid).await?;
    Ok(Json(serde_json::json!({})))
}

/// Handler for `DELETE /instances/{id}/snapshots/{sid}`.
pub async fn delete_snapshot_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path((id, sid)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    check(&state, &subject, Permission::Write)?;
    state.snapshots.delete(id, sid).await?;
    Ok(Json(serde_json::json!({})))
}

/// Handler for `GET /instances/{id}/export`: streams a fresh logical dump
/// as a download.
pub async fn export_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    check(&state, &subject, Permission::Read)?;
    let instance = must_get(&state, id).await?;
    let path = state.snapshots.export(id).await?;

    let file = tokio::fs::File::open(&path).await.map_err(PodbaseError::Io)?;
    let stream = ReaderStream::new(file);
    let filename = format!(
        "{}-export{}",
        instance.name,
        path.extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    );

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(response)
}

/// Handler for `POST /instances/{id}/credentials/rotate`.
pub async fn rotate_credentials_handler(
    State(state): State<ServerState>,
    subject: Subject,
    Path(id): Path<i64>,
) -> ApiResult<Json<RotateResponse>> {
    check(&state, &subject, Permission::Write)?;
    let (username, password) = state.manager.rotate_credentials(id).await?;
    Ok(Json(RotateResponse { username, password }))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn check(state: &ServerState, subject: &Subject, permission: Permission) -> Result<(), ApiError> {
    if (state.permission)(permission, &subject.0) {
        Ok(())
    } else {
        Err(ApiError(
            StatusCode::FORBIDDEN,
            format!("permission '{}' denied", permission.as_str()),
        ))
    }
}

async fn must_get(state: &ServerState, id: i64) -> Result<Instance, ApiError> {
    Ok(store::get_instance(state.manager.pool(), id)
        .await?
        .ok_or(PodbaseError::InstanceNotFound(id))?)
}

fn to_response(
    instance: Instance,
    health: Option<crate::health::HealthCurrent>,
    metrics: Option<crate::models::MetricsSample>,
) -> PodbaseResult<InstanceResponse> {
    let adapter = engine::get_adapter(&instance.engine)?;
    let connection_string = {
        let ctx = instance.engine_ctx();
        (adapter.connection_string)(&instance.host, instance.port as u16, &ctx)
    };
    Ok(InstanceResponse {
        connection_string,
        instance,
        health,
        metrics,
    })
}

/// Splits a `--timestamps` log line into its RFC3339 prefix and message.
fn parse_log_line(line: &str) -> LogEntry {
    match line.split_once(' ') {
        Some((stamp, rest)) if stamp.len() >= 20 && stamp.contains('T') => LogEntry {
            timestamp: Some(stamp.to_string()),
            message: rest.to_string(),
        },
        _ => LogEntry {
            timestamp: None,
            message: line.to_string(),
        },
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_line_with_timestamp() {
        let entry = parse_log_line("2026-08-01T10:15:00.123456789Z ready to accept connections");
        assert_eq!(
            entry.timestamp.as_deref(),
            Some("2026-08-01T10:15:00.123456789Z")
        );
        assert_eq!(entry.message, "ready to accept connections");
    }

    #[test]
    fn test_parse_log_line_without_timestamp() {
        let entry = parse_log_line("plain message");
        assert!(entry.timestamp.is_none());
        assert_eq!(entry.message, "plain message");
    }

    #[test]
    fn test_error_mapping() {
        let ApiError(status, _) = PodbaseError::EngineUnknown("x".to_string()).into();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let ApiError(status, _) = PodbaseError::NameInUse("x".to_string()).into();
        assert_eq!(status, StatusCode::CONFLICT);

        let ApiError(status, _) = PodbaseError::InstanceNotFound(1).into();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let ApiError(status, _) = PodbaseError::RuntimeUnavailable("x".to_string()).into();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
