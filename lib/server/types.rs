//! Request and response types for the REST API.

use serde::{Deserialize, Serialize};

use crate::engine::EngineInfo;
use crate::health::HealthCurrent;
use crate::models::{Instance, MetricsSample, Snapshot};
use crate::sku::Sku;

//--------------------------------------------------------------------------------------------------
// Types: Requests
//--------------------------------------------------------------------------------------------------

/// Body of `POST /instances`.
#[derive(Debug, Deserialize)]
pub struct CreateSpec {
    /// Engine tag, e.g. "postgresql".
    pub engine: String,
    /// Instance name; generated when absent.
    pub name: Option<String>,
    /// Initial logical database name.
    #[serde(default = "default_database_name")]
    pub database_name: String,
    /// SKU id, or "custom".
    #[serde(default = "default_sku")]
    pub sku: String,
    /// Memory override for custom SKUs, MiB.
    pub memory_limit_mb: Option<i64>,
    /// CPU override for custom SKUs, vCPUs.
    pub cpu_limit: Option<f64>,
    /// Storage override for custom SKUs, GiB.
    pub storage_limit_gb: Option<i64>,
    /// Bind the wildcard address instead of loopback.
    #[serde(default)]
    pub external_access: bool,
    /// Enable TLS; requires both PEM fields.
    #[serde(default)]
    pub tls_enabled: bool,
    /// Server certificate, PEM.
    pub tls_cert: Option<String>,
    /// Server private key, PEM.
    pub tls_key: Option<String>,
    /// Attach to this virtual network instead of port mapping.
    pub vnet_name: Option<String>,
}

/// Query string of `GET /instances`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Filter by engine tag.
    pub engine: Option<String>,
    /// Filter by lifecycle status.
    pub status: Option<String>,
}

/// Query string of `GET /instances/{id}/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Number of trailing lines.
    pub tail: Option<u32>,
    /// Lower time bound, RFC3339 or relative.
    pub since: Option<String>,
    /// Upper time bound, RFC3339 or relative.
    pub until: Option<String>,
    /// Case-insensitive substring filter, e.g. "error".
    pub level: Option<String>,
}

/// Body of `POST /instances/{id}/snapshot`.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    /// Optional operator notes stored with the snapshot.
    pub notes: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Types: Responses
//--------------------------------------------------------------------------------------------------

/// An instance plus derived fields the UI wants in one round trip.
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    /// The instance row.
    #[serde(flatten)]
    pub instance: Instance,
    /// Canonical client URI.
    pub connection_string: String,
    /// Current health, present on `GET /instances/{id}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthCurrent>,
    /// Most recent metrics sample, present on `GET /instances/{id}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSample>,
}

/// Response of `GET /engines`.
#[derive(Debug, Serialize)]
pub struct EnginesResponse {
    /// All registered engines.
    pub engines: Vec<EngineInfo>,
}

/// Response of `GET /skus`.
#[derive(Debug, Serialize)]
pub struct SkusResponse {
    /// The full catalog.
    pub skus: Vec<&'static Sku>,
}

/// One parsed container log line.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    /// Timestamp prefix the runtime attached, when present.
    pub timestamp: Option<String>,
    /// The log line itself.
    pub message: String,
}

/// Response of `GET /instances/{id}/logs`.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    /// Parsed entries, oldest first.
    pub entries: Vec<LogEntry>,
}

/// Response of `GET /instances/{id}/snapshots`.
#[derive(Debug, Serialize)]
pub struct SnapshotsResponse {
    /// Snapshot rows, newest first.
    pub snapshots: Vec<Snapshot>,
}

/// Response of `POST /instances/{id}/credentials/rotate`.
#[derive(Debug, Serialize)]
pub struct RotateResponse {
    /// The unchanged username.
    pub username: String,
    /// The freshly applied password.
    pub password: String,
}

/// Error envelope returned on every failure.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_database_name() -> String {
    "app".to_string()
}

fn default_sku() -> String {
    "d2".to_string()
}
