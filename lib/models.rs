//! Database models for podbase.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types: Instance
//--------------------------------------------------------------------------------------------------

/// Lifecycle status of a managed database instance.
///
/// Transitions are owned exclusively by the lifecycle manager; see
/// [`InstanceStatus::can_transition_to`] for the legal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Row created, provisioning not yet started.
    Pending,
    /// Volume, credentials, config, network, and container are being set up.
    Creating,
    /// Container started, waiting for the engine to accept connections.
    Starting,
    /// The engine is up and listening.
    Running,
    /// Graceful stop in progress.
    Stopping,
    /// Container exists but is not running.
    Stopped,
    /// Stop-then-start in progress.
    Restarting,
    /// The last lifecycle attempt failed; see `error_message`.
    Failed,
    /// Teardown in progress.
    Destroying,
    /// Terminal state; all resources released.
    Destroyed,
}

/// A managed database instance running inside a container.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Instance {
    /// The unique identifier for the instance.
    pub id: i64,

    /// Human-readable name, unique among live instances.
    pub name: String,

    /// Engine tag, one of the registered adapters.
    pub engine: String,

    /// The initial logical database name.
    pub database_name: String,

    /// Generated admin username.
    pub username: String,

    /// Generated admin password, stored in cleartext for retrieval.
    pub password: String,

    /// Name the container was created under.
    pub container_name: String,

    /// Container id assigned by the runtime after create, if any.
    pub container_id: Option<String>,

    /// SKU tier id, or "custom".
    pub sku: String,

    /// Memory cap in MiB.
    pub memory_limit_mb: i64,

    /// CPU cap in vCPUs.
    pub cpu_limit: f64,

    /// Storage quota in GiB.
    pub storage_limit_gb: i64,

    /// Host address the port is bound on.
    pub host: String,

    /// Allocated host port, 0 for embedded engines.
    pub port: i64,

    /// Absolute path of the per-instance volume directory.
    pub volume_path: Option<String>,

    /// Address held on the virtual network, if attached.
    pub vnet_ip: Option<String>,

    /// Name of the virtual network the container is attached to.
    pub vnet_name: Option<String>,

    /// Whether the port is bound on the wildcard address.
    pub external_access: bool,

    /// Whether the engine was configured with TLS.
    pub tls_enabled: bool,

    /// Staged certificate path when TLS is enabled.
    pub tls_cert_path: Option<String>,

    /// Staged private key path when TLS is enabled.
    pub tls_key_path: Option<String>,

    /// Current lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: InstanceStatus,

    /// Human-readable error from the last failed transition, cleared on the
    /// next successful one.
    pub error_message: Option<String>,

    /// When the instance row was created.
    pub created_at: DateTime<Utc>,

    /// When the instance row was last modified.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Types: Snapshot
//--------------------------------------------------------------------------------------------------

/// A point-in-time engine-native dump of an instance.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Snapshot {
    /// The unique identifier for the snapshot.
    pub id: i64,

    /// The instance this snapshot belongs to.
    pub instance_id: i64,

    /// Absolute path of the dump file on the host.
    pub path: String,

    /// Size of the dump file in bytes.
    pub size_bytes: i64,

    /// Optional operator notes.
    pub notes: Option<String>,

    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Types: Samples
//--------------------------------------------------------------------------------------------------

/// Result classification of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The probe exited zero.
    Healthy,
    /// The probe failed but the container is running.
    Degraded,
    /// The container is not running.
    Unhealthy,
    /// The probe timed out or the runtime errored.
    Unknown,
}

/// One appended health probe result.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HealthSample {
    /// The unique identifier for the sample.
    pub id: i64,

    /// The instance that was probed.
    pub instance_id: i64,

    /// Probe classification.
    #[sqlx(try_from = "String")]
    pub status: HealthState,

    /// Probe round-trip time in milliseconds.
    pub response_time_ms: i64,

    /// Adapter-interpreted detail fields as a JSON object, if any.
    pub details: Option<String>,

    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// One appended metrics sample fusing container stats with engine metrics.
///
/// Engine-specific fields are `None` when the engine did not report them;
/// they are never coerced to zero.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MetricsSample {
    /// The unique identifier for the sample.
    pub id: i64,

    /// The instance that was sampled.
    pub instance_id: i64,

    /// Container CPU usage as a percentage.
    pub cpu_percent: f64,

    /// Container memory usage in MiB.
    pub memory_used_mb: f64,

    /// Container memory limit in MiB.
    pub memory_limit_mb: f64,

    /// Container memory usage as a percentage of the limit.
    pub memory_percent: f64,

    /// Open client connections reported by the engine.
    pub connections: Option<i64>,

    /// Currently executing queries reported by the engine.
    pub active_queries: Option<i64>,

    /// Query throughput reported by the engine.
    pub queries_per_sec: Option<f64>,

    /// Engine cache hit ratio, 0-100.
    pub cache_hit_ratio: Option<f64>,

    /// Engine uptime in seconds.
    pub uptime_seconds: Option<i64>,

    /// Engine-reported storage usage in MiB.
    pub storage_used_mb: Option<f64>,

    /// Adapter-specific extra fields as a JSON object, if any.
    pub extra: Option<String>,

    /// When the sample was collected.
    pub collected_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstanceStatus {
    /// All statuses considered live: the name and (host, port) of a live
    /// instance are reserved.
    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceStatus::Destroyed)
    }

    /// Whether a lifecycle edge from `self` to `to` exists in the state
    /// graph. Destroy is reachable from any live state.
    pub fn can_transition_to(&self, to: InstanceStatus) -> bool {
        use InstanceStatus::*;

        if matches!(to, Destroying) {
            return self.is_live() && *self != Destroying;
        }

        matches!(
            (*self, to),
            (Pending, Creating)
                | (Creating, Starting)
                | (Creating, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Restarting)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Starting)
                | (Failed, Starting)
                | (Restarting, Starting)
                | (Restarting, Failed)
                | (Destroying, Destroyed)
        )
    }

    /// The canonical lowercase name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Creating => "creating",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Destroying => "destroying",
            InstanceStatus::Destroyed => "destroyed",
        }
    }
}

impl HealthState {
    /// The canonical lowercase name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Unknown => "unknown",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = PodbaseError;

    fn from_str(s: &str) -> PodbaseResult<Self> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "creating" => Ok(InstanceStatus::Creating),
            "starting" => Ok(InstanceStatus::Starting),
            "running" => Ok(InstanceStatus::Running),
            "stopping" => Ok(InstanceStatus::Stopping),
            "stopped" => Ok(InstanceStatus::Stopped),
            "restarting" => Ok(InstanceStatus::Restarting),
            "failed" => Ok(InstanceStatus::Failed),
            "destroying" => Ok(InstanceStatus::Destroying),
            "destroyed" => Ok(InstanceStatus::Destroyed),
            other => Err(PodbaseError::Invariant(format!(
                "unknown instance status '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for InstanceStatus {
    type Error = PodbaseError;

    fn try_from(value: String) -> PodbaseResult<Self> {
        value.parse()
    }
}

impl Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HealthState {
    type Err = PodbaseError;

    fn from_str(s: &str) -> PodbaseResult<Self> {
        match s {
            "healthy" => Ok(HealthState::Healthy),
            "degraded" => Ok(HealthState::Degraded),
            "unhealthy" => Ok(HealthState::Unhealthy),
            "unknown" => Ok(HealthState::Unknown),
            other => Err(PodbaseError::Invariant(format!(
                "unknown health state '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for HealthState {
    type Error = PodbaseError;

    fn try_from(value: String) -> PodbaseResult<Self> {
        value.parse()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Creating,
            InstanceStatus::Starting,
            InstanceStatus::Running,
            InstanceStatus::Stopping,
            InstanceStatus::Stopped,
            InstanceStatus::Restarting,
            InstanceStatus::Failed,
            InstanceStatus::Destroying,
            InstanceStatus::Destroyed,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_destroy_reachable_from_any_live_state() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Creating,
            InstanceStatus::Starting,
            InstanceStatus::Running,
            InstanceStatus::Stopping,
            InstanceStatus::Stopped,
            InstanceStatus::Restarting,
            InstanceStatus::Failed,
        ] {
            assert!(status.can_transition_to(InstanceStatus::Destroying));
        }
        assert!(!InstanceStatus::Destroyed.can_transition_to(InstanceStatus::Destroying));
    }

    #[test]
    fn test_terminal_state_has_no_outgoing_edges() {
        for to in [
            InstanceStatus::Pending,
            InstanceStatus::Creating,
            InstanceStatus::Starting,
            InstanceStatus::Running,
            InstanceStatus::Stopping,
            InstanceStatus::Stopped,
            InstanceStatus::Restarting,
            InstanceStatus::Failed,
            InstanceStatus::Destroying,
        ] {
            assert!(!InstanceStatus::Destroyed.can_transition_to(to));
        }
    }

    #[test]
    fn test_failed_instances_can_be_retried() {
        assert!(InstanceStatus::Failed.can_transition_to(InstanceStatus::Starting));
        assert!(!InstanceStatus::Failed.can_transition_to(InstanceStatus::Running));
    }
}
