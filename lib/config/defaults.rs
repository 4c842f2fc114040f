use std::{path::PathBuf, sync::LazyLock};

use crate::utils::PODBASE_SUBDIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The path where all podbase global data is stored.
pub static DEFAULT_DATA_ROOT: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap().join(PODBASE_SUBDIR));

/// The container runtime binary driven by the orchestrator.
pub const DEFAULT_RUNTIME_BIN: &str = "podman";

/// The address ports are bound on when external access is disabled.
pub const DEFAULT_HOST_IP: &str = "127.0.0.1";

/// The address ports are bound on when external access is enabled.
pub const WILDCARD_HOST_IP: &str = "0.0.0.0";

/// The default name of the host-local virtual network.
pub const DEFAULT_VNET_NAME: &str = "podbase0";

/// The default /24 the vnet allocator hands addresses from.
pub const DEFAULT_VNET_SUBNET_BASE: &str = "10.89.0";

/// First host port the allocator probes.
pub const DEFAULT_PORT_RANGE_START: u16 = 10000;

/// Last host port the allocator probes.
pub const DEFAULT_PORT_RANGE_END: u16 = 65000;

/// Seconds between health probes of a running instance.
pub const DEFAULT_HEALTH_INTERVAL_S: u64 = 30;

/// Seconds between metrics samples of a running instance.
pub const DEFAULT_METRICS_INTERVAL_S: u64 = 10;

/// Days of metrics history kept by the retention sweep.
pub const DEFAULT_METRICS_RETENTION_DAYS: i64 = 30;

/// Health samples kept per instance by the retention sweep.
pub const DEFAULT_HEALTH_RETENTION_SAMPLES: i64 = 1000;

/// Seconds allowed for a first-time image pull.
pub const DEFAULT_IMAGE_PULL_TIMEOUT_S: u64 = 360;

/// Seconds the readiness gate waits for most engines.
pub const DEFAULT_READINESS_TIMEOUT_S: u64 = 120;

/// Seconds the readiness gate waits for search and analytical engines.
pub const DEFAULT_READINESS_TIMEOUT_SLOW_S: u64 = 300;

/// Seconds of graceful stop before the container is killed.
pub const DEFAULT_STOP_TIMEOUT_S: u64 = 30;

/// Seconds allowed for a runtime create call.
pub const DEFAULT_CREATE_TIMEOUT_S: u64 = 60;

/// Seconds allowed for an in-container exec.
pub const DEFAULT_EXEC_TIMEOUT_S: u64 = 10;

/// Seconds allowed for a snapshot dump or restore.
pub const DEFAULT_SNAPSHOT_TIMEOUT_S: u64 = 1800;

/// Attempts made at pulling an image or finding a free port.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Consecutive opposite health results before a status-change event fires.
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Concurrent probe executions allowed per monitor tick.
pub const DEFAULT_PROBE_POOL_SIZE: usize = 16;

/// Metrics samples returned as "history" by the API.
pub const DEFAULT_METRICS_HISTORY_LIMIT: i64 = 720;

/// The address the REST server listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7450";
