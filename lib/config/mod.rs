//! Configuration types and validation.
//!
//! The daemon reads a single YAML file at startup; every knob has a default
//! so an empty file (or no file at all) yields a working configuration. The
//! data root can additionally be overridden with `PODBASE_DATA_ROOT`.

mod defaults;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;
use typed_builder::TypedBuilder;

use crate::utils::{
    data_root_path, CONTAINERS_SUBDIR, LOGS_SUBDIR, SNAPSHOTS_SUBDIR, STORE_DB_FILENAME,
    TLS_SUBDIR, VOLUMES_SUBDIR,
};
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The podbase daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PodbaseConfig {
    /// Directory all state lives under (store, volumes, snapshots, tls, logs).
    #[serde(default = "data_root_path")]
    #[builder(default = data_root_path())]
    pub(crate) data_root: PathBuf,

    /// Container runtime binary name or path.
    #[serde(default = "default_runtime_bin")]
    #[builder(default = default_runtime_bin())]
    pub(crate) runtime_bin: String,

    /// Address ports are bound on for loopback-only instances.
    #[serde(default = "default_host_ip")]
    #[builder(default = self::default_host_ip())]
    pub(crate) default_host_ip: String,

    /// Name of the host-local virtual network instances may attach to.
    #[serde(default = "default_vnet_name")]
    #[builder(default = default_vnet_name())]
    pub(crate) vnet_default_name: String,

    /// First three octets of the vnet /24, e.g. "10.89.0".
    #[serde(default = "default_vnet_subnet")]
    #[builder(default = default_vnet_subnet())]
    pub(crate) vnet_subnet_base: String,

    /// Inclusive host port range the allocator draws from.
    #[serde(default = "default_port_range")]
    #[builder(default = default_port_range())]
    pub(crate) port_range: (u16, u16),

    /// Seconds between health probes per running instance.
    #[serde(default = "default_health_interval")]
    #[builder(default = DEFAULT_HEALTH_INTERVAL_S)]
    pub(crate) health_interval_s: u64,

    /// Seconds between metrics samples per running instance.
    #[serde(default = "default_metrics_interval")]
    #[builder(default = DEFAULT_METRICS_INTERVAL_S)]
    pub(crate) metrics_interval_s: u64,

    /// Days of metrics history kept by the hourly sweep.
    #[serde(default = "default_metrics_retention")]
    #[builder(default = DEFAULT_METRICS_RETENTION_DAYS)]
    pub(crate) metrics_retention_days: i64,

    /// Seconds allowed for a first-time image pull.
    #[serde(default = "default_pull_timeout")]
    #[builder(default = DEFAULT_IMAGE_PULL_TIMEOUT_S)]
    pub(crate) image_pull_timeout_s: u64,

    /// Seconds allowed for a snapshot dump or restore.
    #[serde(default = "default_snapshot_timeout")]
    #[builder(default = DEFAULT_SNAPSHOT_TIMEOUT_S)]
    pub(crate) snapshot_timeout_s: u64,

    /// Whether repeated health failures trigger an automatic restart.
    #[serde(default)]
    #[builder(default = false)]
    pub(crate) auto_restart: bool,

    /// Consecutive opposite probe results before a status-change event.
    #[serde(default = "default_failure_threshold")]
    #[builder(default = DEFAULT_HEALTH_FAILURE_THRESHOLD)]
    pub(crate) health_failure_threshold: u32,

    /// Address the REST server listens on.
    #[serde(default = "default_listen_addr")]
    #[builder(default = default_listen_addr())]
    pub(crate) listen_addr: SocketAddr,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodbaseConfig {
    /// Loads the configuration from a YAML file, falling back to defaults
    /// when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> PodbaseResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot work.
    pub fn validate(&self) -> PodbaseResult<()> {
        let (start, end) = self.port_range;
        if start == 0 || start >= end {
            return Err(PodbaseError::ConfigInvalid {
                field: "port_range".to_string(),
                reason: format!("invalid range {start}-{end}"),
            });
        }
        if self.health_interval_s == 0 || self.metrics_interval_s == 0 {
            return Err(PodbaseError::ConfigInvalid {
                field: "health_interval_s/metrics_interval_s".to_string(),
                reason: "intervals must be nonzero".to_string(),
            });
        }
        if self.vnet_subnet_base.split('.').count() != 3 {
            return Err(PodbaseError::ConfigInvalid {
                field: "vnet_subnet_base".to_string(),
                reason: "expected three dotted octets, e.g. 10.89.0".to_string(),
            });
        }
        Ok(())
    }

    /// Path of the relational store.
    pub fn store_path(&self) -> PathBuf {
        self.data_root.join(STORE_DB_FILENAME)
    }

    /// Root directory of per-instance data volumes.
    pub fn volumes_dir(&self) -> PathBuf {
        self.data_root.join(VOLUMES_SUBDIR)
    }

    /// Root directory of per-instance snapshot dumps.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_root.join(SNAPSHOTS_SUBDIR)
    }

    /// Root directory of per-instance TLS material.
    pub fn tls_dir(&self) -> PathBuf {
        self.data_root.join(TLS_SUBDIR)
    }

    /// Root directory of per-instance log captures.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join(LOGS_SUBDIR)
    }

    /// Directory for per-instance runtime metadata.
    pub fn containers_dir(&self) -> PathBuf {
        self.data_root.join(CONTAINERS_SUBDIR)
    }

    /// Creates the on-disk layout under the data root.
    pub async fn ensure_layout(&self) -> PodbaseResult<()> {
        for dir in [
            self.data_root.clone(),
            self.volumes_dir(),
            self.snapshots_dir(),
            self.tls_dir(),
            self.logs_dir(),
            self.containers_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for PodbaseConfig {
    fn default() -> Self {
        PodbaseConfig::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: serde defaults
//--------------------------------------------------------------------------------------------------

fn default_runtime_bin() -> String {
    DEFAULT_RUNTIME_BIN.to_string()
}

fn default_host_ip() -> String {
    DEFAULT_HOST_IP.to_string()
}

fn default_vnet_name() -> String {
    DEFAULT_VNET_NAME.to_string()
}

fn default_vnet_subnet() -> String {
    DEFAULT_VNET_SUBNET_BASE.to_string()
}

fn default_port_range() -> (u16, u16) {
    (DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
}

fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_INTERVAL_S
}

fn default_metrics_interval() -> u64 {
    DEFAULT_METRICS_INTERVAL_S
}

fn default_metrics_retention() -> i64 {
    DEFAULT_METRICS_RETENTION_DAYS
}

fn default_pull_timeout() -> u64 {
    DEFAULT_IMAGE_PULL_TIMEOUT_S
}

fn default_snapshot_timeout() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_S
}

fn default_failure_threshold() -> u32 {
    DEFAULT_HEALTH_FAILURE_THRESHOLD
}

fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR.parse().unwrap()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PodbaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.get_health_interval_s(), &DEFAULT_HEALTH_INTERVAL_S);
        assert!(!config.get_auto_restart());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: PodbaseConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.get_runtime_bin(), DEFAULT_RUNTIME_BIN);
        assert_eq!(config.get_default_host_ip(), DEFAULT_HOST_IP);
    }

    #[test]
    fn test_invalid_port_range_rejected() {
        let config: PodbaseConfig =
            serde_yaml::from_str("port_range: [9000, 9000]").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layout_paths_are_under_data_root() {
        let config = PodbaseConfig::builder()
            .data_root(PathBuf::from("/srv/podbase"))
            .build();
        assert_eq!(config.store_path(), PathBuf::from("/srv/podbase/instances.db"));
        assert_eq!(config.volumes_dir(), PathBuf::from("/srv/podbase/volumes"));
        assert_eq!(config.tls_dir(), PathBuf::from("/srv/podbase/tls"));
    }
}
