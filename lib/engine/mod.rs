//! The engine adapter layer.
//!
//! Everything engine-specific lives behind a uniform capability bundle: a
//! plain record of data and function pointers, one per engine, registered by
//! tag at startup and immutable afterwards. Heterogeneous engines share well
//! over 90% of the control plane; the differences are data (image, env,
//! config template, CLI snippets), so a record beats an inheritance tree and
//! keeps the cost of a new engine to a single file.
//!
//! Command descriptors returned here are argv vectors executed inside the
//! instance's container by the orchestrator. A descriptor must never assume
//! host paths.

mod arangodb;
mod cassandra;
mod clickhouse;
mod cockroachdb;
mod couchdb;
mod duckdb;
mod elasticsearch;
mod h2;
mod influxdb;
mod janusgraph;
mod keydb;
mod mariadb;
mod meilisearch;
mod mongodb;
mod mssql;
mod mysql;
mod neo4j;
mod oracle;
mod postgresql;
mod questdb;
mod redis;
mod scylladb;
mod timescaledb;
mod typesense;
mod valkey;

use std::{
    collections::BTreeMap,
    sync::LazyLock,
};

use serde::Serialize;

use crate::credentials::Charset;
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Container path the staged TLS certificate is mounted at.
pub const TLS_CERT_MOUNT: &str = "/tls/server.crt";

/// Container path the staged TLS private key is mounted at.
pub const TLS_KEY_MOUNT: &str = "/tls/server.key";

/// Container path of the combined PEM some engines want.
pub const TLS_COMBINED_MOUNT: &str = "/tls/combined.pem";

/// All registered adapters, keyed by engine tag. Read-only after startup.
pub static REGISTRY: LazyLock<BTreeMap<&'static str, &'static EngineAdapter>> =
    LazyLock::new(|| {
        let adapters: [&'static EngineAdapter; 25] = [
            &arangodb::ADAPTER,
            &cassandra::ADAPTER,
            &clickhouse::ADAPTER,
            &cockroachdb::ADAPTER,
            &couchdb::ADAPTER,
            &duckdb::ADAPTER,
            &elasticsearch::ADAPTER,
            &h2::ADAPTER,
            &influxdb::ADAPTER,
            &janusgraph::ADAPTER,
            &keydb::ADAPTER,
            &mariadb::ADAPTER,
            &meilisearch::ADAPTER,
            &mongodb::ADAPTER,
            &mssql::ADAPTER,
            &mysql::ADAPTER,
            &neo4j::ADAPTER,
            &oracle::ADAPTER,
            &postgresql::ADAPTER,
            &questdb::ADAPTER,
            &redis::ADAPTER,
            &scylladb::ADAPTER,
            &timescaledb::ADAPTER,
            &typesense::ADAPTER,
            &valkey::ADAPTER,
        ];
        adapters.into_iter().map(|a| (a.engine, a)).collect()
    });

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Database engine categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCategory {
    /// SQL engines with ACID tables.
    Relational,
    /// Document stores.
    Document,
    /// Key-value stores.
    KeyValue,
    /// Wide-column stores.
    WideColumn,
    /// Time-series engines.
    TimeSeries,
    /// Search engines.
    Search,
    /// Graph databases.
    Graph,
    /// OLAP / analytical engines.
    Analytical,
    /// Embedded, in-process engines.
    Embedded,
}

/// Feature flags an adapter declares.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Supports {
    /// Whether the engine has named logical databases.
    pub logical_databases: bool,
    /// Whether the engine has user management.
    pub users: bool,
    /// Whether snapshot/restore commands exist.
    pub backup: bool,
    /// Whether in-engine metrics queries exist.
    pub metrics: bool,
    /// Whether the engine runs embedded, without a container.
    pub embedded: bool,
}

/// The per-call context command descriptors are derived from.
#[derive(Debug, Clone, Copy)]
pub struct InstanceCtx<'a> {
    /// The initial logical database name.
    pub database: &'a str,
    /// Admin username.
    pub username: &'a str,
    /// Admin password.
    pub password: &'a str,
    /// Whether TLS material is mounted under /tls.
    pub tls: bool,
}

/// Adapter interpretation of a health probe's output.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Whether the engine answered as healthy.
    pub healthy: bool,
    /// Human-readable summary.
    pub message: String,
    /// Optional structured detail fields.
    pub details: Option<serde_json::Value>,
}

/// In-engine metric fields an adapter can fill. Missing fields stay `None`.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Open client connections.
    pub connections: Option<i64>,
    /// Currently executing queries.
    pub active_queries: Option<i64>,
    /// Query throughput per second.
    pub queries_per_sec: Option<f64>,
    /// Cache hit ratio, 0-100.
    pub cache_hit_ratio: Option<f64>,
    /// Engine uptime in seconds.
    pub uptime_seconds: Option<i64>,
    /// Total transactions or commands processed.
    pub total_transactions: Option<i64>,
    /// Storage used in MiB.
    pub storage_used_mb: Option<f64>,
    /// Adapter-specific extras.
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The capability bundle of one database engine.
///
/// Every field is either static data or a pure function over the instance
/// context, which keeps each capability independently testable.
pub struct EngineAdapter {
    /// Machine-readable engine tag, e.g. "postgresql".
    pub engine: &'static str,

    /// Human-readable name, e.g. "PostgreSQL 16".
    pub display_name: &'static str,

    /// One-line description for the engine listing.
    pub description: &'static str,

    /// Engine category.
    pub category: EngineCategory,

    /// Immutable image coordinates; empty for embedded engines.
    pub image: &'static str,

    /// TCP port the engine listens on inside the container; 0 when none.
    pub default_port: u16,

    /// Container path the data volume mounts at; empty when none.
    pub data_mount: &'static str,

    /// Container path a rendered config file mounts at read-only, if the
    /// engine takes one.
    pub config_mount: Option<&'static str>,

    /// File extension for dump files, including the dot.
    pub dump_extension: &'static str,

    /// Charset constraint for generated passwords.
    pub password_charset: Charset,

    /// Feature flags.
    pub supports: Supports,

    /// Linux capabilities the engine needs beyond the dropped-all baseline.
    pub extra_capabilities: &'static [&'static str],

    /// Whether the engine tolerates a read-only root filesystem. When set,
    /// the container is created with `--read-only`; writable paths are then
    /// limited to the data mount and the runtime's tmpfs. Engines whose
    /// entrypoints rewrite config or log under image paths leave this off.
    pub read_only_rootfs: bool,

    /// Memory floor in MiB below which the engine will not start.
    pub min_memory_mb: i64,

    /// Seconds the readiness gate waits for this engine.
    pub readiness_timeout_s: u64,

    /// Env-var map for container create.
    pub container_env: fn(&InstanceCtx) -> Vec<(String, String)>,

    /// Command override appended after the image at container create.
    pub container_args: fn(&InstanceCtx) -> Vec<String>,

    /// Renders the engine config file from the SKU memory envelope, when
    /// the engine takes one.
    pub render_config: Option<fn(memory_mb: i64) -> String>,

    /// Canonical client URI.
    pub connection_string: fn(host: &str, port: u16, ctx: &InstanceCtx) -> String,

    /// Probe command; exit 0 means healthy.
    pub health_cmd: fn(&InstanceCtx) -> Vec<String>,

    /// Interprets probe output into a report.
    pub parse_health: fn(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport,

    /// In-engine metrics command; empty when unsupported.
    pub metrics_cmd: fn(&InstanceCtx) -> Vec<String>,

    /// Parses metrics command stdout.
    pub parse_metrics: fn(stdout: &str) -> EngineMetrics,

    /// Produces a restorable dump at `dest` inside the container.
    pub snapshot_cmd: fn(ctx: &InstanceCtx, dest: &str) -> Vec<String>,

    /// Loads a dump from `source` inside the container; idempotent under
    /// retry.
    pub restore_cmd: fn(ctx: &InstanceCtx, source: &str) -> Vec<String>,

    /// Applies a new password in-engine, when the engine supports rotation.
    pub rotate_cmd: Option<fn(ctx: &InstanceCtx, new_password: &str) -> Vec<String>>,
}

/// Summary row served by the /engines listing.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    /// Engine tag.
    pub engine: &'static str,
    /// Human-readable name.
    pub display_name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Engine category.
    pub category: EngineCategory,
    /// Image reference.
    pub image: &'static str,
    /// In-container listen port.
    pub default_port: u16,
    /// Feature flags.
    pub supports: Supports,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks up an adapter by engine tag.
pub fn get_adapter(engine: &str) -> PodbaseResult<&'static EngineAdapter> {
    REGISTRY
        .get(engine)
        .copied()
        .ok_or_else(|| PodbaseError::EngineUnknown(engine.to_string()))
}

/// Summary info for every registered engine.
pub fn list_engines() -> Vec<EngineInfo> {
    REGISTRY
        .values()
        .map(|a| EngineInfo {
            engine: a.engine,
            display_name: a.display_name,
            description: a.description,
            category: a.category,
            image: a.image,
            default_port: a.default_port,
            supports: a.supports,
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Functions: shared adapter helpers
//--------------------------------------------------------------------------------------------------

/// No environment variables.
pub(crate) fn no_env(_: &InstanceCtx) -> Vec<(String, String)> {
    Vec::new()
}

/// No command override.
pub(crate) fn no_args(_: &InstanceCtx) -> Vec<String> {
    Vec::new()
}

/// No command at all (embedded engines).
pub(crate) fn no_cmd(_: &InstanceCtx) -> Vec<String> {
    Vec::new()
}

/// No dump/restore command (embedded engines).
pub(crate) fn no_transfer_cmd(_: &InstanceCtx, _: &str) -> Vec<String> {
    Vec::new()
}

/// No metrics parsing.
pub(crate) fn no_metrics(_: &str) -> EngineMetrics {
    EngineMetrics::default()
}

/// Health interpretation that trusts the exit code alone.
pub(crate) fn parse_health_exit_only(exit_code: i64, _: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 {
        ProbeReport {
            healthy: true,
            message: "probe succeeded".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("probe exited {exit_code}: {}", stderr.trim()),
            details: None,
        }
    }
}

/// Parses `key:value`-per-line output (the Redis INFO family) into a map.
pub(crate) fn parse_info_kv(stdout: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Extracts the first JSON object or array embedded in command output,
/// tolerating banner noise around it.
pub(crate) fn first_json_value(stdout: &str) -> Option<serde_json::Value> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find(['{', '['])?;
    serde_json::from_str(trimmed[start..].trim()).ok()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_engines() {
        assert_eq!(REGISTRY.len(), 25);
        for tag in [
            "postgresql",
            "mysql",
            "mariadb",
            "mssql",
            "oracle",
            "cockroachdb",
            "mongodb",
            "couchdb",
            "arangodb",
            "redis",
            "keydb",
            "valkey",
            "cassandra",
            "scylladb",
            "influxdb",
            "timescaledb",
            "questdb",
            "elasticsearch",
            "meilisearch",
            "typesense",
            "neo4j",
            "janusgraph",
            "clickhouse",
            "duckdb",
            "h2",
        ] {
            assert!(get_adapter(tag).is_ok(), "missing adapter for {tag}");
        }
        assert!(get_adapter("sybase").is_err());
    }

    #[test]
    fn test_registry_keys_match_tags() {
        for (tag, adapter) in REGISTRY.iter() {
            assert_eq!(*tag, adapter.engine);
        }
    }

    #[test]
    fn test_embedded_engines_have_no_image() {
        for adapter in REGISTRY.values() {
            if adapter.supports.embedded {
                assert!(adapter.image.is_empty());
            } else {
                assert!(!adapter.image.is_empty());
                assert!(adapter.default_port > 0);
            }
        }
    }

    #[test]
    fn test_parse_info_kv_skips_comments() {
        let out = "# Server\r\nconnected_clients:3\r\nuptime_in_seconds:120\r\n";
        let map = parse_info_kv(out);
        assert_eq!(map.get("connected_clients").unwrap(), "3");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_first_json_value_tolerates_banners() {
        let out = "Warning: using default config\n{\"ok\": 1}";
        let value = first_json_value(out).unwrap();
        assert_eq!(value["ok"], 1);
        assert!(first_json_value("no json here").is_none());
    }
}
