//! Apache Cassandra 5 adapter.

use crate::credentials::Charset;

use super::{
    EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Cassandra.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "cassandra",
    display_name: "Apache Cassandra 5",
    description: "Wide-column store built for write-heavy workloads",
    category: EngineCategory::WideColumn,
    image: "docker.io/library/cassandra:5",
    default_port: 9042,
    data_mount: "/var/lib/cassandra",
    config_mount: None,
    dump_extension: ".tar.gz",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        // Keyspaces and roles.
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
    read_only_rootfs: false,
    min_memory_mb: 2048,
    readiness_timeout_s: 300,
    container_env: env,
    container_args: super::no_args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: parse_health,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_nodetool_info,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: None,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(_: &InstanceCtx) -> Vec<(String, String)> {
    vec![
        ("CASSANDRA_CLUSTER_NAME".to_string(), "podbase".to_string()),
        ("CASSANDRA_DC".to_string(), "datacenter1".to_string()),
    ]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("cassandra://{}:{}/{}", host, port, ctx.database)
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "cqlsh".to_string(),
        "-e".to_string(),
        "SELECT now() FROM system.local".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && (stdout.contains("rows") || stdout.contains("now()")) {
        ProbeReport {
            healthy: true,
            message: "cluster is answering CQL".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: if stderr.is_empty() {
                "failed to connect".to_string()
            } else {
                stderr.trim().to_string()
            },
            details: None,
        }
    }
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    vec!["nodetool".to_string(), "info".to_string()]
}

/// Parses `nodetool info` output. Shared with the scylladb adapter, which
/// ships the same tool.
pub(super) fn parse_nodetool_info(stdout: &str) -> EngineMetrics {
    let mut metrics = EngineMetrics::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "Uptime (seconds)" => metrics.uptime_seconds = value.parse().ok(),
            "Load" => {
                metrics
                    .extra
                    .insert("node_load".to_string(), value.to_string().into());
            }
            "Heap Memory (MB)" => {
                // "used / max"
                if let Some((used, _)) = value.split_once('/') {
                    metrics.storage_used_mb = used.trim().parse().ok();
                }
            }
            _ => {}
        }
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    // nodetool snapshot writes under the keyspace data dirs; bundle them up
    // at the requested destination.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "nodetool clearsnapshot -t podbase --all >/dev/null 2>&1; \
             nodetool snapshot -t podbase {ks} \
             && tar -czf {dest} -C /var/lib/cassandra/data {ks}",
            ks = ctx.database,
            dest = dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "rm -rf /tmp/podbase_restore && mkdir -p /tmp/podbase_restore \
             && tar -xzf {} -C /tmp/podbase_restore \
             && find /tmp/podbase_restore/{} -type d -name 'podbase' \
             | xargs -I{{}} sstableloader -d localhost {{}}",
            source, ctx.database
        ),
    ]
}
