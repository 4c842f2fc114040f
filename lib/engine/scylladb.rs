//! ScyllaDB adapter.

use crate::credentials::Charset;

use super::{
    cassandra::parse_nodetool_info, EngineAdapter, EngineCategory, InstanceCtx, ProbeReport,
    Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for ScyllaDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "scylladb",
    display_name: "ScyllaDB",
    description: "C++ Cassandra-compatible wide-column store",
    category: EngineCategory::WideColumn,
    image: "docker.io/scylladb/scylla:latest",
    default_port: 9042,
    data_mount: "/var/lib/scylla",
    config_mount: None,
    dump_extension: ".tar.gz",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN", "SYS_NICE"],
    read_only_rootfs: false,
    min_memory_mb: 1024,
    readiness_timeout_s: 300,
    container_env: super::no_env,
    container_args: args,
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

fn args(_: &InstanceCtx) -> Vec<String> {
    // Tell Scylla it shares the host instead of owning it.
    vec![
        "--smp".to_string(),
        "1".to_string(),
        "--overprovisioned".to_string(),
        "1".to_string(),
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
            message: "node is answering CQL".to_string(),
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

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "nodetool clearsnapshot -t podbase >/dev/null 2>&1; \
             nodetool snapshot -t podbase {ks} \
             && tar -czf {dest} -C /var/lib/scylla/data {ks}",
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
