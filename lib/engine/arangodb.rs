//! ArangoDB adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for ArangoDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "arangodb",
    display_name: "ArangoDB",
    description: "Multi-model database for documents, graphs, and key-value",
    category: EngineCategory::Document,
    image: "docker.io/arangodb:latest",
    default_port: 8529,
    data_mount: "/var/lib/arangodb3",
    config_mount: None,
    dump_extension: ".tar",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
    read_only_rootfs: false,
    min_memory_mb: 512,
    readiness_timeout_s: 120,
    container_env: env,
    container_args: super::no_args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: super::parse_health_exit_only,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_metrics,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: None,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    vec![("ARANGO_ROOT_PASSWORD".to_string(), ctx.password.to_string())]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    if ctx.database.is_empty() {
        format!("http://{}:{}@{}:{}", ctx.username, ctx.password, host, port)
    } else {
        format!(
            "http://{}:{}@{}:{}/_db/{}",
            ctx.username, ctx.password, host, port, ctx.database
        )
    }
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:8529/_api/version".to_string(),
    ]
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "-u".to_string(),
        format!("root:{}", ctx.password),
        "http://localhost:8529/_admin/statistics".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    EngineMetrics {
        connections: data["client"]["httpConnections"].as_i64(),
        uptime_seconds: data["server"]["uptime"].as_f64().map(|s| s as i64),
        storage_used_mb: data["server"]["physicalMemory"]
            .as_f64()
            .map(|b| b / (1024.0 * 1024.0)),
        ..Default::default()
    }
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "arangodump --server.password '{}' --server.database {} \
             --output-directory /tmp/podbase_dump --overwrite true \
             && tar -cf {} -C /tmp podbase_dump",
            ctx.password, ctx.database, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "tar -xf {} -C /tmp \
             && arangorestore --server.password '{}' --server.database {} \
             --input-directory /tmp/podbase_dump --overwrite true",
            source, ctx.password, ctx.database
        ),
    ]
}
