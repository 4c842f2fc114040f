//! Typesense adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Typesense.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "typesense",
    display_name: "Typesense",
    description: "Fast, typo-tolerant open-source search engine",
    category: EngineCategory::Search,
    image: "docker.io/typesense/typesense:latest",
    default_port: 8108,
    data_mount: "/data",
    config_mount: None,
    dump_extension: ".tar.gz",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: false,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: true,
    min_memory_mb: 256,
    readiness_timeout_s: 120,
    container_env: super::no_env,
    container_args: args,
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

fn args(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "--data-dir".to_string(),
        "/data".to_string(),
        "--api-key".to_string(),
        ctx.password.to_string(),
        "--enable-cors".to_string(),
    ]
}

fn connection_string(host: &str, port: u16, _: &InstanceCtx) -> String {
    format!("http://{host}:{port}")
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:8108/health".to_string(),
    ]
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "-H".to_string(),
        format!("X-TYPESENSE-API-KEY: {}", ctx.password),
        "http://localhost:8108/metrics.json".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let as_str_f64 = |key: &str| -> Option<f64> {
        data[key]
            .as_f64()
            .or_else(|| data[key].as_str().and_then(|s| s.parse().ok()))
    };
    EngineMetrics {
        storage_used_mb: as_str_f64("typesense_memory_used_bytes").map(|b| b / (1024.0 * 1024.0)),
        queries_per_sec: as_str_f64("typesense_search_requests_per_second"),
        ..Default::default()
    }
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "rm -rf /data/snapshot && \
             curl -sf -H 'X-TYPESENSE-API-KEY: {key}' -X POST \
             'http://localhost:8108/operations/snapshot?snapshot_path=/data/snapshot' && \
             tar -czf {dest} -C /data snapshot",
            key = ctx.password,
            dest = dest
        ),
    ]
}

fn restore_cmd(_: &InstanceCtx, source: &str) -> Vec<String> {
    // Typesense loads a staged snapshot directory on next start.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("rm -rf /data/snapshot && tar -xzf {source} -C /data"),
    ]
}
