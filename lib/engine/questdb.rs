//! QuestDB adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for QuestDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "questdb",
    display_name: "QuestDB",
    description: "High-throughput time-series database with SQL over HTTP and PG wire",
    category: EngineCategory::TimeSeries,
    image: "docker.io/questdb/questdb:latest",
    default_port: 9000,
    data_mount: "/var/lib/questdb",
    config_mount: None,
    dump_extension: ".tar.gz",
    // OSS build has no built-in auth.
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

fn env(_: &InstanceCtx) -> Vec<(String, String)> {
    vec![("QDB_HTTP_ENABLED".to_string(), "true".to_string())]
}

fn connection_string(host: &str, port: u16, _: &InstanceCtx) -> String {
    format!("http://{host}:{port}")
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:9000/exec?query=SELECT+1".to_string(),
    ]
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:9000/exec?query=SELECT+count()+FROM+tables()".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let mut metrics = EngineMetrics::default();
    if let Some(count) = data["dataset"][0][0].as_i64() {
        metrics.extra.insert("table_count".to_string(), count.into());
    }
    metrics
}

fn snapshot_cmd(_: &InstanceCtx, dest: &str) -> Vec<String> {
    // The db directory is self-contained; a consistent copy is the
    // supported OSS backup path.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "curl -sf 'http://localhost:9000/exec?query=CHECKPOINT+CREATE' >/dev/null; \
             tar -czf {dest} -C /var/lib/questdb db; \
             curl -sf 'http://localhost:9000/exec?query=CHECKPOINT+RELEASE' >/dev/null"
        ),
    ]
}

fn restore_cmd(_: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("rm -rf /var/lib/questdb/db && tar -xzf {source} -C /var/lib/questdb"),
    ]
}
