//! Meilisearch adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Meilisearch.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "meilisearch",
    display_name: "Meilisearch",
    description: "Lightning-fast typo-tolerant search engine",
    category: EngineCategory::Search,
    image: "docker.io/getmeili/meilisearch:latest",
    default_port: 7700,
    data_mount: "/meili_data",
    config_mount: None,
    dump_extension: ".dump",
    // The password doubles as the API master key.
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

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    vec![
        ("MEILI_ENV".to_string(), "production".to_string()),
        ("MEILI_MASTER_KEY".to_string(), ctx.password.to_string()),
    ]
}

fn connection_string(host: &str, port: u16, _: &InstanceCtx) -> String {
    format!("http://{host}:{port}")
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:7700/health".to_string(),
    ]
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "-H".to_string(),
        format!("Authorization: Bearer {}", ctx.password),
        "http://localhost:7700/stats".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let mut metrics = EngineMetrics {
        storage_used_mb: data["databaseSize"].as_f64().map(|b| b / (1024.0 * 1024.0)),
        ..Default::default()
    };
    if let Some(indexes) = data["indexes"].as_object() {
        metrics
            .extra
            .insert("index_count".to_string(), (indexes.len() as i64).into());
        let documents: i64 = indexes
            .values()
            .filter_map(|index| index["numberOfDocuments"].as_i64())
            .sum();
        metrics.extra.insert("document_count".to_string(), documents.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    // The dump task is async; poll until it finishes, then collect the file.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "curl -sf -X POST -H 'Authorization: Bearer {key}' http://localhost:7700/dumps >/dev/null && \
             for i in $(seq 1 60); do \
               [ -n \"$(ls /meili_data/dumps/*.dump 2>/dev/null)\" ] && break; sleep 2; \
             done && \
             cp \"$(ls -t /meili_data/dumps/*.dump | head -1)\" {dest}",
            key = ctx.password,
            dest = dest
        ),
    ]
}

fn restore_cmd(_: &InstanceCtx, source: &str) -> Vec<String> {
    // A dump import needs a restart with --import-dump; stage the file where
    // the next start picks it up.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("mkdir -p /meili_data/dumps && cp {source} /meili_data/dumps/restore.dump"),
    ]
}
