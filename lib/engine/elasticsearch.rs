//! Elasticsearch 8.11 adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports, TLS_CERT_MOUNT, TLS_KEY_MOUNT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Elasticsearch.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "elasticsearch",
    display_name: "Elasticsearch 8.11",
    description: "Distributed search and analytics engine",
    category: EngineCategory::Search,
    image: "docker.elastic.co/elasticsearch/elasticsearch:8.11.0",
    default_port: 9200,
    data_mount: "/usr/share/elasticsearch/data",
    config_mount: None,
    dump_extension: ".tar.gz",
    password_charset: Charset::WithSymbols,
    supports: Supports {
        // Indices; user management is X-Pack territory.
        logical_databases: true,
        users: false,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: false,
    min_memory_mb: 1024,
    readiness_timeout_s: 300,
    container_env: env,
    container_args: super::no_args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: parse_health,
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
    let mut env = vec![
        ("discovery.type".to_string(), "single-node".to_string()),
        ("ELASTIC_PASSWORD".to_string(), ctx.password.to_string()),
        ("bootstrap.memory_lock".to_string(), "false".to_string()),
        (
            "path.repo".to_string(),
            "/usr/share/elasticsearch/backup".to_string(),
        ),
    ];
    if ctx.tls {
        env.extend([
            ("xpack.security.enabled".to_string(), "true".to_string()),
            (
                "xpack.security.http.ssl.enabled".to_string(),
                "true".to_string(),
            ),
            (
                "xpack.security.http.ssl.certificate".to_string(),
                TLS_CERT_MOUNT.to_string(),
            ),
            (
                "xpack.security.http.ssl.key".to_string(),
                TLS_KEY_MOUNT.to_string(),
            ),
        ]);
    } else {
        env.push(("xpack.security.enabled".to_string(), "false".to_string()));
    }
    env
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("http://elastic:{}@{}:{}", ctx.password, host, port)
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:9200/_cluster/health".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code != 0 {
        return ProbeReport {
            healthy: false,
            message: format!("cluster health probe failed: {}", stderr.trim()),
            details: None,
        };
    }
    let Some(data) = first_json_value(stdout) else {
        return ProbeReport {
            healthy: false,
            message: format!("unparseable health response: {stdout}"),
            details: None,
        };
    };
    let status = data["status"].as_str().unwrap_or("unknown").to_string();
    ProbeReport {
        // Yellow is expected for single-node clusters (no replica homes).
        healthy: status == "green" || status == "yellow",
        message: format!("cluster status is {status}"),
        details: Some(data),
    }
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:9200/_nodes/stats/jvm,indices,http".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let Some((_, node)) = data["nodes"]
        .as_object()
        .and_then(|nodes| nodes.iter().next())
        .map(|(k, v)| (k.clone(), v.clone()))
    else {
        return EngineMetrics::default();
    };

    let mut metrics = EngineMetrics {
        connections: node["http"]["current_open"].as_i64(),
        uptime_seconds: node["jvm"]["uptime_in_millis"].as_i64().map(|ms| ms / 1000),
        total_transactions: node["indices"]["search"]["query_total"].as_i64(),
        storage_used_mb: node["indices"]["store"]["size_in_bytes"]
            .as_f64()
            .map(|b| b / (1024.0 * 1024.0)),
        ..Default::default()
    };
    if let Some(docs) = node["indices"]["docs"]["count"].as_i64() {
        metrics.extra.insert("doc_count".to_string(), docs.into());
    }
    if let Some(heap) = node["jvm"]["mem"]["heap_used_percent"].as_i64() {
        metrics.extra.insert("heap_used_percent".to_string(), heap.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    // Register a filesystem repository, snapshot into it, then bundle it.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mkdir -p /usr/share/elasticsearch/backup && \
             curl -sf -X PUT 'http://localhost:9200/_snapshot/podbase' \
             -H 'Content-Type: application/json' \
             -d '{{\"type\":\"fs\",\"settings\":{{\"location\":\"/usr/share/elasticsearch/backup\"}}}}' && \
             curl -sf -X DELETE 'http://localhost:9200/_snapshot/podbase/{snap}' >/dev/null 2>&1; \
             curl -sf -X PUT 'http://localhost:9200/_snapshot/podbase/{snap}?wait_for_completion=true' && \
             tar -czf {dest} -C /usr/share/elasticsearch backup",
            snap = format!("snap_{}", if ctx.database.is_empty() { "all" } else { ctx.database }),
            dest = dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "tar -xzf {source} -C /usr/share/elasticsearch && \
             curl -sf -X PUT 'http://localhost:9200/_snapshot/podbase' \
             -H 'Content-Type: application/json' \
             -d '{{\"type\":\"fs\",\"settings\":{{\"location\":\"/usr/share/elasticsearch/backup\"}}}}' && \
             curl -sf -X POST 'http://localhost:9200/_all/_close?expand_wildcards=all' >/dev/null 2>&1; \
             curl -sf -X POST 'http://localhost:9200/_snapshot/podbase/{snap}/_restore?wait_for_completion=true'",
            source = source,
            snap = format!("snap_{}", if ctx.database.is_empty() { "all" } else { ctx.database })
        ),
    ]
}
