//! JanusGraph adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for JanusGraph.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "janusgraph",
    display_name: "JanusGraph",
    description: "Distributed graph database over the Gremlin protocol",
    category: EngineCategory::Graph,
    image: "docker.io/janusgraph/janusgraph:latest",
    default_port: 8182,
    data_mount: "/var/lib/janusgraph",
    config_mount: None,
    dump_extension: ".json",
    // No built-in user management.
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: false,
        users: false,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: false,
    min_memory_mb: 1024,
    readiness_timeout_s: 300,
    container_env: super::no_env,
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

const GREMLIN_ENDPOINT: &str = "http://localhost:8182";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn connection_string(host: &str, port: u16, _: &InstanceCtx) -> String {
    format!("ws://{host}:{port}/gremlin")
}

fn gremlin_post(script: &str) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "-X".to_string(),
        "POST".to_string(),
        "-H".to_string(),
        "Content-Type: application/json".to_string(),
        "-d".to_string(),
        format!("{{\"gremlin\":\"{script}\"}}"),
        GREMLIN_ENDPOINT.to_string(),
    ]
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    gremlin_post("g.V().limit(1).count()")
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    gremlin_post("g.V().count()")
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let mut metrics = EngineMetrics::default();
    if let Some(data) = first_json_value(stdout) {
        if let Some(count) = data["result"]["data"]["@value"][0]["@value"].as_i64() {
            metrics.extra.insert("vertex_count".to_string(), count.into());
        }
    }
    metrics
}

fn snapshot_cmd(_: &InstanceCtx, dest: &str) -> Vec<String> {
    gremlin_post(&format!(
        "g.io('{dest}').with(IO.writer, IO.graphson).write().iterate()"
    ))
}

fn restore_cmd(_: &InstanceCtx, source: &str) -> Vec<String> {
    // GraphSON reads merge by id, so replaying the import converges.
    gremlin_post(&format!(
        "g.io('{source}').with(IO.reader, IO.graphson).read().iterate()"
    ))
}
