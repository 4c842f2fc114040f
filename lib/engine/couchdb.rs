//! CouchDB 3 adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for CouchDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "couchdb",
    display_name: "CouchDB 3",
    description: "HTTP-native document database with MVCC and replication",
    category: EngineCategory::Document,
    image: "docker.io/library/couchdb:3",
    default_port: 5984,
    data_mount: "/opt/couchdb/data",
    config_mount: None,
    dump_extension: ".json",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        // Auth is HTTP-level, not SQL-style users.
        users: false,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
    read_only_rootfs: false,
    min_memory_mb: 256,
    readiness_timeout_s: 120,
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
    vec![
        ("COUCHDB_USER".to_string(), ctx.username.to_string()),
        ("COUCHDB_PASSWORD".to_string(), ctx.password.to_string()),
    ]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "http://{}:{}@{}:{}/{}",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:5984/_up".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && stdout.contains("\"status\":\"ok\"") {
        ProbeReport {
            healthy: true,
            message: "_up reports ok".to_string(),
            details: None,
        }
    } else if exit_code == 0 {
        ProbeReport {
            healthy: false,
            message: format!("unexpected _up response: {stdout}"),
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

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "-u".to_string(),
        format!("{}:{}", ctx.username, ctx.password),
        "http://localhost:5984/_node/_local/_stats/couchdb".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let mut metrics = EngineMetrics {
        connections: data["open_databases"]["value"].as_i64(),
        total_transactions: data["httpd"]["requests"]["value"]
            .as_i64()
            .or_else(|| data["request_time"]["value"]["n"].as_i64()),
        ..Default::default()
    };
    if let Some(open_files) = data["open_os_files"]["value"].as_i64() {
        metrics.extra.insert("open_os_files".to_string(), open_files.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "curl -sf -u {}:{} 'http://localhost:5984/{}/_all_docs?include_docs=true' > {}",
            ctx.username, ctx.password, ctx.database, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    // Recreating the database before the bulk load keeps the restore
    // idempotent; _bulk_docs otherwise conflicts on existing revisions.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "curl -s -X DELETE -u {u}:{p} 'http://localhost:5984/{db}'; \
             curl -sf -X PUT -u {u}:{p} 'http://localhost:5984/{db}' && \
             python3 -c \"import json,sys; docs=json.load(open('{src}')); \
             print(json.dumps({{'docs': [r['doc'] for r in docs['rows']]}}))\" > /tmp/podbase_bulk.json && \
             curl -sf -X POST -u {u}:{p} -H 'Content-Type: application/json' \
             -d @/tmp/podbase_bulk.json 'http://localhost:5984/{db}/_bulk_docs'",
            u = ctx.username,
            p = ctx.password,
            db = ctx.database,
            src = source
        ),
    ]
}
