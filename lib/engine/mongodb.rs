//! MongoDB 7 adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports, TLS_COMBINED_MOUNT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for MongoDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "mongodb",
    display_name: "MongoDB 7",
    description: "Document database with flexible JSON-like storage",
    category: EngineCategory::Document,
    image: "docker.io/library/mongo:7",
    default_port: 27017,
    data_mount: "/data/db",
    config_mount: None,
    dump_extension: ".archive",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
    read_only_rootfs: true,
    min_memory_mb: 512,
    readiness_timeout_s: 120,
    container_env: env,
    container_args: args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: parse_health,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_metrics,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: Some(rotate_cmd),
};

const METRICS_SCRIPT: &str = r#"const status = db.serverStatus();
print(JSON.stringify({
    connections: status.connections.current,
    activeOperations: status.globalLock ? status.globalLock.activeClients.total : 0,
    uptimeSeconds: Math.floor(status.uptime),
    insertOps: status.opcounters.insert,
    queryOps: status.opcounters.query,
    updateOps: status.opcounters.update,
    deleteOps: status.opcounters.delete,
    commandOps: status.opcounters.command,
    memResident: status.mem.resident,
    memVirtual: status.mem.virtual,
    cacheUsedMB: status.wiredTiger ? Math.round(status.wiredTiger.cache["bytes currently in the cache"] / 1048576) : 0,
    cacheMaxMB: status.wiredTiger ? Math.round(status.wiredTiger.cache["maximum bytes configured"] / 1048576) : 0
}));"#;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![
        (
            "MONGO_INITDB_ROOT_USERNAME".to_string(),
            ctx.username.to_string(),
        ),
        (
            "MONGO_INITDB_ROOT_PASSWORD".to_string(),
            ctx.password.to_string(),
        ),
    ];
    if !ctx.database.is_empty() {
        env.push(("MONGO_INITDB_DATABASE".to_string(), ctx.database.to_string()));
    }
    env
}

fn args(ctx: &InstanceCtx) -> Vec<String> {
    if ctx.tls {
        vec![
            "--tlsMode=requireTLS".to_string(),
            format!("--tlsCertificateKeyFile={TLS_COMBINED_MOUNT}"),
        ]
    } else {
        Vec::new()
    }
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "mongodb://{}:{}@{}:{}/{}?authSource=admin",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "mongosh".to_string(),
        "--quiet".to_string(),
        "--eval".to_string(),
        "db.adminCommand('ping')".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "--authenticationDatabase".to_string(),
        "admin".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code != 0 {
        return ProbeReport {
            healthy: false,
            message: format!("probe exited {exit_code}: {}", stderr.trim()),
            details: None,
        };
    }
    // mongosh prints the ping response as a loose JS object, e.g. `{ ok: 1 }`.
    if stdout.contains("ok") && stdout.contains('1') {
        ProbeReport {
            healthy: true,
            message: "responding to commands".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("unexpected ping response: {stdout}"),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "mongosh".to_string(),
        "--quiet".to_string(),
        "--eval".to_string(),
        METRICS_SCRIPT.to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "--authenticationDatabase".to_string(),
        "admin".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };

    let ops: i64 = ["insertOps", "queryOps", "updateOps", "deleteOps", "commandOps"]
        .iter()
        .filter_map(|key| data[*key].as_i64())
        .sum();
    let uptime = data["uptimeSeconds"].as_i64().unwrap_or(0);

    let mut metrics = EngineMetrics {
        connections: data["connections"].as_i64(),
        active_queries: data["activeOperations"].as_i64(),
        uptime_seconds: data["uptimeSeconds"].as_i64(),
        total_transactions: Some(ops),
        queries_per_sec: (uptime > 0).then(|| ops as f64 / uptime as f64),
        storage_used_mb: data["cacheUsedMB"].as_f64(),
        ..Default::default()
    };
    if let (Some(used), Some(max)) = (data["cacheUsedMB"].as_f64(), data["cacheMaxMB"].as_f64()) {
        if max > 0.0 {
            metrics.cache_hit_ratio = Some((used / max) * 100.0);
        }
    }
    for key in ["memResident", "memVirtual"] {
        if let Some(value) = data[key].as_i64() {
            metrics.extra.insert(key.to_string(), value.into());
        }
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "mongodump".to_string(),
        format!("--archive={dest}"),
        "--gzip".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "--authenticationDatabase".to_string(),
        "admin".to_string(),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "mongorestore".to_string(),
        format!("--archive={source}"),
        "--gzip".to_string(),
        "--drop".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "--authenticationDatabase".to_string(),
        "admin".to_string(),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "mongosh".to_string(),
        "--username".to_string(),
        ctx.username.to_string(),
        "--password".to_string(),
        ctx.password.to_string(),
        "--authenticationDatabase".to_string(),
        "admin".to_string(),
        "--eval".to_string(),
        format!(
            "db.getSiblingDB('admin').changeUserPassword('{}', '{}')",
            ctx.username, new_password
        ),
    ]
}
