//! Redis 7 adapter.

use crate::credentials::Charset;

use super::{
    parse_info_kv, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Redis.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "redis",
    display_name: "Redis 7",
    description: "In-memory key-value store with optional persistence",
    category: EngineCategory::KeyValue,
    image: "docker.io/library/redis:7-alpine",
    default_port: 6379,
    data_mount: "/data",
    config_mount: Some("/usr/local/etc/redis/redis.conf"),
    dump_extension: ".rdb",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: false,
        users: false,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: true,
    min_memory_mb: 128,
    readiness_timeout_s: 60,
    container_env: super::no_env,
    container_args: args,
    render_config: Some(render_config),
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: parse_health,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_redis_info,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: Some(rotate_cmd),
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn args(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "redis-server".to_string(),
        "/usr/local/etc/redis/redis.conf".to_string(),
        "--requirepass".to_string(),
        ctx.password.to_string(),
        "--appendonly".to_string(),
        "yes".to_string(),
        "--dir".to_string(),
        "/data".to_string(),
    ]
}

fn render_config(memory_mb: i64) -> String {
    // Leave headroom under the container cap for fork-based persistence.
    let maxmemory = (memory_mb * 3 / 4).max(64);
    format!(
        "maxmemory {maxmemory}mb\n\
         maxmemory-policy allkeys-lru\n\
         save 900 1\n\
         save 300 10\n\
         save 60 10000\n"
    )
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    let db_number = if ctx.database.chars().all(|c| c.is_ascii_digit()) && !ctx.database.is_empty()
    {
        ctx.database
    } else {
        "0"
    };
    format!("redis://:{}@{}:{}/{}", ctx.password, host, port, db_number)
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "redis-cli".to_string(),
        "-a".to_string(),
        ctx.password.to_string(),
        "--no-auth-warning".to_string(),
        "ping".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && stdout.to_uppercase().contains("PONG") {
        ProbeReport {
            healthy: true,
            message: "responding to PING".to_string(),
            details: Some(serde_json::json!({ "response": stdout.trim() })),
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("probe failed: {}", if stderr.is_empty() { stdout } else { stderr }),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "redis-cli".to_string(),
        "-a".to_string(),
        ctx.password.to_string(),
        "--no-auth-warning".to_string(),
        "INFO".to_string(),
    ]
}

/// Parses `redis-cli INFO` output. Shared with the keydb and valkey
/// adapters, whose INFO sections use the same field names.
pub(super) fn parse_redis_info(stdout: &str) -> EngineMetrics {
    let info = parse_info_kv(stdout);
    let as_i64 = |key: &str| info.get(key).and_then(|v| v.parse::<i64>().ok());
    let as_f64 = |key: &str| info.get(key).and_then(|v| v.parse::<f64>().ok());

    let mut metrics = EngineMetrics {
        connections: as_i64("connected_clients"),
        uptime_seconds: as_i64("uptime_in_seconds"),
        total_transactions: as_i64("total_commands_processed"),
        queries_per_sec: as_f64("instantaneous_ops_per_sec"),
        storage_used_mb: as_i64("used_memory").map(|b| b as f64 / (1024.0 * 1024.0)),
        ..Default::default()
    };

    if let (Some(hits), Some(misses)) = (as_i64("keyspace_hits"), as_i64("keyspace_misses")) {
        let total = hits + misses;
        if total > 0 {
            metrics.cache_hit_ratio = Some((hits as f64 / total as f64) * 100.0);
        }
        metrics.extra.insert("keyspace_hits".to_string(), hits.into());
        metrics.extra.insert("keyspace_misses".to_string(), misses.into());
    }
    if let Some(evicted) = as_i64("evicted_keys") {
        metrics.extra.insert("evicted_keys".to_string(), evicted.into());
    }
    if let Some(expired) = as_i64("expired_keys") {
        metrics.extra.insert("expired_keys".to_string(), expired.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    // SAVE is synchronous, so the dump is complete when the command returns;
    // the data dir copy lands at the requested destination.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "redis-cli -a {} --no-auth-warning SAVE && cp /data/dump.rdb {}",
            ctx.password, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    // Replace the on-disk dump and flush the live keyspace so a restart
    // loads the restored state. Repeating this is harmless.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cp {} /data/dump.rdb && redis-cli -a {} --no-auth-warning DEBUG RELOAD",
            source, ctx.password
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "redis-cli".to_string(),
        "-a".to_string(),
        ctx.password.to_string(),
        "--no-auth-warning".to_string(),
        "CONFIG".to_string(),
        "SET".to_string(),
        "requirepass".to_string(),
        new_password.to_string(),
    ]
}
