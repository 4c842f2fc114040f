//! KeyDB adapter.
//!
//! KeyDB is a multithreaded Redis fork; the wire protocol, CLI, and INFO
//! output are Redis-compatible.

use crate::credentials::Charset;

use super::{redis::parse_redis_info, EngineAdapter, EngineCategory, InstanceCtx, ProbeReport, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for KeyDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "keydb",
    display_name: "KeyDB",
    description: "Multithreaded Redis-compatible key-value store",
    category: EngineCategory::KeyValue,
    image: "docker.io/eqalpha/keydb:latest",
    default_port: 6379,
    data_mount: "/data",
    config_mount: None,
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
    render_config: None,
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
        "keydb-server".to_string(),
        "--requirepass".to_string(),
        ctx.password.to_string(),
        "--appendonly".to_string(),
        "yes".to_string(),
        "--dir".to_string(),
        "/data".to_string(),
    ]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("redis://:{}@{}:{}/0", ctx.password, host, port)
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "keydb-cli".to_string(),
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
            details: None,
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
        "keydb-cli".to_string(),
        "-a".to_string(),
        ctx.password.to_string(),
        "--no-auth-warning".to_string(),
        "INFO".to_string(),
    ]
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "keydb-cli -a {} --no-auth-warning SAVE && cp /data/dump.rdb {}",
            ctx.password, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cp {} /data/dump.rdb && keydb-cli -a {} --no-auth-warning DEBUG RELOAD",
            source, ctx.password
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "keydb-cli".to_string(),
        "-a".to_string(),
        ctx.password.to_string(),
        "--no-auth-warning".to_string(),
        "CONFIG".to_string(),
        "SET".to_string(),
        "requirepass".to_string(),
        new_password.to_string(),
    ]
}
