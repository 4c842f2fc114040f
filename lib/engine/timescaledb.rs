//! TimescaleDB adapter.
//!
//! TimescaleDB rides on PostgreSQL 16; probes and dumps use the stock
//! PostgreSQL tooling with the timescaledb library preloaded.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports, TLS_CERT_MOUNT, TLS_KEY_MOUNT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for TimescaleDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "timescaledb",
    display_name: "TimescaleDB",
    description: "Time-series database packaged as a PostgreSQL extension",
    category: EngineCategory::TimeSeries,
    image: "docker.io/timescale/timescaledb:latest-pg16",
    default_port: 5432,
    data_mount: "/var/lib/postgresql/data",
    config_mount: Some("/etc/postgresql/postgresql.conf"),
    dump_extension: ".dump",
    password_charset: Charset::WithSymbols,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN", "DAC_OVERRIDE"],
    read_only_rootfs: true,
    min_memory_mb: 512,
    readiness_timeout_s: 120,
    container_env: env,
    container_args: args,
    render_config: Some(render_config),
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: parse_health,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_metrics,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: Some(rotate_cmd),
};

const METRICS_QUERY: &str = r#"SELECT json_build_object(
    'connections', (SELECT count(*) FROM pg_stat_activity),
    'active_queries', (SELECT count(*) FROM pg_stat_activity WHERE state = 'active'),
    'uptime_seconds', (SELECT EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::integer),
    'hypertables', (SELECT count(*) FROM timescaledb_information.hypertables)
) AS metrics;"#;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![
        ("POSTGRES_USER".to_string(), ctx.username.to_string()),
        ("POSTGRES_PASSWORD".to_string(), ctx.password.to_string()),
    ];
    if !ctx.database.is_empty() {
        env.push(("POSTGRES_DB".to_string(), ctx.database.to_string()));
    }
    env
}

fn args(ctx: &InstanceCtx) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        "shared_preload_libraries=timescaledb".to_string(),
        "-c".to_string(),
        "config_file=/etc/postgresql/postgresql.conf".to_string(),
    ];
    if ctx.tls {
        args.extend([
            "-c".to_string(),
            "ssl=on".to_string(),
            "-c".to_string(),
            format!("ssl_cert_file={TLS_CERT_MOUNT}"),
            "-c".to_string(),
            format!("ssl_key_file={TLS_KEY_MOUNT}"),
        ]);
    }
    args
}

fn render_config(memory_mb: i64) -> String {
    let shared_buffers = (memory_mb / 4).max(128);
    let effective_cache = (memory_mb * 3 / 4).max(256);
    format!(
        "listen_addresses = '*'\n\
         shared_preload_libraries = 'timescaledb'\n\
         shared_buffers = {shared_buffers}MB\n\
         effective_cache_size = {effective_cache}MB\n\
         max_connections = 100\n"
    )
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "postgresql://{}:{}@{}:{}/{}",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "pg_isready".to_string(),
        "-h".to_string(),
        "localhost".to_string(),
        "-U".to_string(),
        ctx.username.to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && stdout.contains("accepting connections") {
        ProbeReport {
            healthy: true,
            message: "server is accepting connections".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("pg_isready exited {exit_code}: {stdout} {stderr}"),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "psql".to_string(),
        "-h".to_string(),
        "localhost".to_string(),
        "-U".to_string(),
        ctx.username.to_string(),
        "-d".to_string(),
        ctx.database.to_string(),
        "-t".to_string(),
        "-A".to_string(),
        "-c".to_string(),
        METRICS_QUERY.to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let mut metrics = EngineMetrics {
        connections: data["connections"].as_i64(),
        active_queries: data["active_queries"].as_i64(),
        uptime_seconds: data["uptime_seconds"].as_i64(),
        ..Default::default()
    };
    if let Some(hypertables) = data["hypertables"].as_i64() {
        metrics
            .extra
            .insert("hypertables".to_string(), hypertables.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "PGPASSWORD='{}' pg_dump -h localhost -U {} -Fc -f {} {}",
            ctx.password, ctx.username, dest, ctx.database
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "PGPASSWORD='{}' pg_restore -h localhost -U {} -d {} --clean --if-exists {}",
            ctx.password, ctx.username, ctx.database, source
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "PGPASSWORD='{}' psql -h localhost -U {} -c \"ALTER USER {} WITH PASSWORD '{}';\"",
            ctx.password, ctx.username, ctx.username, new_password
        ),
    ]
}
