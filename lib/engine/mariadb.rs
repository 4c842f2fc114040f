//! MariaDB 11 adapter.
//!
//! MariaDB tracks the MySQL wire protocol and tooling; the differences that
//! matter here are the image, the healthcheck binary, and the status query
//! source (MariaDB keeps SHOW GLOBAL STATUS accessible without
//! performance_schema).

use crate::credentials::Charset;

use super::{
    EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport, Supports,
    TLS_CERT_MOUNT, TLS_KEY_MOUNT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for MariaDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "mariadb",
    display_name: "MariaDB 11",
    description: "Community-developed MySQL fork with enterprise features",
    category: EngineCategory::Relational,
    image: "docker.io/library/mariadb:11",
    default_port: 3306,
    data_mount: "/var/lib/mysql",
    config_mount: Some("/etc/mysql/conf.d/podbase.cnf"),
    dump_extension: ".sql",
    password_charset: Charset::WithSymbols,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN", "DAC_OVERRIDE"],
    read_only_rootfs: false,
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

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![(
        "MARIADB_ROOT_PASSWORD".to_string(),
        ctx.password.to_string(),
    )];
    if ctx.username != "root" {
        env.push(("MARIADB_USER".to_string(), ctx.username.to_string()));
        env.push(("MARIADB_PASSWORD".to_string(), ctx.password.to_string()));
    }
    if !ctx.database.is_empty() {
        env.push(("MARIADB_DATABASE".to_string(), ctx.database.to_string()));
    }
    env
}

fn args(ctx: &InstanceCtx) -> Vec<String> {
    if ctx.tls {
        vec![
            format!("--ssl-cert={TLS_CERT_MOUNT}"),
            format!("--ssl-key={TLS_KEY_MOUNT}"),
        ]
    } else {
        Vec::new()
    }
}

fn render_config(memory_mb: i64) -> String {
    let buffer_pool = (memory_mb / 2).max(128);
    format!(
        "[mariadb]\n\
         innodb_buffer_pool_size = {buffer_pool}M\n\
         max_connections = 151\n\
         slow_query_log = 1\n"
    )
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "mysql://{}:{}@{}:{}/{}",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    // Shipped in the image since 10.5; needs no credentials.
    vec![
        "healthcheck.sh".to_string(),
        "--connect".to_string(),
        "--innodb_initialized".to_string(),
    ]
}

fn parse_health(exit_code: i64, _: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 {
        ProbeReport {
            healthy: true,
            message: "server is connectable and InnoDB is initialized".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("healthcheck exited {exit_code}: {}", stderr.trim()),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "mariadb".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        format!("-p{}", ctx.password),
        "-N".to_string(),
        "-e".to_string(),
        "SHOW GLOBAL STATUS WHERE Variable_name IN \
         ('Threads_connected','Threads_running','Questions','Uptime','Slow_queries');"
            .to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    // Tab-separated name/value pairs, one per line.
    let mut metrics = EngineMetrics::default();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let parsed: Option<i64> = value.parse().ok();
        match name {
            "Threads_connected" => metrics.connections = parsed,
            "Threads_running" => metrics.active_queries = parsed,
            "Questions" => metrics.total_transactions = parsed,
            "Uptime" => metrics.uptime_seconds = parsed,
            "Slow_queries" => {
                if let Some(slow) = parsed {
                    metrics.extra.insert("slow_queries".to_string(), slow.into());
                }
            }
            _ => {}
        }
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mariadb-dump --single-transaction --routines --triggers --events -u {} -p'{}' --databases {} > {}",
            ctx.username, ctx.password, ctx.database, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mariadb -u {} -p'{}' < {}",
            ctx.username, ctx.password, source
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "mariadb".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        format!("-p{}", ctx.password),
        "-e".to_string(),
        format!(
            "ALTER USER '{}'@'%' IDENTIFIED BY '{}';",
            ctx.username, new_password
        ),
    ]
}
