//! MySQL 8.0 adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports, TLS_CERT_MOUNT, TLS_KEY_MOUNT,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for MySQL.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "mysql",
    display_name: "MySQL 8.0",
    description: "The most popular open-source relational database",
    category: EngineCategory::Relational,
    image: "docker.io/library/mysql:8.0",
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

const METRICS_QUERY: &str = r#"SELECT JSON_OBJECT(
    'connections', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Threads_connected'),
    'active_queries', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Threads_running'),
    'total_transactions', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Questions'),
    'uptime_seconds', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Uptime'),
    'slow_queries', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Slow_queries'),
    'innodb_buffer_pool_reads', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Innodb_buffer_pool_reads'),
    'innodb_buffer_pool_read_requests', (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Innodb_buffer_pool_read_requests')
);"#;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![(
        "MYSQL_ROOT_PASSWORD".to_string(),
        ctx.password.to_string(),
    )];
    if ctx.username != "root" {
        env.push(("MYSQL_USER".to_string(), ctx.username.to_string()));
        env.push(("MYSQL_PASSWORD".to_string(), ctx.password.to_string()));
    }
    if !ctx.database.is_empty() {
        env.push(("MYSQL_DATABASE".to_string(), ctx.database.to_string()));
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
        "[mysqld]\n\
         innodb_buffer_pool_size = {buffer_pool}M\n\
         max_connections = 151\n\
         slow_query_log = 1\n\
         long_query_time = 1\n"
    )
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "mysql://{}:{}@{}:{}/{}",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "mysqladmin".to_string(),
        "ping".to_string(),
        "-h".to_string(),
        "localhost".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        format!("-p{}", ctx.password),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && stdout.contains("mysqld is alive") {
        ProbeReport {
            healthy: true,
            message: "server is responding to ping".to_string(),
            details: None,
        }
    } else if stderr.contains("Can't connect") {
        ProbeReport {
            healthy: false,
            message: "server is not accepting connections".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("unexpected probe response: {stdout} {stderr}"),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "mysql".to_string(),
        "-h".to_string(),
        "localhost".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        format!("-p{}", ctx.password),
        "-N".to_string(),
        "-e".to_string(),
        METRICS_QUERY.to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    // performance_schema reports everything as strings.
    let as_i64 = |key: &str| -> Option<i64> {
        data[key]
            .as_i64()
            .or_else(|| data[key].as_str().and_then(|s| s.parse().ok()))
    };

    let reads = as_i64("innodb_buffer_pool_reads").unwrap_or(0);
    let requests = as_i64("innodb_buffer_pool_read_requests").unwrap_or(0);
    let cache_hit_ratio = if requests > 0 {
        Some(((requests - reads) as f64 / requests as f64) * 100.0)
    } else {
        None
    };

    let mut metrics = EngineMetrics {
        connections: as_i64("connections"),
        active_queries: as_i64("active_queries"),
        total_transactions: as_i64("total_transactions"),
        uptime_seconds: as_i64("uptime_seconds"),
        cache_hit_ratio,
        ..Default::default()
    };
    if let Some(slow) = as_i64("slow_queries") {
        metrics.extra.insert("slow_queries".to_string(), slow.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mysqldump --single-transaction --routines --triggers --events -u {} -p'{}' --databases {} > {}",
            ctx.username, ctx.password, ctx.database, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mysql -u {} -p'{}' < {}",
            ctx.username, ctx.password, source
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "mysql".to_string(),
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
