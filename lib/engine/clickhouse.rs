//! ClickHouse adapter.

use crate::credentials::Charset;

use super::{
    first_json_value, EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport,
    Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for ClickHouse.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "clickhouse",
    display_name: "ClickHouse",
    description: "Column-oriented OLAP database for real-time analytics",
    category: EngineCategory::Analytical,
    image: "docker.io/clickhouse/clickhouse-server:latest",
    default_port: 8123,
    data_mount: "/var/lib/clickhouse",
    config_mount: None,
    dump_extension: ".tar",
    password_charset: Charset::WithSymbols,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
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

const METRICS_QUERY: &str = "SELECT \
    (SELECT count() FROM system.processes) AS active_queries, \
    (SELECT uptime()) AS uptime_seconds, \
    (SELECT count() FROM system.databases) AS database_count \
    FORMAT JSON";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![
        ("CLICKHOUSE_USER".to_string(), ctx.username.to_string()),
        ("CLICKHOUSE_PASSWORD".to_string(), ctx.password.to_string()),
        (
            "CLICKHOUSE_DEFAULT_ACCESS_MANAGEMENT".to_string(),
            "1".to_string(),
        ),
    ];
    if !ctx.database.is_empty() {
        env.push(("CLICKHOUSE_DB".to_string(), ctx.database.to_string()));
    }
    env
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "clickhouse://{}:{}@{}:{}/{}",
        ctx.username, ctx.password, host, port, ctx.database
    )
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "clickhouse-client".to_string(),
        "--user".to_string(),
        ctx.username.to_string(),
        "--password".to_string(),
        ctx.password.to_string(),
        "--query".to_string(),
        "SELECT 1".to_string(),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    if exit_code == 0 && stdout.trim() == "1" {
        ProbeReport {
            healthy: true,
            message: "responding to queries".to_string(),
            details: None,
        }
    } else if exit_code != 0 {
        ProbeReport {
            healthy: false,
            message: format!("probe exited {exit_code}: {}", stderr.trim()),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("unexpected response: {}", stdout.trim()),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "clickhouse-client".to_string(),
        "--user".to_string(),
        ctx.username.to_string(),
        "--password".to_string(),
        ctx.password.to_string(),
        "--query".to_string(),
        METRICS_QUERY.to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let Some(data) = first_json_value(stdout) else {
        return EngineMetrics::default();
    };
    let Some(row) = data["data"][0].as_object().map(|r| r.clone()) else {
        return EngineMetrics::default();
    };
    let as_i64 = |key: &str| -> Option<i64> {
        row.get(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    };
    let mut metrics = EngineMetrics {
        active_queries: as_i64("active_queries"),
        uptime_seconds: as_i64("uptime_seconds"),
        ..Default::default()
    };
    if let Some(databases) = as_i64("database_count") {
        metrics
            .extra
            .insert("database_count".to_string(), databases.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "rm -rf /var/lib/clickhouse/backup_podbase && \
             clickhouse-client --user {u} --password '{p}' \
             --query \"BACKUP DATABASE {db} TO Disk('backups', 'backup_podbase')\" && \
             tar -cf {dest} -C /var/lib/clickhouse/backups backup_podbase",
            u = ctx.username,
            p = ctx.password,
            db = ctx.database,
            dest = dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "tar -xf {source} -C /var/lib/clickhouse/backups && \
             clickhouse-client --user {u} --password '{p}' \
             --query \"RESTORE DATABASE {db} FROM Disk('backups', 'backup_podbase') \
             SETTINGS allow_non_empty_tables=true\"",
            u = ctx.username,
            p = ctx.password,
            db = ctx.database,
            source = source
        ),
    ]
}
