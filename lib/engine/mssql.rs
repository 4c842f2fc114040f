//! SQL Server 2022 adapter.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for SQL Server.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "mssql",
    display_name: "SQL Server 2022",
    description: "Microsoft's relational database, Linux container edition",
    category: EngineCategory::Relational,
    image: "mcr.microsoft.com/mssql/server:2022-latest",
    default_port: 1433,
    data_mount: "/var/opt/mssql/data",
    config_mount: None,
    dump_extension: ".bak",
    // SA password must satisfy SQL Server complexity rules.
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
    min_memory_mb: 2048,
    readiness_timeout_s: 120,
    container_env: env,
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

const SQLCMD: &str = "/opt/mssql-tools18/bin/sqlcmd";

const METRICS_QUERY: &str = "SET NOCOUNT ON; \
    SELECT (SELECT COUNT(*) FROM sys.dm_exec_connections), \
           (SELECT COUNT(*) FROM sys.dm_exec_requests WHERE status = 'running'), \
           (SELECT DATEDIFF(SECOND, sqlserver_start_time, GETDATE()) FROM sys.dm_os_sys_info);";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    vec![
        ("ACCEPT_EULA".to_string(), "Y".to_string()),
        ("MSSQL_SA_PASSWORD".to_string(), ctx.password.to_string()),
    ]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "mssql://sa:{}@{}:{}/{}",
        ctx.password, host, port, ctx.database
    )
}

fn sqlcmd_base(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        SQLCMD.to_string(),
        "-S".to_string(),
        "localhost".to_string(),
        "-U".to_string(),
        "sa".to_string(),
        "-P".to_string(),
        ctx.password.to_string(),
        "-C".to_string(),
    ]
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    let mut cmd = sqlcmd_base(ctx);
    cmd.extend(["-Q".to_string(), "SELECT 1".to_string()]);
    cmd
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    let mut cmd = sqlcmd_base(ctx);
    cmd.extend([
        "-Q".to_string(),
        METRICS_QUERY.to_string(),
        "-h".to_string(),
        "-1".to_string(),
        "-W".to_string(),
    ]);
    cmd
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    // One whitespace-separated row: connections, running requests, uptime.
    let numbers: Vec<i64> = stdout
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect();
    if numbers.len() < 3 {
        return EngineMetrics::default();
    }
    EngineMetrics {
        connections: Some(numbers[0]),
        active_queries: Some(numbers[1]),
        uptime_seconds: Some(numbers[2]),
        ..Default::default()
    }
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    let mut cmd = sqlcmd_base(ctx);
    cmd.extend([
        "-Q".to_string(),
        format!(
            "BACKUP DATABASE [{}] TO DISK = N'{}' WITH FORMAT, INIT, COMPRESSION;",
            ctx.database, dest
        ),
    ]);
    cmd
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    let mut cmd = sqlcmd_base(ctx);
    cmd.extend([
        "-Q".to_string(),
        format!(
            "RESTORE DATABASE [{}] FROM DISK = N'{}' WITH REPLACE;",
            ctx.database, source
        ),
    ]);
    cmd
}
