//! Oracle XE 21c adapter.

use crate::credentials::Charset;

use super::{
    EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, ProbeReport, Supports,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Oracle XE.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "oracle",
    display_name: "Oracle XE 21c",
    description: "Oracle Database Express Edition",
    category: EngineCategory::Relational,
    image: "container-registry.oracle.com/database/express:21.3.0-xe",
    default_port: 1521,
    data_mount: "/opt/oracle/oradata",
    config_mount: None,
    dump_extension: ".dmp",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN", "DAC_OVERRIDE"],
    read_only_rootfs: false,
    min_memory_mb: 2048,
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

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    vec![("ORACLE_PWD".to_string(), ctx.password.to_string())]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("oracle://{}:{}@{}:{}/XE", ctx.username, ctx.password, host, port)
}

fn health_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "echo 'SELECT 1 FROM DUAL;' | sqlplus -s sys/{}@localhost:1521/XE as sysdba",
            ctx.password
        ),
    ]
}

fn parse_health(exit_code: i64, stdout: &str, stderr: &str) -> ProbeReport {
    // sqlplus exits 0 even on ORA- errors; check the output too.
    if exit_code == 0 && !stdout.contains("ORA-") && !stderr.contains("ORA-") {
        ProbeReport {
            healthy: true,
            message: "accepting SQL".to_string(),
            details: None,
        }
    } else {
        ProbeReport {
            healthy: false,
            message: format!("sqlplus probe failed: {}", stderr.trim()),
            details: None,
        }
    }
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "echo \"SELECT (SELECT COUNT(*) FROM v\\$session) || ' ' || \
             (SELECT value FROM v\\$sysstat WHERE name = 'user commits') FROM DUAL;\" \
             | sqlplus -s sys/{}@localhost:1521/XE as sysdba",
            ctx.password
        ),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let numbers: Vec<i64> = stdout
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect();
    if numbers.len() < 2 {
        return EngineMetrics::default();
    }
    EngineMetrics {
        connections: Some(numbers[0]),
        total_transactions: Some(numbers[1]),
        ..Default::default()
    }
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "expdp sys/{}@XE full=Y directory=DATA_PUMP_DIR dumpfile=podbase.dmp reuse_dumpfiles=Y \
             && cp /opt/oracle/admin/XE/dpdump/podbase.dmp {}",
            ctx.password, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cp {} /opt/oracle/admin/XE/dpdump/podbase.dmp \
             && impdp sys/{}@XE full=Y directory=DATA_PUMP_DIR dumpfile=podbase.dmp table_exists_action=replace",
            source, ctx.password
        ),
    ]
}
