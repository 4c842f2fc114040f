//! CockroachDB adapter.
//!
//! Runs a single node in insecure mode; the instance is reachable only
//! through the control plane's port binding, which defaults to loopback.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for CockroachDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "cockroachdb",
    display_name: "CockroachDB",
    description: "Distributed SQL database with a PostgreSQL wire protocol",
    category: EngineCategory::Relational,
    image: "docker.io/cockroachdb/cockroach:latest",
    default_port: 26257,
    data_mount: "/cockroach/cockroach-data",
    config_mount: None,
    dump_extension: ".sql",
    password_charset: Charset::WithSymbols,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: true,
    min_memory_mb: 512,
    readiness_timeout_s: 120,
    container_env: super::no_env,
    container_args: args,
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

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn args(_: &InstanceCtx) -> Vec<String> {
    vec![
        "start-single-node".to_string(),
        "--insecure".to_string(),
        "--advertise-addr=localhost".to_string(),
    ]
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!(
        "postgresql://{}@{}:{}/{}?sslmode=disable",
        ctx.username, host, port, ctx.database
    )
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "cockroach".to_string(),
        "sql".to_string(),
        "--insecure".to_string(),
        "--execute".to_string(),
        "SELECT 1".to_string(),
    ]
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "cockroach".to_string(),
        "sql".to_string(),
        "--insecure".to_string(),
        "--format=csv".to_string(),
        "--execute".to_string(),
        "SELECT (SELECT value FROM crdb_internal.node_metrics WHERE name = 'sql.conns'), \
         (SELECT value FROM crdb_internal.node_metrics WHERE name = 'sql.query.count');"
            .to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    // CSV with a header row; the data row has two numeric columns.
    let Some(row) = stdout.lines().nth(1) else {
        return EngineMetrics::default();
    };
    let values: Vec<f64> = row
        .split(',')
        .filter_map(|field| field.trim().parse().ok())
        .collect();
    if values.len() < 2 {
        return EngineMetrics::default();
    }
    EngineMetrics {
        connections: Some(values[0] as i64),
        total_transactions: Some(values[1] as i64),
        ..Default::default()
    }
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cockroach sql --insecure --execute \"BACKUP DATABASE {} INTO 'nodelocal://1/podbase';\" \
             && tar -czf {} -C /cockroach/cockroach-data/extern podbase",
            ctx.database, dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "tar -xzf {} -C /cockroach/cockroach-data/extern \
             && cockroach sql --insecure --execute \"DROP DATABASE IF EXISTS {} CASCADE; \
             RESTORE DATABASE {} FROM LATEST IN 'nodelocal://1/podbase';\"",
            source, ctx.database, ctx.database
        ),
    ]
}
