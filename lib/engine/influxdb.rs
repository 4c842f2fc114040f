//! InfluxDB 2.7 adapter.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for InfluxDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "influxdb",
    display_name: "InfluxDB 2.7",
    description: "Purpose-built time-series database",
    category: EngineCategory::TimeSeries,
    image: "docker.io/library/influxdb:2.7",
    default_port: 8086,
    data_mount: "/var/lib/influxdb2",
    config_mount: None,
    dump_extension: ".tar.gz",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        // Buckets and token-based users.
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &[],
    read_only_rootfs: false,
    min_memory_mb: 512,
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

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    vec![
        ("DOCKER_INFLUXDB_INIT_MODE".to_string(), "setup".to_string()),
        (
            "DOCKER_INFLUXDB_INIT_USERNAME".to_string(),
            ctx.username.to_string(),
        ),
        (
            "DOCKER_INFLUXDB_INIT_PASSWORD".to_string(),
            ctx.password.to_string(),
        ),
        ("DOCKER_INFLUXDB_INIT_ORG".to_string(), "podbase".to_string()),
        (
            "DOCKER_INFLUXDB_INIT_BUCKET".to_string(),
            if ctx.database.is_empty() {
                "default".to_string()
            } else {
                ctx.database.to_string()
            },
        ),
    ]
}

fn connection_string(host: &str, port: u16, _: &InstanceCtx) -> String {
    format!("http://{host}:{port}")
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    vec!["influx".to_string(), "ping".to_string()]
}

fn metrics_cmd(_: &InstanceCtx) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:8086/metrics".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    // Prometheus exposition format; pull out the handful of gauges we track.
    let mut metrics = EngineMetrics::default();
    for line in stdout.lines() {
        if line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match name {
            "influxdb_uptime_seconds" => {
                metrics.uptime_seconds = value.parse::<f64>().ok().map(|v| v as i64);
            }
            "http_api_requests_total" => {
                metrics.total_transactions = value.parse::<f64>().ok().map(|v| v as i64);
            }
            "influxdb_buckets_total" => {
                if let Ok(buckets) = value.parse::<f64>() {
                    metrics
                        .extra
                        .insert("buckets_total".to_string(), (buckets as i64).into());
                }
            }
            _ => {}
        }
    }
    metrics
}

fn snapshot_cmd(_: &InstanceCtx, dest: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "rm -rf /tmp/podbase_backup && influx backup /tmp/podbase_backup \
             && tar -czf {dest} -C /tmp podbase_backup"
        ),
    ]
}

fn restore_cmd(_: &InstanceCtx, source: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "rm -rf /tmp/podbase_backup && tar -xzf {source} -C /tmp \
             && influx restore /tmp/podbase_backup --full"
        ),
    ]
}
