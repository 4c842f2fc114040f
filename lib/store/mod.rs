//! The persistence store.
//!
//! A single sqlite database under the data root holds every control-plane
//! table. Schema lives in embedded migrations applied in ascending ordinal
//! order on start; `rollback` applies down-migrations in descending order.
//!
//! Lifecycle writes to a given instance are serialized by the lifecycle
//! manager's per-instance lock; sample writes are append-only and need no
//! coordination.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tokio::fs;

use crate::models::{HealthSample, HealthState, Instance, InstanceStatus, MetricsSample, Snapshot};
use crate::PodbaseResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Embedded schema migrations, applied on start.
pub static MIGRATOR: Migrator = sqlx::migrate!("lib/store/migrations");

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Fields required to insert a new instance row.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Human-readable instance name.
    pub name: String,
    /// Engine tag.
    pub engine: String,
    /// Initial logical database name.
    pub database_name: String,
    /// Name the container will be created under.
    pub container_name: String,
    /// SKU id or "custom".
    pub sku: String,
    /// Memory cap in MiB.
    pub memory_limit_mb: i64,
    /// CPU cap in vCPUs.
    pub cpu_limit: f64,
    /// Storage quota in GiB.
    pub storage_limit_gb: i64,
    /// Host address the port will be bound on.
    pub host: String,
    /// Whether the port binds the wildcard address.
    pub external_access: bool,
    /// Whether TLS material will be staged.
    pub tls_enabled: bool,
    /// Virtual network to attach, if any.
    pub vnet_name: Option<String>,
}

/// Aggregated availability numbers derived from health history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UptimeStats {
    /// Share of healthy probes over the window, 0-100.
    pub uptime_percent: f64,
    /// Probes counted in the window.
    pub total_checks: i64,
    /// Probes classified healthy.
    pub healthy_checks: i64,
    /// Probes classified unhealthy or unknown.
    pub unhealthy_checks: i64,
    /// Mean probe round trip in milliseconds.
    pub avg_response_time_ms: f64,
    /// Window the numbers cover, in hours.
    pub period_hours: i64,
}

//--------------------------------------------------------------------------------------------------
// Functions: Pool
//--------------------------------------------------------------------------------------------------

/// Opens (creating if necessary) the store at `db_path` and applies pending
/// migrations.
pub async fn init_store(db_path: impl AsRef<Path>) -> PodbaseResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let pool = connect(db_path).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Connects to an existing store without running migrations.
pub async fn get_store_pool(db_path: impl AsRef<Path>) -> PodbaseResult<Pool<Sqlite>> {
    connect(db_path.as_ref()).await
}

/// Rolls the schema back to `target` ordinal (0 drops everything), applying
/// down-migrations in descending order.
pub async fn rollback(pool: &Pool<Sqlite>, target: i64) -> PodbaseResult<()> {
    MIGRATOR.undo(pool, target).await?;
    Ok(())
}

async fn connect(db_path: &Path) -> PodbaseResult<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Functions: Instances
//--------------------------------------------------------------------------------------------------

/// Inserts a new instance row in `pending` status, returning its id.
pub async fn insert_instance(pool: &Pool<Sqlite>, new: &NewInstance) -> PodbaseResult<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO instances (
            name, engine, database_name, container_name, sku,
            memory_limit_mb, cpu_limit, storage_limit_gb,
            host, external_access, tls_enabled, vnet_name,
            status, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.name)
    .bind(&new.engine)
    .bind(&new.database_name)
    .bind(&new.container_name)
    .bind(&new.sku)
    .bind(new.memory_limit_mb)
    .bind(new.cpu_limit)
    .bind(new.storage_limit_gb)
    .bind(&new.host)
    .bind(new.external_access)
    .bind(new.tls_enabled)
    .bind(&new.vnet_name)
    .bind(InstanceStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Fetches an instance by id.
pub async fn get_instance(pool: &Pool<Sqlite>, id: i64) -> PodbaseResult<Option<Instance>> {
    let instance = sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(instance)
}

/// Lists instances, optionally filtered by engine and status, newest first.
pub async fn list_instances(
    pool: &Pool<Sqlite>,
    engine: Option<&str>,
    status: Option<InstanceStatus>,
) -> PodbaseResult<Vec<Instance>> {
    let instances = sqlx::query_as::<_, Instance>(
        r#"
        SELECT * FROM instances
        WHERE (?1 IS NULL OR engine = ?1)
          AND (?2 IS NULL OR status = ?2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(engine)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(instances)
}

/// Lists instances currently in any of the given statuses.
pub async fn list_instances_in_statuses(
    pool: &Pool<Sqlite>,
    statuses: &[InstanceStatus],
) -> PodbaseResult<Vec<Instance>> {
    let mut out = Vec::new();
    for status in statuses {
        out.extend(list_instances(pool, None, Some(*status)).await?);
    }
    Ok(out)
}

/// Whether any live row already holds `name`.
pub async fn name_in_use(pool: &Pool<Sqlite>, name: &str) -> PodbaseResult<bool> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM instances WHERE name = ? AND status != ?")
        .bind(name)
        .bind(InstanceStatus::Destroyed.as_str())
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

/// Whether any live row already holds the `(host, port)` binding.
pub async fn port_in_use(pool: &Pool<Sqlite>, port: u16) -> PodbaseResult<bool> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM instances WHERE port = ? AND status != ?")
        .bind(port as i64)
        .bind(InstanceStatus::Destroyed.as_str())
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

/// Last octets currently leased on the vnet subnet.
pub async fn used_vnet_octets(pool: &Pool<Sqlite>, subnet_base: &str) -> PodbaseResult<Vec<u8>> {
    let rows = sqlx::query("SELECT vnet_ip FROM instances WHERE vnet_ip IS NOT NULL")
        .fetch_all(pool)
        .await?;

    let prefix = format!("{subnet_base}.");
    let mut octets = Vec::new();
    for row in rows {
        let ip: String = row.get("vnet_ip");
        if let Some(last) = ip.strip_prefix(&prefix) {
            if let Ok(octet) = last.parse::<u8>() {
                octets.push(octet);
            }
        }
    }
    Ok(octets)
}

/// Updates the lifecycle status, recording (or clearing) the error message.
pub async fn update_instance_status(
    pool: &Pool<Sqlite>,
    id: i64,
    status: InstanceStatus,
    error_message: Option<&str>,
) -> PodbaseResult<()> {
    sqlx::query(
        "UPDATE instances SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records the container id assigned by the runtime.
pub async fn set_container_id(
    pool: &Pool<Sqlite>,
    id: i64,
    container_id: &str,
) -> PodbaseResult<()> {
    sqlx::query("UPDATE instances SET container_id = ?, updated_at = ? WHERE id = ?")
        .bind(container_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records the placement decided during provisioning.
#[allow(clippy::too_many_arguments)]
pub async fn set_placement(
    pool: &Pool<Sqlite>,
    id: i64,
    host: &str,
    port: u16,
    volume_path: Option<&str>,
    vnet_ip: Option<&str>,
    tls_cert_path: Option<&str>,
    tls_key_path: Option<&str>,
) -> PodbaseResult<()> {
    sqlx::query(
        r#"
        UPDATE instances
        SET host = ?, port = ?, volume_path = ?, vnet_ip = ?,
            tls_cert_path = ?, tls_key_path = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(host)
    .bind(port as i64)
    .bind(volume_path)
    .bind(vnet_ip)
    .bind(tls_cert_path)
    .bind(tls_key_path)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Overwrites the stored credentials in a single statement.
pub async fn set_credentials(
    pool: &Pool<Sqlite>,
    id: i64,
    username: &str,
    password: &str,
) -> PodbaseResult<()> {
    sqlx::query("UPDATE instances SET username = ?, password = ?, updated_at = ? WHERE id = ?")
        .bind(username)
        .bind(password)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Hard-deletes an instance row; snapshot and sample rows cascade.
pub async fn delete_instance(pool: &Pool<Sqlite>, id: i64) -> PodbaseResult<()> {
    sqlx::query("DELETE FROM instances WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Snapshots
//--------------------------------------------------------------------------------------------------

/// Inserts a snapshot row after a successful dump, returning its id.
pub async fn insert_snapshot(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    path: &str,
    size_bytes: i64,
    notes: Option<&str>,
) -> PodbaseResult<i64> {
    let result = sqlx::query(
        "INSERT INTO snapshots (instance_id, path, size_bytes, notes, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(instance_id)
    .bind(path)
    .bind(size_bytes)
    .bind(notes)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Fetches a snapshot belonging to an instance.
pub async fn get_snapshot(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    snapshot_id: i64,
) -> PodbaseResult<Option<Snapshot>> {
    let snapshot =
        sqlx::query_as::<_, Snapshot>("SELECT * FROM snapshots WHERE id = ? AND instance_id = ?")
            .bind(snapshot_id)
            .bind(instance_id)
            .fetch_optional(pool)
            .await?;
    Ok(snapshot)
}

/// Lists snapshots of an instance, newest first.
pub async fn list_snapshots(pool: &Pool<Sqlite>, instance_id: i64) -> PodbaseResult<Vec<Snapshot>> {
    let snapshots = sqlx::query_as::<_, Snapshot>(
        "SELECT * FROM snapshots WHERE instance_id = ? ORDER BY created_at DESC",
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;
    Ok(snapshots)
}

/// Lists every snapshot row in the store, for the orphan-file reconciler.
pub async fn list_all_snapshots(pool: &Pool<Sqlite>) -> PodbaseResult<Vec<Snapshot>> {
    let snapshots = sqlx::query_as::<_, Snapshot>("SELECT * FROM snapshots").fetch_all(pool).await?;
    Ok(snapshots)
}

/// Deletes a snapshot row.
pub async fn delete_snapshot(pool: &Pool<Sqlite>, snapshot_id: i64) -> PodbaseResult<()> {
    sqlx::query("DELETE FROM snapshots WHERE id = ?")
        .bind(snapshot_id)
        .execute(pool)
        .await?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Health samples
//--------------------------------------------------------------------------------------------------

/// Appends one health probe result.
pub async fn insert_health_sample(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    status: HealthState,
    response_time_ms: i64,
    details: Option<&str>,
) -> PodbaseResult<()> {
    sqlx::query(
        "INSERT INTO health_samples (instance_id, status, response_time_ms, details, checked_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(instance_id)
    .bind(status.as_str())
    .bind(response_time_ms)
    .bind(details)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent health sample for an instance, if any.
pub async fn latest_health_sample(
    pool: &Pool<Sqlite>,
    instance_id: i64,
) -> PodbaseResult<Option<HealthSample>> {
    let sample = sqlx::query_as::<_, HealthSample>(
        "SELECT * FROM health_samples WHERE instance_id = ? ORDER BY checked_at DESC, id DESC LIMIT 1",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;
    Ok(sample)
}

/// Recent health history, newest first.
pub async fn list_health_samples(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    limit: i64,
) -> PodbaseResult<Vec<HealthSample>> {
    let samples = sqlx::query_as::<_, HealthSample>(
        "SELECT * FROM health_samples WHERE instance_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?",
    )
    .bind(instance_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(samples)
}

/// Trims an instance's health history to the most recent `keep` samples,
/// returning the number deleted.
pub async fn trim_health_samples(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    keep: i64,
) -> PodbaseResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM health_samples
        WHERE instance_id = ?1
          AND id NOT IN (
            SELECT id FROM health_samples
            WHERE instance_id = ?1
            ORDER BY checked_at DESC, id DESC
            LIMIT ?2
          )
        "#,
    )
    .bind(instance_id)
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Availability aggregates over the trailing `hours`.
pub async fn uptime_stats(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    hours: i64,
) -> PodbaseResult<UptimeStats> {
    let cutoff: DateTime<Utc> = Utc::now() - Duration::hours(hours);
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_checks,
            SUM(CASE WHEN status = 'healthy' THEN 1 ELSE 0 END) AS healthy_checks,
            SUM(CASE WHEN status IN ('unhealthy', 'unknown') THEN 1 ELSE 0 END) AS unhealthy_checks,
            AVG(response_time_ms) AS avg_response_time
        FROM health_samples
        WHERE instance_id = ? AND checked_at >= ?
        "#,
    )
    .bind(instance_id)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    let total: i64 = row.get("total_checks");
    let healthy: i64 = row.get::<Option<i64>, _>("healthy_checks").unwrap_or(0);
    let unhealthy: i64 = row.get::<Option<i64>, _>("unhealthy_checks").unwrap_or(0);
    let avg: f64 = row.get::<Option<f64>, _>("avg_response_time").unwrap_or(0.0);

    Ok(UptimeStats {
        uptime_percent: if total > 0 {
            (healthy as f64 / total as f64) * 100.0
        } else {
            0.0
        },
        total_checks: total,
        healthy_checks: healthy,
        unhealthy_checks: unhealthy,
        avg_response_time_ms: avg,
        period_hours: hours,
    })
}

//--------------------------------------------------------------------------------------------------
// Functions: Metrics samples
//--------------------------------------------------------------------------------------------------

/// A metrics sample ready for insertion; engine fields stay `None` when the
/// engine did not report them.
#[derive(Debug, Clone, Default)]
pub struct NewMetricsSample {
    /// Container CPU usage percentage.
    pub cpu_percent: f64,
    /// Container memory usage in MiB.
    pub memory_used_mb: f64,
    /// Container memory limit in MiB.
    pub memory_limit_mb: f64,
    /// Container memory usage percentage.
    pub memory_percent: f64,
    /// Engine-reported connection count.
    pub connections: Option<i64>,
    /// Engine-reported active query count.
    pub active_queries: Option<i64>,
    /// Engine-reported query throughput.
    pub queries_per_sec: Option<f64>,
    /// Engine-reported cache hit ratio.
    pub cache_hit_ratio: Option<f64>,
    /// Engine-reported uptime in seconds.
    pub uptime_seconds: Option<i64>,
    /// Engine-reported storage usage in MiB.
    pub storage_used_mb: Option<f64>,
    /// Adapter-specific extras as JSON.
    pub extra: Option<String>,
}

/// Appends one metrics sample.
pub async fn insert_metrics_sample(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    sample: &NewMetricsSample,
) -> PodbaseResult<()> {
    sqlx::query(
        r#"
        INSERT INTO metrics_samples (
            instance_id, cpu_percent, memory_used_mb, memory_limit_mb, memory_percent,
            connections, active_queries, queries_per_sec, cache_hit_ratio,
            uptime_seconds, storage_used_mb, extra, collected_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(instance_id)
    .bind(sample.cpu_percent)
    .bind(sample.memory_used_mb)
    .bind(sample.memory_limit_mb)
    .bind(sample.memory_percent)
    .bind(sample.connections)
    .bind(sample.active_queries)
    .bind(sample.queries_per_sec)
    .bind(sample.cache_hit_ratio)
    .bind(sample.uptime_seconds)
    .bind(sample.storage_used_mb)
    .bind(&sample.extra)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent metrics sample for an instance, if any.
pub async fn latest_metrics_sample(
    pool: &Pool<Sqlite>,
    instance_id: i64,
) -> PodbaseResult<Option<MetricsSample>> {
    let sample = sqlx::query_as::<_, MetricsSample>(
        "SELECT * FROM metrics_samples WHERE instance_id = ? ORDER BY collected_at DESC, id DESC LIMIT 1",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;
    Ok(sample)
}

/// Recent metrics history, oldest first, capped at `limit` samples.
pub async fn list_metrics_history(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    limit: i64,
) -> PodbaseResult<Vec<MetricsSample>> {
    let mut samples = sqlx::query_as::<_, MetricsSample>(
        "SELECT * FROM metrics_samples WHERE instance_id = ? ORDER BY collected_at DESC, id DESC LIMIT ?",
    )
    .bind(instance_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    samples.reverse();
    Ok(samples)
}

/// Deletes metrics samples older than the retention window, returning the
/// number deleted.
pub async fn sweep_metrics(pool: &Pool<Sqlite>, retention_days: i64) -> PodbaseResult<u64> {
    let cutoff: DateTime<Utc> = Utc::now() - Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM metrics_samples WHERE collected_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
