use podbase::models::{HealthState, InstanceStatus};
use podbase::store::{self, NewInstance, NewMetricsSample};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

async fn test_store() -> anyhow::Result<(TempDir, Pool<Sqlite>)> {
    let temp = tempfile::tempdir()?;
    let pool = store::init_store(temp.path().join("instances.db")).await?;
    Ok((temp, pool))
}

fn sample_instance(name: &str) -> NewInstance {
    NewInstance {
        name: name.to_string(),
        engine: "postgresql".to_string(),
        database_name: "app".to_string(),
        container_name: format!("db_postgresql_{name}_20260801000000"),
        sku: "d2".to_string(),
        memory_limit_mb: 4096,
        cpu_limit: 2.0,
        storage_limit_gb: 50,
        host: "127.0.0.1".to_string(),
        external_access: false,
        tls_enabled: false,
        vnet_name: None,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_insert_and_fetch_instance() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    let id = store::insert_instance(&pool, &sample_instance("app-prod")).await?;
    let instance = store::get_instance(&pool, id).await?.unwrap();

    assert_eq!(instance.name, "app-prod");
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.memory_limit_mb, 4096);
    assert!(instance.container_id.is_none());
    assert!(store::get_instance(&pool, id + 100).await?.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_migrations_are_idempotent() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let db_path = temp.path().join("instances.db");
    store::init_store(&db_path).await?;
    // Second init re-runs the migrator against an up-to-date schema.
    let pool = store::init_store(&db_path).await?;
    store::insert_instance(&pool, &sample_instance("twice")).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_name_uniqueness_among_live_rows() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    let id = store::insert_instance(&pool, &sample_instance("shared")).await?;
    assert!(store::name_in_use(&pool, "shared").await?);
    assert!(!store::name_in_use(&pool, "other").await?);

    store::delete_instance(&pool, id).await?;
    assert!(!store::name_in_use(&pool, "shared").await?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_port_uniqueness_among_live_rows() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    let id = store::insert_instance(&pool, &sample_instance("porty")).await?;
    store::set_placement(&pool, id, "127.0.0.1", 10432, None, None, None, None).await?;

    assert!(store::port_in_use(&pool, 10432).await?);
    assert!(!store::port_in_use(&pool, 10433).await?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_status_updates_record_and_clear_errors() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("flaky")).await?;

    store::update_instance_status(&pool, id, InstanceStatus::Failed, Some("image pull failed"))
        .await?;
    let instance = store::get_instance(&pool, id).await?.unwrap();
    assert_eq!(instance.status, InstanceStatus::Failed);
    assert_eq!(instance.error_message.as_deref(), Some("image pull failed"));

    store::update_instance_status(&pool, id, InstanceStatus::Starting, None).await?;
    let instance = store::get_instance(&pool, id).await?.unwrap();
    assert!(instance.error_message.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_list_filters_by_engine_and_status() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    let pg = store::insert_instance(&pool, &sample_instance("pg1")).await?;
    let mut redis = sample_instance("redis1");
    redis.engine = "redis".to_string();
    store::insert_instance(&pool, &redis).await?;
    store::update_instance_status(&pool, pg, InstanceStatus::Running, None).await?;

    let all = store::list_instances(&pool, None, None).await?;
    assert_eq!(all.len(), 2);

    let only_pg = store::list_instances(&pool, Some("postgresql"), None).await?;
    assert_eq!(only_pg.len(), 1);
    assert_eq!(only_pg[0].name, "pg1");

    let running =
        store::list_instances(&pool, None, Some(InstanceStatus::Running)).await?;
    assert_eq!(running.len(), 1);

    let running_redis =
        store::list_instances(&pool, Some("redis"), Some(InstanceStatus::Running)).await?;
    assert!(running_redis.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_snapshot_rows_cascade_on_instance_delete() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("snappy")).await?;

    let snapshot_id =
        store::insert_snapshot(&pool, id, "/srv/snapshots/1/a.dump", 2048, Some("nightly")).await?;
    assert!(store::get_snapshot(&pool, id, snapshot_id).await?.is_some());

    store::delete_instance(&pool, id).await?;
    assert!(store::get_snapshot(&pool, id, snapshot_id).await?.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_health_history_trim_keeps_newest() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("healthy")).await?;

    for i in 0..20 {
        let state = if i % 2 == 0 {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };
        store::insert_health_sample(&pool, id, state, i, None).await?;
    }

    let deleted = store::trim_health_samples(&pool, id, 5).await?;
    assert_eq!(deleted, 15);

    let remaining = store::list_health_samples(&pool, id, 100).await?;
    assert_eq!(remaining.len(), 5);
    // Newest-first ordering; the latest sample had response time 19.
    assert_eq!(remaining[0].response_time_ms, 19);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_uptime_stats_over_window() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("uptime")).await?;

    for _ in 0..3 {
        store::insert_health_sample(&pool, id, HealthState::Healthy, 10, None).await?;
    }
    store::insert_health_sample(&pool, id, HealthState::Unhealthy, 0, None).await?;

    let stats = store::uptime_stats(&pool, id, 24).await?;
    assert_eq!(stats.total_checks, 4);
    assert_eq!(stats.healthy_checks, 3);
    assert_eq!(stats.unhealthy_checks, 1);
    assert!((stats.uptime_percent - 75.0).abs() < 1e-9);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_metrics_samples_preserve_nulls() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("metrics")).await?;

    let sample = NewMetricsSample {
        cpu_percent: 12.5,
        memory_used_mb: 256.0,
        memory_limit_mb: 4096.0,
        memory_percent: 6.25,
        connections: Some(4),
        // The engine reported nothing for the rest.
        ..Default::default()
    };
    store::insert_metrics_sample(&pool, id, &sample).await?;

    let latest = store::latest_metrics_sample(&pool, id).await?.unwrap();
    assert_eq!(latest.connections, Some(4));
    assert!(latest.cache_hit_ratio.is_none());
    assert!(latest.uptime_seconds.is_none());
    assert!(latest.queries_per_sec.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_metrics_history_is_oldest_first_and_bounded() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("history")).await?;

    for i in 0..10 {
        let sample = NewMetricsSample {
            cpu_percent: i as f64,
            ..Default::default()
        };
        store::insert_metrics_sample(&pool, id, &sample).await?;
    }

    let history = store::list_metrics_history(&pool, id, 4).await?;
    assert_eq!(history.len(), 4);
    assert!(history.first().unwrap().cpu_percent < history.last().unwrap().cpu_percent);
    assert_eq!(history.last().unwrap().cpu_percent, 9.0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_metrics_sweep_honors_retention() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;
    let id = store::insert_instance(&pool, &sample_instance("sweep")).await?;

    store::insert_metrics_sample(&pool, id, &NewMetricsSample::default()).await?;
    // Everything is fresh, so a 30-day sweep removes nothing.
    assert_eq!(store::sweep_metrics(&pool, 30).await?, 0);
    // A zero-day window removes everything older than "now".
    assert_eq!(store::sweep_metrics(&pool, 0).await?, 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_rollback_drops_tables_in_reverse_order() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    // Rolling back to ordinal 1 leaves only the instances table.
    store::rollback(&pool, 1).await?;
    let id = store::insert_instance(&pool, &sample_instance("rolled")).await?;
    assert!(store::get_instance(&pool, id).await?.is_some());
    assert!(
        store::insert_snapshot(&pool, id, "/x", 1, None).await.is_err(),
        "snapshots table should be gone"
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_vnet_octets_derived_from_rows() -> anyhow::Result<()> {
    let (_temp, pool) = test_store().await?;

    let a = store::insert_instance(&pool, &sample_instance("vnet-a")).await?;
    let b = store::insert_instance(&pool, &sample_instance("vnet-b")).await?;
    store::set_placement(&pool, a, "127.0.0.1", 0, None, Some("10.89.0.2"), None, None).await?;
    store::set_placement(&pool, b, "127.0.0.1", 0, None, Some("10.89.0.7"), None, None).await?;

    let mut octets = store::used_vnet_octets(&pool, "10.89.0").await?;
    octets.sort_unstable();
    assert_eq!(octets, vec![2, 7]);

    // A different subnet yields nothing.
    assert!(store::used_vnet_octets(&pool, "10.90.0").await?.is_empty());
    Ok(())
}
