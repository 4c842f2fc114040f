use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use podbase::config::PodbaseConfig;
use podbase::lifecycle::{CreateInstanceSpec, LifecycleManager};
use podbase::models::InstanceStatus;
use podbase::orchestrator::Orchestrator;
use podbase::store;
use podbase::vnet::VnetAllocator;
use podbase::PodbaseError;
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

async fn test_manager() -> anyhow::Result<(TempDir, Arc<LifecycleManager>)> {
    let temp = tempfile::tempdir()?;
    let config = PodbaseConfig::builder()
        .data_root(PathBuf::from(temp.path()))
        .build();
    config.ensure_layout().await?;

    let pool = store::init_store(config.store_path()).await?;
    let vnet = Arc::new(VnetAllocator::new("podbase0", "10.89.0", vec![]));
    let manager = LifecycleManager::new(
        pool,
        config,
        // A bogus runtime binary: containerized paths fail fast, which the
        // embedded and validation tests never reach.
        Orchestrator::new("podman-does-not-exist"),
        vnet,
    );
    Ok((temp, manager))
}

fn spec(engine: &str, name: &str) -> CreateInstanceSpec {
    CreateInstanceSpec {
        engine: engine.to_string(),
        name: Some(name.to_string()),
        database_name: "app".to_string(),
        sku: "b1".to_string(),
        memory_limit_mb: None,
        cpu_limit: None,
        storage_limit_gb: None,
        external_access: false,
        tls_enabled: false,
        tls_cert: None,
        tls_key: None,
        vnet_name: None,
    }
}

async fn wait_for_status(
    manager: &Arc<LifecycleManager>,
    id: i64,
    wanted: InstanceStatus,
) -> anyhow::Result<()> {
    for _ in 0..400 {
        let instance = store::get_instance(manager.pool(), id).await?;
        if let Some(instance) = instance {
            if instance.status == wanted {
                return Ok(());
            }
            if instance.status == InstanceStatus::Failed && wanted != InstanceStatus::Failed {
                anyhow::bail!("instance failed: {:?}", instance.error_message);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("timed out waiting for {wanted}");
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_create_rejects_unknown_engine() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;
    let result = manager.create(spec("sybase", "nope")).await;
    assert!(matches!(result, Err(PodbaseError::EngineUnknown(_))));
    // Validation failures leave no row behind.
    assert!(store::list_instances(manager.pool(), None, None).await?.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_create_rejects_bad_names_and_skus() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let result = manager.create(spec("duckdb", "has space")).await;
    assert!(matches!(result, Err(PodbaseError::Validation(_))));

    let mut bad_sku = spec("duckdb", "fine");
    bad_sku.sku = "z9".to_string();
    assert!(matches!(
        manager.create(bad_sku).await,
        Err(PodbaseError::SkuUnknown(_))
    ));

    let mut custom = spec("duckdb", "fine");
    custom.sku = "custom".to_string();
    custom.memory_limit_mb = Some(512);
    // Missing cpu and storage overrides.
    assert!(matches!(
        manager.create(custom).await,
        Err(PodbaseError::Validation(_))
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_create_rejects_tls_without_material() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;
    let mut request = spec("duckdb", "tlsless");
    request.tls_enabled = true;
    assert!(matches!(
        manager.create(request).await,
        Err(PodbaseError::Validation(_))
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_duplicate_name_is_a_collision() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let first = manager.create(spec("duckdb", "shared")).await?;
    wait_for_status(&manager, first.id, InstanceStatus::Running).await?;

    let result = manager.create(spec("duckdb", "shared")).await;
    assert!(matches!(result, Err(PodbaseError::NameInUse(_))));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_embedded_instance_reaches_running() -> anyhow::Result<()> {
    let (temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "warehouse")).await?;
    assert!(matches!(
        instance.status,
        InstanceStatus::Pending | InstanceStatus::Creating
    ));
    assert!(!instance.username.is_empty());
    assert!(!instance.password.is_empty());

    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;

    let running = store::get_instance(manager.pool(), instance.id).await?.unwrap();
    assert!(running.volume_path.is_some());
    assert!(temp
        .path()
        .join("volumes")
        .join(instance.id.to_string())
        .join("data")
        .is_dir());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_running_instance_rejects_start() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "nostart")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;

    let result = manager.start(instance.id).await;
    assert!(matches!(
        result,
        Err(PodbaseError::InvalidTransition { .. })
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_embedded_stop_start_cycle() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "cycle")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;

    let stopped = manager.stop(instance.id).await?;
    assert_eq!(stopped.status, InstanceStatus::Stopped);

    let started = manager.start(instance.id).await?;
    assert_eq!(started.status, InstanceStatus::Running);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_destroy_is_idempotent() -> anyhow::Result<()> {
    let (temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "doomed")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;
    let volume = temp.path().join("volumes").join(instance.id.to_string());
    assert!(volume.exists());

    manager.destroy(instance.id).await?;
    assert!(store::get_instance(manager.pool(), instance.id).await?.is_none());
    assert!(!volume.exists());

    // Destroying again, and destroying an id that never existed, succeed.
    manager.destroy(instance.id).await?;
    manager.destroy(99999).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_destroyed_name_is_reusable() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let first = manager.create(spec("duckdb", "recycled")).await?;
    wait_for_status(&manager, first.id, InstanceStatus::Running).await?;
    manager.destroy(first.id).await?;

    let second = manager.create(spec("duckdb", "recycled")).await?;
    assert_ne!(first.id, second.id);
    wait_for_status(&manager, second.id, InstanceStatus::Running).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_reconcile_twice_is_a_noop() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "steady")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;

    manager.reconcile().await?;
    let after_first = store::get_instance(manager.pool(), instance.id).await?.unwrap();
    manager.reconcile().await?;
    let after_second = store::get_instance(manager.pool(), instance.id).await?.unwrap();

    assert_eq!(after_first.status, after_second.status);
    assert_eq!(after_first.updated_at, after_second.updated_at);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_reconcile_fails_embedded_instance_with_missing_volume() -> anyhow::Result<()> {
    let (temp, manager) = test_manager().await?;

    let instance = manager.create(spec("duckdb", "vanished")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Running).await?;

    // Simulate volume loss across a crash.
    tokio::fs::remove_dir_all(temp.path().join("volumes").join(instance.id.to_string())).await?;
    manager.reconcile().await?;

    let after = store::get_instance(manager.pool(), instance.id).await?.unwrap();
    assert_eq!(after.status, InstanceStatus::Failed);
    assert!(after.error_message.unwrap().contains("volume missing"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_containerized_create_without_runtime_fails_cleanly() -> anyhow::Result<()> {
    let (_temp, manager) = test_manager().await?;

    // The runtime binary does not exist, so provisioning must surface a
    // failure on the row rather than hanging or panicking.
    let instance = manager.create(spec("redis", "no-runtime")).await?;
    wait_for_status(&manager, instance.id, InstanceStatus::Failed).await?;

    let failed = store::get_instance(manager.pool(), instance.id).await?.unwrap();
    assert!(failed.error_message.is_some());
    Ok(())
}
