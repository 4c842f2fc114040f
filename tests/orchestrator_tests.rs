use std::time::Duration;

use podbase::orchestrator::{CreateOptions, Mount, Orchestrator};
use podbase::sku::SkuSeries;
use podbase::PodbaseError;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_missing_runtime_is_reported_as_unavailable() {
    let orchestrator = Orchestrator::new("podman-does-not-exist");
    let result = orchestrator.runtime_version().await;
    assert!(matches!(result, Err(PodbaseError::RuntimeUnavailable(_))));

    let result = orchestrator
        .pull("docker.io/library/alpine:latest", Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(PodbaseError::RuntimeUnavailable(_))));
}

#[test]
fn test_full_create_invocation_shape() {
    let options = CreateOptions::builder()
        .name("db_mysql_app_20260801".to_string())
        .image("docker.io/library/mysql:8.0".to_string())
        .instance_id(3)
        .engine("mysql".to_string())
        .env(vec![("MYSQL_ROOT_PASSWORD".to_string(), "secret".to_string())])
        .mounts(vec![Mount {
            host_path: "/srv/podbase/volumes/3/data".to_string(),
            container_path: "/var/lib/mysql".to_string(),
            read_only: false,
        }])
        .cap_add(vec!["CHOWN".to_string()])
        .memory_mb(2048)
        .cpus(1.0)
        .scheduling(SkuSeries::Burstable.scheduling_hints())
        .host_ip("0.0.0.0".to_string())
        .host_port(13306)
        .container_port(3306)
        .build();

    let args = options.to_args();
    assert_eq!(args[0], "run");
    assert_eq!(args[1], "-d");
    assert!(args.contains(&"--cpu-shares=512".to_string()));
    assert!(args.contains(&"0.0.0.0:13306:3306".to_string()));
    assert!(args.contains(&"MYSQL_ROOT_PASSWORD=secret".to_string()));
    assert!(args
        .iter()
        .any(|a| a == "/srv/podbase/volumes/3/data:/var/lib/mysql:Z"));

    // cap-add comes after the unconditional drop-all.
    let drop_pos = args.iter().position(|a| a == "--cap-drop=all").unwrap();
    let add_pos = args.iter().position(|a| a == "CHOWN").unwrap();
    assert!(drop_pos < add_pos);

    // The image is the last thing before any command override.
    assert_eq!(args.last().unwrap(), "docker.io/library/mysql:8.0");
}

//--------------------------------------------------------------------------------------------------
// Tests: runtime-dependent
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
#[ignore = "requires podman"]
async fn test_runtime_roundtrip_against_podman() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new("podman");
    let version = orchestrator.runtime_version().await?;
    assert!(version.contains("podman"));

    // The default vnet can be created and detected.
    orchestrator.network_create("podbase-test", "10.89.7").await?;
    assert!(orchestrator.network_exists("podbase-test").await?);
    Ok(())
}
