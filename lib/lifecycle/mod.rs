//! The instance lifecycle manager.
//!
//! Sole owner of every `status` transition. Provisioning and teardown run
//! as background tasks; at most one lifecycle operation per instance runs
//! at a time, serialized by a per-instance lock. On process start the
//! reconciler brings persisted state back into agreement with the runtime.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sqlx::{Pool, Sqlite};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::config::{
    PodbaseConfig, DEFAULT_CREATE_TIMEOUT_S, DEFAULT_EXEC_TIMEOUT_S, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_STOP_TIMEOUT_S, WILDCARD_HOST_IP,
};
use crate::credentials;
use crate::engine::{self, EngineAdapter, InstanceCtx};
use crate::models::{Instance, InstanceStatus};
use crate::orchestrator::{CreateOptions, Mount, Orchestrator};
use crate::sku::{self, SchedulingHints, CUSTOM_SKU_ID};
use crate::store;
use crate::utils::is_valid_instance_name;
use crate::vnet::VnetAllocator;
use crate::volume;
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A validated request to provision a new instance.
#[derive(Debug, Clone)]
pub struct CreateInstanceSpec {
    /// Engine tag.
    pub engine: String,
    /// Instance name; generated from the engine tag when absent.
    pub name: Option<String>,
    /// Initial logical database name.
    pub database_name: String,
    /// SKU id, or "custom".
    pub sku: String,
    /// Memory override for custom SKUs, MiB.
    pub memory_limit_mb: Option<i64>,
    /// CPU override for custom SKUs, vCPUs.
    pub cpu_limit: Option<f64>,
    /// Storage override for custom SKUs, GiB.
    pub storage_limit_gb: Option<i64>,
    /// Bind the wildcard address instead of loopback.
    pub external_access: bool,
    /// Enable TLS; requires both PEM blobs.
    pub tls_enabled: bool,
    /// PEM certificate bytes.
    pub tls_cert: Option<Vec<u8>>,
    /// PEM private key bytes.
    pub tls_key: Option<Vec<u8>>,
    /// Attach to the named virtual network instead of port mapping.
    pub vnet_name: Option<String>,
}

/// Drives every instance through its state machine.
pub struct LifecycleManager {
    pool: Pool<Sqlite>,
    config: PodbaseConfig,
    orchestrator: Orchestrator,
    vnet: Arc<VnetAllocator>,

    /// Per-instance exclusive locks; one lifecycle operation at a time.
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,

    /// Cancellation signals for in-flight readiness gates.
    gate_cancels: Mutex<HashMap<i64, broadcast::Sender<()>>>,

    /// Short-held lock serializing port allocation.
    port_lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LifecycleManager {
    /// Creates a new lifecycle manager.
    pub fn new(
        pool: Pool<Sqlite>,
        config: PodbaseConfig,
        orchestrator: Orchestrator,
        vnet: Arc<VnetAllocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            orchestrator,
            vnet,
            locks: Mutex::new(HashMap::new()),
            gate_cancels: Mutex::new(HashMap::new()),
            port_lock: Mutex::new(()),
        })
    }

    /// The store pool this manager writes through.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// The orchestrator this manager drives.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// The daemon configuration.
    pub fn config(&self) -> &PodbaseConfig {
        &self.config
    }

    /// Validates a create request, inserts the row, and spawns the
    /// provisioning task. Returns the pending instance immediately;
    /// asynchronous failures surface via `status` and `error_message`.
    pub async fn create(self: &Arc<Self>, spec: CreateInstanceSpec) -> PodbaseResult<Instance> {
        let adapter = engine::get_adapter(&spec.engine)?;
        let (memory_mb, cpus, storage_gb) = resolve_resources(&spec, adapter)?;
        crate::host::check_capacity(memory_mb)?;

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => format!("{}-{}", spec.engine, rand::thread_rng().gen_range(1000..10000)),
        };
        if !is_valid_instance_name(&name) {
            return Err(PodbaseError::Validation(format!(
                "invalid instance name '{name}'"
            )));
        }
        if store::name_in_use(&self.pool, &name).await? {
            return Err(PodbaseError::NameInUse(name));
        }

        if spec.tls_enabled {
            match (&spec.tls_cert, &spec.tls_key) {
                (Some(cert), Some(key))
                    if cert.starts_with(b"-----BEGIN") && key.starts_with(b"-----BEGIN") => {}
                (Some(_), Some(_)) => {
                    return Err(PodbaseError::Validation(
                        "tls_cert and tls_key must be PEM encoded".to_string(),
                    ))
                }
                _ => {
                    return Err(PodbaseError::Validation(
                        "tls_enabled requires both tls_cert and tls_key".to_string(),
                    ))
                }
            }
        }
        if let Some(vnet_name) = &spec.vnet_name {
            if vnet_name != self.vnet.name() {
                return Err(PodbaseError::Validation(format!(
                    "unknown vnet '{vnet_name}'"
                )));
            }
        }

        let host = if spec.external_access {
            WILDCARD_HOST_IP.to_string()
        } else {
            self.config.get_default_host_ip().clone()
        };

        let new = store::NewInstance {
            name: name.clone(),
            engine: spec.engine.clone(),
            database_name: spec.database_name.clone(),
            container_name: container_name(&spec.engine, &name),
            sku: spec.sku.clone(),
            memory_limit_mb: memory_mb,
            cpu_limit: cpus,
            storage_limit_gb: storage_gb,
            host,
            external_access: spec.external_access,
            tls_enabled: spec.tls_enabled,
            vnet_name: spec.vnet_name.clone(),
        };
        let id = store::insert_instance(&self.pool, &new).await?;

        let username = credentials::generate_username();
        let password = credentials::generate_password(adapter.password_charset);
        store::set_credentials(&self.pool, id, &username, &password).await?;

        // Stage the PEM blobs for the provisioning task before it starts.
        if let (true, Some(cert), Some(key)) = (spec.tls_enabled, &spec.tls_cert, &spec.tls_key) {
            let dir = self.config.tls_dir().join(id.to_string());
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join("pending.crt"), cert).await?;
            tokio::fs::write(dir.join("pending.key"), key).await?;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.provision(id).await {
                error!(instance_id = id, error = %e, "provisioning failed");
                manager.fail(id, &e.to_string()).await;
            }
        });

        store::get_instance(&self.pool, id)
            .await?
            .ok_or(PodbaseError::InstanceNotFound(id))
    }

    /// Starts a stopped or failed instance.
    pub async fn start(self: &Arc<Self>, id: i64) -> PodbaseResult<Instance> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let instance = self.must_get(id).await?;
        self.transition(&instance, InstanceStatus::Starting).await?;

        let adapter = engine::get_adapter(&instance.engine)?;
        if !adapter.supports.embedded {
            let container = instance.container_ref();
            if let Err(e) = self
                .orchestrator
                .start(&container, Duration::from_secs(DEFAULT_CREATE_TIMEOUT_S))
                .await
            {
                self.fail(id, &e.to_string()).await;
                return Err(e);
            }
        }

        match self.readiness_gate(id, &instance, adapter).await {
            Ok(()) => {
                store::update_instance_status(&self.pool, id, InstanceStatus::Running, None).await?;
                info!(instance_id = id, "instance started");
                self.must_get(id).await
            }
            Err(e) => {
                self.fail(id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Gracefully stops a running instance, killing on grace expiry.
    pub async fn stop(self: &Arc<Self>, id: i64) -> PodbaseResult<Instance> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let instance = self.must_get(id).await?;
        self.transition(&instance, InstanceStatus::Stopping).await?;

        let adapter = engine::get_adapter(&instance.engine)?;
        if !adapter.supports.embedded {
            let container = instance.container_ref();
            let grace = Duration::from_secs(DEFAULT_STOP_TIMEOUT_S);
            if let Err(e) = self.orchestrator.stop(&container, grace).await {
                warn!(instance_id = id, error = %e, "graceful stop failed, killing");
                if let Err(e) = self.orchestrator.kill(&container).await {
                    if !matches!(e, PodbaseError::ContainerNotFound(_)) {
                        self.fail(id, &e.to_string()).await;
                        return Err(e);
                    }
                }
            }
        }

        store::update_instance_status(&self.pool, id, InstanceStatus::Stopped, None).await?;
        info!(instance_id = id, "instance stopped");
        self.must_get(id).await
    }

    /// Restarts a running instance without exposing an intermediate
    /// `stopped` state.
    pub async fn restart(self: &Arc<Self>, id: i64) -> PodbaseResult<Instance> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let instance = self.must_get(id).await?;
        self.transition(&instance, InstanceStatus::Restarting).await?;

        let adapter = engine::get_adapter(&instance.engine)?;
        if !adapter.supports.embedded {
            let container = instance.container_ref();
            if let Err(e) = self
                .orchestrator
                .restart(&container, Duration::from_secs(DEFAULT_CREATE_TIMEOUT_S))
                .await
            {
                self.fail(id, &e.to_string()).await;
                return Err(e);
            }
        }

        store::update_instance_status(&self.pool, id, InstanceStatus::Starting, None).await?;
        match self.readiness_gate(id, &instance, adapter).await {
            Ok(()) => {
                store::update_instance_status(&self.pool, id, InstanceStatus::Running, None).await?;
                info!(instance_id = id, "instance restarted");
                self.must_get(id).await
            }
            Err(e) => {
                self.fail(id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Destroys an instance and all its resources. Idempotent: destroying
    /// an unknown or already-destroyed id succeeds.
    pub async fn destroy(self: &Arc<Self>, id: i64) -> PodbaseResult<()> {
        // Cancel any in-flight readiness wait before taking the lock.
        if let Some(cancel) = self.gate_cancels.lock().await.get(&id) {
            let _ = cancel.send(());
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(instance) = store::get_instance(&self.pool, id).await? else {
            return Ok(());
        };
        if instance.status == InstanceStatus::Destroyed {
            return Ok(());
        }

        store::update_instance_status(&self.pool, id, InstanceStatus::Destroying, None).await?;
        self.destroy_steps(&instance).await?;

        self.locks.lock().await.remove(&id);
        info!(instance_id = id, name = %instance.name, "instance destroyed");
        Ok(())
    }

    /// Rotates an instance's password: generates a new one, applies it
    /// in-engine through the adapter, and overwrites the row in a single
    /// statement. Returns the new credentials.
    pub async fn rotate_credentials(self: &Arc<Self>, id: i64) -> PodbaseResult<(String, String)> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let instance = self.must_get(id).await?;
        if instance.status != InstanceStatus::Running {
            return Err(PodbaseError::Validation(format!(
                "instance must be running to rotate credentials (status: {})",
                instance.status
            )));
        }

        let adapter = engine::get_adapter(&instance.engine)?;
        let Some(rotate) = adapter.rotate_cmd else {
            return Err(PodbaseError::RotationUnsupported(instance.engine.clone()));
        };

        let new_password = credentials::generate_password(adapter.password_charset);
        let command = {
            let ctx = instance.engine_ctx();
            rotate(&ctx, &new_password)
        };

        let out = self
            .orchestrator
            .exec(
                &instance.container_ref(),
                &command,
                Duration::from_secs(DEFAULT_STOP_TIMEOUT_S),
            )
            .await?;
        if out.exit_code != 0 {
            return Err(PodbaseError::EngineOp {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }

        store::set_credentials(&self.pool, id, &instance.username, &new_password).await?;
        info!(instance_id = id, "credentials rotated");
        Ok((instance.username, new_password))
    }

    /// Startup pass bringing persisted state into agreement with the
    /// runtime. Running it twice in a row is a no-op the second time.
    pub async fn reconcile(self: &Arc<Self>) -> PodbaseResult<()> {
        let instances = store::list_instances(&self.pool, None, None).await?;
        for instance in instances {
            if let Err(e) = self.reconcile_one(&instance).await {
                error!(instance_id = instance.id, error = %e, "reconcile failed");
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Internals
    //----------------------------------------------------------------------------------------------

    /// The provisioning task: volume, TLS, config render, placement,
    /// image pull, container create, readiness gate.
    async fn provision(self: &Arc<Self>, id: i64) -> PodbaseResult<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let instance = self.must_get(id).await?;
        let adapter = engine::get_adapter(&instance.engine)?;
        store::update_instance_status(&self.pool, id, InstanceStatus::Creating, None).await?;
        info!(instance_id = id, engine = %instance.engine, "provisioning instance");

        // Volume and rendered config.
        let paths = volume::create_volume(&self.config.volumes_dir(), id).await?;
        let mut mounts = Vec::new();
        if !adapter.data_mount.is_empty() {
            mounts.push(Mount {
                host_path: paths.data.display().to_string(),
                container_path: adapter.data_mount.to_string(),
                read_only: false,
            });
        }
        if let (Some(render), Some(mount_point)) = (adapter.render_config, adapter.config_mount) {
            let filename = mount_point.rsplit('/').next().unwrap_or("engine.conf");
            let contents = render(instance.memory_limit_mb);
            let config_path = volume::write_config_file(&paths, filename, &contents).await?;
            mounts.push(Mount {
                host_path: config_path.display().to_string(),
                container_path: mount_point.to_string(),
                read_only: true,
            });
        }

        // TLS material.
        let mut tls_paths = None;
        if instance.tls_enabled {
            // The PEM blobs were validated at create; they are staged from
            // the row the server persisted alongside the request.
            let (cert, key) = self.staged_tls_material(id).await?;
            let staged = volume::stage_tls(&self.config.tls_dir(), id, &cert, &key).await?;
            mounts.push(Mount {
                host_path: staged.cert.display().to_string(),
                container_path: engine::TLS_CERT_MOUNT.to_string(),
                read_only: true,
            });
            mounts.push(Mount {
                host_path: staged.key.display().to_string(),
                container_path: engine::TLS_KEY_MOUNT.to_string(),
                read_only: true,
            });
            mounts.push(Mount {
                host_path: staged.combined.display().to_string(),
                container_path: engine::TLS_COMBINED_MOUNT.to_string(),
                read_only: true,
            });
            tls_paths = Some(staged);
        }

        // Embedded engines stop here: volume + record, no container.
        if adapter.supports.embedded {
            store::set_placement(
                &self.pool,
                id,
                &instance.host,
                0,
                Some(&paths.base.display().to_string()),
                None,
                None,
                None,
            )
            .await?;
            store::update_instance_status(&self.pool, id, InstanceStatus::Starting, None).await?;
            store::update_instance_status(&self.pool, id, InstanceStatus::Running, None).await?;
            info!(instance_id = id, "embedded instance provisioned");
            return Ok(());
        }

        // Network placement: vnet attachment or host port.
        let mut vnet_ip = None;
        let mut host_port = 0u16;
        if let Some(vnet_name) = &instance.vnet_name {
            self.orchestrator
                .network_create(vnet_name, self.config.get_vnet_subnet_base())
                .await?;
            vnet_ip = Some(self.vnet.reserve().await?.to_string());
        } else {
            host_port = self.allocate_port().await?;
        }

        store::set_placement(
            &self.pool,
            id,
            &instance.host,
            host_port,
            Some(&paths.base.display().to_string()),
            vnet_ip.as_deref(),
            tls_paths.as_ref().map(|t| t.cert.display().to_string()).as_deref(),
            tls_paths.as_ref().map(|t| t.key.display().to_string()).as_deref(),
        )
        .await?;

        // Pull the image with backoff, then create.
        let instance = self.must_get(id).await?;
        if let Err(e) = self.pull_with_retries(adapter.image).await {
            if let Some(ip) = &vnet_ip {
                self.vnet.release(ip).await;
            }
            return Err(e);
        }

        let container_id = match self
            .create_with_port_retries(&instance, adapter, mounts, host_port)
            .await
        {
            Ok(container_id) => container_id,
            Err(e) => {
                if let Some(ip) = &vnet_ip {
                    self.vnet.release(ip).await;
                }
                return Err(e);
            }
        };
        store::set_container_id(&self.pool, id, &container_id).await?;
        store::update_instance_status(&self.pool, id, InstanceStatus::Starting, None).await?;

        // Readiness gate; on timeout the container is removed so a failed
        // create leaves nothing behind.
        let instance = self.must_get(id).await?;
        match self.readiness_gate(id, &instance, adapter).await {
            Ok(()) => {
                store::update_instance_status(&self.pool, id, InstanceStatus::Running, None).await?;
                info!(instance_id = id, container_id = %container_id, "instance is running");
                Ok(())
            }
            Err(e) => {
                warn!(instance_id = id, error = %e, "readiness gate failed, removing container");
                let _ = self.orchestrator.remove(&instance.container_ref(), true).await;
                if let Some(ip) = &vnet_ip {
                    self.vnet.release(ip).await;
                }
                Err(e)
            }
        }
    }

    /// Waits for the engine to accept connections: a jittered retry loop
    /// over the adapter probe, bounded by the adapter's readiness timeout
    /// and cancellable by destroy.
    async fn readiness_gate(
        self: &Arc<Self>,
        id: i64,
        instance: &Instance,
        adapter: &'static EngineAdapter,
    ) -> PodbaseResult<()> {
        if adapter.supports.embedded {
            // No engine process to wait for; readiness is the volume being
            // in place.
            let present = volume::get_volume(&self.config.volumes_dir(), id).await.is_some();
            return if present {
                Ok(())
            } else {
                Err(PodbaseError::Consistency(format!(
                    "volume for embedded instance {id} is missing"
                )))
            };
        }

        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
        self.gate_cancels.lock().await.insert(id, cancel_tx);

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(adapter.readiness_timeout_s);
        let ctx_owner = instance.clone();
        let result = loop {
            let ctx = ctx_owner.engine_ctx();
            let probe = (adapter.health_cmd)(&ctx);
            if probe.is_empty() {
                break Ok(());
            }

            let outcome = self
                .orchestrator
                .exec(
                    &instance.container_ref(),
                    &probe,
                    Duration::from_secs(DEFAULT_EXEC_TIMEOUT_S),
                )
                .await;
            if let Ok(out) = outcome {
                let report = (adapter.parse_health)(out.exit_code, &out.stdout, &out.stderr);
                if report.healthy {
                    break Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                break Err(PodbaseError::Timeout(format!(
                    "engine not ready after {}s",
                    adapter.readiness_timeout_s
                )));
            }

            // Jittered pause between probes; bail out fast on cancel.
            let pause = Duration::from_millis(rand::thread_rng().gen_range(1500..2500));
            tokio::select! {
                _ = cancel_rx.recv() => {
                    break Err(PodbaseError::Timeout(
                        "readiness wait cancelled".to_string(),
                    ));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        };

        self.gate_cancels.lock().await.remove(&id);
        result
    }

    /// Destroy steps 1-7, all idempotent, in a fixed order so an
    /// interrupted destroy resumes safely.
    async fn destroy_steps(&self, instance: &Instance) -> PodbaseResult<()> {
        let id = instance.id;
        let container = instance.container_ref();

        // 1-2. Force-stop and remove the container; "not found" is fine.
        if let Err(e) = self.orchestrator.kill(&container).await {
            if !matches!(e, PodbaseError::ContainerNotFound(_) | PodbaseError::RuntimeUnavailable(_)) {
                warn!(instance_id = id, error = %e, "kill during destroy");
            }
        }
        if let Err(e) = self.orchestrator.remove(&container, true).await {
            if !matches!(e, PodbaseError::ContainerNotFound(_) | PodbaseError::RuntimeUnavailable(_)) {
                warn!(instance_id = id, error = %e, "remove during destroy");
            }
        }

        // 3. Snapshot files, then their rows via cascade on row delete.
        for snapshot in store::list_snapshots(&self.pool, id).await? {
            let path = std::path::Path::new(&snapshot.path);
            if path.exists() {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(instance_id = id, path = %snapshot.path, error = %e, "snapshot file delete");
                }
            }
        }
        let snapshot_dir = self.config.snapshots_dir().join(id.to_string());
        if snapshot_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&snapshot_dir).await;
        }

        // 4. Release the vnet address.
        if let Some(ip) = &instance.vnet_ip {
            self.vnet.release(ip).await;
        }

        // 5. Volume, 6. TLS material.
        volume::delete_volume(&self.config.volumes_dir(), id).await?;
        volume::delete_tls(&self.config.tls_dir(), id).await?;

        // 7. Purge the row; snapshot and sample rows cascade.
        store::delete_instance(&self.pool, id).await?;
        Ok(())
    }

    async fn reconcile_one(self: &Arc<Self>, instance: &Instance) -> PodbaseResult<()> {
        use InstanceStatus::*;

        let id = instance.id;
        let adapter = engine::get_adapter(&instance.engine)?;

        if adapter.supports.embedded {
            let present = volume::get_volume(&self.config.volumes_dir(), id).await.is_some();
            if matches!(instance.status, Running | Creating | Starting) && !present {
                store::update_instance_status(
                    &self.pool,
                    id,
                    Failed,
                    Some("volume missing after restart"),
                )
                .await?;
            }
            return Ok(());
        }

        match instance.status {
            Destroying => {
                info!(instance_id = id, "resuming interrupted destroy");
                self.destroy_steps(instance).await?;
            }
            Creating | Starting | Stopping | Restarting | Running => {
                let state = self.orchestrator.inspect(&instance.container_ref()).await;
                match state {
                    Err(PodbaseError::ContainerNotFound(_)) => {
                        warn!(instance_id = id, status = %instance.status, "container missing, marking failed");
                        store::update_instance_status(
                            &self.pool,
                            id,
                            Failed,
                            Some("container missing after restart"),
                        )
                        .await?;
                    }
                    Ok(state) if state.running => {
                        let ctx_owner = instance.clone();
                        let ctx = ctx_owner.engine_ctx();
                        let probe = (adapter.health_cmd)(&ctx);
                        let healthy = match self
                            .orchestrator
                            .exec(
                                &instance.container_ref(),
                                &probe,
                                Duration::from_secs(DEFAULT_EXEC_TIMEOUT_S),
                            )
                            .await
                        {
                            Ok(out) => {
                                (adapter.parse_health)(out.exit_code, &out.stdout, &out.stderr)
                                    .healthy
                            }
                            Err(_) => false,
                        };
                        let new_status = if healthy { Running } else { instance.status };
                        if healthy && instance.status != Running {
                            info!(instance_id = id, "container healthy, marking running");
                        }
                        if new_status != instance.status {
                            store::update_instance_status(&self.pool, id, new_status, None).await?;
                        }
                    }
                    Ok(_) => {
                        if instance.status != Stopped {
                            info!(instance_id = id, "container present but stopped");
                            store::update_instance_status(&self.pool, id, Stopped, None).await?;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            Pending => {
                // Provisioning never started; the request is lost.
                store::update_instance_status(
                    &self.pool,
                    id,
                    Failed,
                    Some("control plane restarted before provisioning"),
                )
                .await?;
            }
            Stopped | Failed | Destroyed => {}
        }
        Ok(())
    }

    /// Marks an instance failed, recording the error for `Get`.
    pub async fn fail(&self, id: i64, message: &str) {
        if let Err(e) =
            store::update_instance_status(&self.pool, id, InstanceStatus::Failed, Some(message))
                .await
        {
            error!(instance_id = id, error = %e, "failed to record failure");
        }
    }

    /// Checks the requested transition against the state graph and applies
    /// it. Refused transitions never mutate the row.
    async fn transition(&self, instance: &Instance, to: InstanceStatus) -> PodbaseResult<()> {
        if !instance.status.can_transition_to(to) {
            return Err(PodbaseError::InvalidTransition {
                from: instance.status,
                to,
            });
        }
        store::update_instance_status(&self.pool, instance.id, to, None).await?;
        Ok(())
    }

    async fn must_get(&self, id: i64) -> PodbaseResult<Instance> {
        store::get_instance(&self.pool, id)
            .await?
            .ok_or(PodbaseError::InstanceNotFound(id))
    }

    async fn lock_for(&self, id: i64) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Picks a free host port: not held by a live row and currently
    /// bindable on loopback.
    async fn allocate_port(&self) -> PodbaseResult<u16> {
        let _guard = self.port_lock.lock().await;
        let (start, end) = *self.config.get_port_range();

        for _ in 0..DEFAULT_RETRY_ATTEMPTS * 16 {
            let candidate = rand::thread_rng().gen_range(start..=end);
            if store::port_in_use(&self.pool, candidate).await? {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
                return Ok(candidate);
            }
        }
        Err(PodbaseError::PortExhausted {
            attempts: DEFAULT_RETRY_ATTEMPTS * 16,
        })
    }

    async fn pull_with_retries(&self, image: &str) -> PodbaseResult<()> {
        let deadline = Duration::from_secs(*self.config.get_image_pull_timeout_s());
        let mut last_err = None;
        for attempt in 0..DEFAULT_RETRY_ATTEMPTS {
            match self.orchestrator.pull(image, deadline).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(image, attempt, error = %e, "image pull failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PodbaseError::ImagePull {
            image: image.to_string(),
            reason: "no attempts made".to_string(),
        }))
    }

    /// Creates the container, drawing a fresh port on a binding collision.
    async fn create_with_port_retries(
        &self,
        instance: &Instance,
        adapter: &'static EngineAdapter,
        mounts: Vec<Mount>,
        mut host_port: u16,
    ) -> PodbaseResult<String> {
        let ctx_owner = instance.clone();
        let deadline = Duration::from_secs(DEFAULT_CREATE_TIMEOUT_S);

        for attempt in 0..DEFAULT_RETRY_ATTEMPTS {
            let ctx = ctx_owner.engine_ctx();
            let options = self.build_create_options(instance, adapter, &ctx, &mounts, host_port);
            match self.orchestrator.create(&options, deadline).await {
                Ok(container_id) => {
                    if host_port != instance.port as u16 {
                        store::set_placement(
                            &self.pool,
                            instance.id,
                            &instance.host,
                            host_port,
                            instance.volume_path.as_deref(),
                            instance.vnet_ip.as_deref(),
                            instance.tls_cert_path.as_deref(),
                            instance.tls_key_path.as_deref(),
                        )
                        .await?;
                    }
                    return Ok(container_id);
                }
                Err(PodbaseError::PortInUse(_)) if instance.vnet_name.is_none() => {
                    warn!(instance_id = instance.id, port = host_port, attempt, "port collision, retrying");
                    let _ = self.orchestrator.remove(&instance.container_ref(), true).await;
                    host_port = self.allocate_port().await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(PodbaseError::PortExhausted {
            attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    fn build_create_options(
        &self,
        instance: &Instance,
        adapter: &'static EngineAdapter,
        ctx: &InstanceCtx,
        mounts: &[Mount],
        host_port: u16,
    ) -> CreateOptions {
        let scheduling: SchedulingHints = sku::series_of(&instance.sku).scheduling_hints();
        let builder = CreateOptions::builder()
            .name(instance.container_name.clone())
            .image(adapter.image.to_string())
            .instance_id(instance.id)
            .engine(instance.engine.clone())
            .env((adapter.container_env)(ctx))
            .command((adapter.container_args)(ctx))
            .mounts(mounts.to_vec())
            .cap_add(
                adapter
                    .extra_capabilities
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            )
            .read_only_rootfs(adapter.read_only_rootfs)
            .memory_mb(instance.memory_limit_mb)
            .cpus(instance.cpu_limit)
            .scheduling(scheduling)
            .container_port(adapter.default_port);

        if let (Some(network), Some(ip)) = (&instance.vnet_name, &instance.vnet_ip) {
            builder.network(network.clone()).static_ip(ip.clone()).build()
        } else {
            builder.host_ip(instance.host.clone()).host_port(host_port).build()
        }
    }

    /// Reads back the TLS material persisted at create time.
    async fn staged_tls_material(&self, id: i64) -> PodbaseResult<(Vec<u8>, Vec<u8>)> {
        // The server stages PEM blobs under tls/<id>/pending.{crt,key}
        // before provisioning starts.
        let dir = self.config.tls_dir().join(id.to_string());
        let cert = tokio::fs::read(dir.join("pending.crt")).await?;
        let key = tokio::fs::read(dir.join("pending.key")).await?;
        Ok((cert, key))
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: Instance helpers
//--------------------------------------------------------------------------------------------------

impl Instance {
    /// The identifier lifecycle calls address the container by.
    pub fn container_ref(&self) -> String {
        self.container_id
            .clone()
            .unwrap_or_else(|| self.container_name.clone())
    }

    /// Borrowed adapter context over this instance's fields.
    pub fn engine_ctx(&self) -> InstanceCtx<'_> {
        InstanceCtx {
            database: &self.database_name,
            username: &self.username,
            password: &self.password,
            tls: self.tls_enabled,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves the resource envelope from the SKU catalog or custom values,
/// clamped to the engine's floor.
fn resolve_resources(
    spec: &CreateInstanceSpec,
    adapter: &'static EngineAdapter,
) -> PodbaseResult<(i64, f64, i64)> {
    let (memory_mb, cpus, storage_gb) = if spec.sku == CUSTOM_SKU_ID {
        match (spec.memory_limit_mb, spec.cpu_limit, spec.storage_limit_gb) {
            (Some(memory), Some(cpus), Some(storage)) => (memory, cpus, storage),
            _ => {
                return Err(PodbaseError::Validation(
                    "custom SKU requires memory_limit_mb, cpu_limit, and storage_limit_gb"
                        .to_string(),
                ))
            }
        }
    } else {
        let sku = sku::get_sku(&spec.sku)?;
        (sku.memory_mb, sku.cpus, sku.storage_gb)
    };

    if memory_mb <= 0 || cpus <= 0.0 || storage_gb <= 0 {
        return Err(PodbaseError::Validation(
            "resource limits must be positive".to_string(),
        ));
    }
    Ok((memory_mb.max(adapter.min_memory_mb), cpus, storage_gb))
}

/// Container names carry the engine, instance name, and a creation stamp.
fn container_name(engine: &str, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("db_{}_{}_{}", engine, safe, Utc::now().format("%Y%m%d%H%M%S"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_sanitizes() {
        let name = container_name("postgresql", "my.app");
        assert!(name.starts_with("db_postgresql_my_app_"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_resolve_resources_from_catalog() {
        let adapter = crate::engine::get_adapter("postgresql").unwrap();
        let spec = CreateInstanceSpec {
            engine: "postgresql".to_string(),
            name: None,
            database_name: "app".to_string(),
            sku: "d2".to_string(),
            memory_limit_mb: None,
            cpu_limit: None,
            storage_limit_gb: None,
            external_access: false,
            tls_enabled: false,
            tls_cert: None,
            tls_key: None,
            vnet_name: None,
        };
        let (memory, cpus, storage) = resolve_resources(&spec, adapter).unwrap();
        assert_eq!((memory, cpus, storage), (4096, 2.0, 50));
    }

    #[test]
    fn test_custom_sku_requires_all_overrides() {
        let adapter = crate::engine::get_adapter("redis").unwrap();
        let mut spec = CreateInstanceSpec {
            engine: "redis".to_string(),
            name: None,
            database_name: "0".to_string(),
            sku: CUSTOM_SKU_ID.to_string(),
            memory_limit_mb: Some(1024),
            cpu_limit: None,
            storage_limit_gb: Some(10),
            external_access: false,
            tls_enabled: false,
            tls_cert: None,
            tls_key: None,
            vnet_name: None,
        };
        assert!(resolve_resources(&spec, adapter).is_err());
        spec.cpu_limit = Some(1.0);
        assert!(resolve_resources(&spec, adapter).is_ok());
    }

    #[test]
    fn test_engine_floor_clamps_memory() {
        let adapter = crate::engine::get_adapter("mssql").unwrap();
        let spec = CreateInstanceSpec {
            engine: "mssql".to_string(),
            name: None,
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
        };
        let (memory, _, _) = resolve_resources(&spec, adapter).unwrap();
        // b1 is 1024 MiB but SQL Server refuses below 2 GiB.
        assert_eq!(memory, 2048);
    }
}
