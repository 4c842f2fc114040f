//! The snapshot service.
//!
//! Engine-native dumps with metadata rows. Dumps are produced inside the
//! container at a scratch path, copied out with the runtime's `cp`, and
//! verified non-empty before the row is inserted, so a failed create leaves
//! neither a row nor a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::fs;
use tracing::{info, warn};

use crate::engine;
use crate::lifecycle::LifecycleManager;
use crate::models::{InstanceStatus, Snapshot};
use crate::store;
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Creates, restores, deletes, and exports snapshots.
pub struct SnapshotService {
    manager: Arc<LifecycleManager>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SnapshotService {
    /// Creates a snapshot service sharing the lifecycle manager's handles.
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }

    /// Takes a snapshot of a running instance, returning its row.
    pub async fn create(&self, instance_id: i64, notes: Option<&str>) -> PodbaseResult<Snapshot> {
        let pool = self.manager.pool();
        let instance = store::get_instance(pool, instance_id)
            .await?
            .ok_or(PodbaseError::InstanceNotFound(instance_id))?;
        if instance.status != InstanceStatus::Running {
            return Err(PodbaseError::Validation(format!(
                "instance must be running to snapshot (status: {})",
                instance.status
            )));
        }

        let adapter = engine::get_adapter(&instance.engine)?;
        if !adapter.supports.backup || adapter.supports.embedded {
            return Err(PodbaseError::UnsupportedOperation(format!(
                "engine '{}' does not support snapshots",
                instance.engine
            )));
        }

        let dest_path = self.snapshot_path(instance_id, adapter.dump_extension).await?;
        let scratch = format!(
            "/tmp/podbase_snapshot{}",
            adapter.dump_extension
        );

        let ctx = instance.engine_ctx();
        let command = (adapter.snapshot_cmd)(&ctx, &scratch);
        let deadline = Duration::from_secs(*self.manager.config().get_snapshot_timeout_s());
        let container = instance.container_ref();

        info!(instance_id, path = %dest_path.display(), "creating snapshot");
        let out = self
            .manager
            .orchestrator()
            .exec(&container, &command, deadline)
            .await?;
        if out.exit_code != 0 {
            return Err(PodbaseError::EngineOp {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }

        let host_dest = dest_path.display().to_string();
        if let Err(e) = self
            .manager
            .orchestrator()
            .copy_from(&container, &scratch, &host_dest, deadline)
            .await
        {
            let _ = fs::remove_file(&dest_path).await;
            return Err(e);
        }

        // Scratch cleanup inside the container is best-effort.
        let _ = self
            .manager
            .orchestrator()
            .exec(
                &container,
                &["rm".to_string(), "-f".to_string(), scratch],
                Duration::from_secs(10),
            )
            .await;

        let size_bytes = fs::metadata(&dest_path).await.map(|m| m.len()).unwrap_or(0) as i64;
        if size_bytes == 0 {
            let _ = fs::remove_file(&dest_path).await;
            return Err(PodbaseError::SnapshotEmpty(dest_path));
        }

        let snapshot_id =
            store::insert_snapshot(pool, instance_id, &host_dest, size_bytes, notes).await?;
        info!(instance_id, snapshot_id, size_bytes, "snapshot created");

        store::get_snapshot(pool, instance_id, snapshot_id)
            .await?
            .ok_or(PodbaseError::SnapshotNotFound(snapshot_id))
    }

    /// Restores a snapshot into its running instance. The adapter restore
    /// command is idempotent, so an interrupted restore can be retried.
    pub async fn restore(&self, instance_id: i64, snapshot_id: i64) -> PodbaseResult<()> {
        let pool = self.manager.pool();
        let instance = store::get_instance(pool, instance_id)
            .await?
            .ok_or(PodbaseError::InstanceNotFound(instance_id))?;
        if instance.status != InstanceStatus::Running {
            return Err(PodbaseError::Validation(format!(
                "instance must be running to restore (status: {})",
                instance.status
            )));
        }
        let snapshot = store::get_snapshot(pool, instance_id, snapshot_id)
            .await?
            .ok_or(PodbaseError::SnapshotNotFound(snapshot_id))?;
        if !Path::new(&snapshot.path).exists() {
            return Err(PodbaseError::RestoreFailed(format!(
                "snapshot file missing: {}",
                snapshot.path
            )));
        }

        let adapter = engine::get_adapter(&instance.engine)?;
        let scratch = format!("/tmp/podbase_restore{}", adapter.dump_extension);
        let deadline = Duration::from_secs(*self.manager.config().get_snapshot_timeout_s());
        let container = instance.container_ref();

        self.manager
            .orchestrator()
            .copy_to(&container, &snapshot.path, &scratch, deadline)
            .await?;

        let ctx = instance.engine_ctx();
        let command = (adapter.restore_cmd)(&ctx, &scratch);
        info!(instance_id, snapshot_id, "restoring snapshot");
        let out = self
            .manager
            .orchestrator()
            .exec(&container, &command, deadline)
            .await?;

        let _ = self
            .manager
            .orchestrator()
            .exec(
                &container,
                &["rm".to_string(), "-f".to_string(), scratch],
                Duration::from_secs(10),
            )
            .await;

        if out.exit_code != 0 {
            return Err(PodbaseError::RestoreFailed(format!(
                "restore command exited {}: {}",
                out.exit_code, out.stderr
            )));
        }
        info!(instance_id, snapshot_id, "snapshot restored");
        Ok(())
    }

    /// Deletes a snapshot, file first: a leftover row after a failed file
    /// delete beats an orphaned file, and the reconciler clears such rows.
    pub async fn delete(&self, instance_id: i64, snapshot_id: i64) -> PodbaseResult<()> {
        let pool = self.manager.pool();
        let snapshot = store::get_snapshot(pool, instance_id, snapshot_id)
            .await?
            .ok_or(PodbaseError::SnapshotNotFound(snapshot_id))?;

        let path = Path::new(&snapshot.path);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        store::delete_snapshot(pool, snapshot_id).await?;
        info!(instance_id, snapshot_id, "snapshot deleted");
        Ok(())
    }

    /// Produces a fresh logical dump for download. The dump is recorded as
    /// a regular snapshot (notes: "export") so the file stays accounted for
    /// and reclaimable through the snapshot API.
    pub async fn export(&self, instance_id: i64) -> PodbaseResult<PathBuf> {
        let snapshot = self.create(instance_id, Some("export")).await?;
        Ok(PathBuf::from(&snapshot.path))
    }

    /// Lists snapshots of an instance, newest first.
    pub async fn list(&self, instance_id: i64) -> PodbaseResult<Vec<Snapshot>> {
        store::list_snapshots(self.manager.pool(), instance_id).await
    }

    /// Drops rows whose file vanished (e.g. a delete interrupted between
    /// file and row). Run at startup.
    pub async fn reconcile_orphans(&self) -> PodbaseResult<u64> {
        let pool = self.manager.pool();
        let mut dropped = 0;
        for snapshot in store::list_all_snapshots(pool).await? {
            if !Path::new(&snapshot.path).exists() {
                warn!(snapshot_id = snapshot.id, path = %snapshot.path, "dropping orphan snapshot row");
                store::delete_snapshot(pool, snapshot.id).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Builds `<snapshot_root>/<instance_id>/<timestamp>-<rand><ext>`,
    /// creating the directory.
    async fn snapshot_path(&self, instance_id: i64, extension: &str) -> PodbaseResult<PathBuf> {
        let dir = self
            .manager
            .config()
            .snapshots_dir()
            .join(instance_id.to_string());
        fs::create_dir_all(&dir).await?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let nonce: u32 = rand::thread_rng().gen_range(0x1000..0xFFFF);
        Ok(dir.join(format!("{stamp}-{nonce:x}{extension}")))
    }
}
