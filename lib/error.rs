use std::path::PathBuf;

use thiserror::Error;

use crate::models::InstanceStatus;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a podbase-related operation.
pub type PodbaseResult<T> = Result<T, PodbaseError>;

/// An error that occurred during a podbase operation.
#[derive(Debug, Error)]
pub enum PodbaseError {
    /// The requested engine tag is not registered.
    #[error("unknown database engine '{0}'")]
    EngineUnknown(String),

    /// The requested SKU id is not in the catalog.
    #[error("unknown SKU '{0}'")]
    SkuUnknown(String),

    /// A request failed synchronous validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An instance name is already held by a live instance.
    #[error("instance name '{0}' is already in use")]
    NameInUse(String),

    /// No free host port could be allocated.
    #[error("no free host port after {attempts} attempts")]
    PortExhausted {
        /// Number of allocation attempts made.
        attempts: u32,
    },

    /// The virtual network has no free addresses left.
    #[error("vnet '{0}' has no free addresses")]
    VnetExhausted(String),

    /// No instance exists with the given id.
    #[error("instance {0} not found")]
    InstanceNotFound(i64),

    /// No snapshot exists with the given id.
    #[error("snapshot {0} not found")]
    SnapshotNotFound(i64),

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("cannot transition instance from '{from}' to '{to}'")]
    InvalidTransition {
        /// Status the instance is currently in.
        from: InstanceStatus,
        /// Status the operation would have moved it to.
        to: InstanceStatus,
    },

    /// The container runtime could not be reached or is not installed.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Pulling the engine image failed.
    #[error("image pull failed for '{image}': {reason}")]
    ImagePull {
        /// Image reference that failed to pull.
        image: String,
        /// Runtime error output.
        reason: String,
    },

    /// The requested host port is already bound.
    #[error("host port {0} is already in use")]
    PortInUse(u16),

    /// The runtime does not know the referenced container.
    #[error("container '{0}' not found")]
    ContainerNotFound(String),

    /// A command executed inside a container exited nonzero.
    #[error("exec failed with exit code {exit_code}: {stderr}")]
    Exec {
        /// Exit code reported by the runtime.
        exit_code: i64,
        /// Captured stderr.
        stderr: String,
    },

    /// An engine-native operation (dump, restore, rotate) exited nonzero.
    #[error("engine operation failed with exit code {exit_code}: {stderr}")]
    EngineOp {
        /// Exit code reported by the runtime.
        exit_code: i64,
        /// Captured stderr.
        stderr: String,
    },

    /// Rendering an engine configuration file failed.
    #[error("invalid configuration for field '{field}': {reason}")]
    ConfigInvalid {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A restore left the instance in an engine-defined state.
    #[error("restore failed: {0}")]
    RestoreFailed(String),

    /// A snapshot command produced no data.
    #[error("snapshot produced an empty file at {}", .0.display())]
    SnapshotEmpty(PathBuf),

    /// The engine has no credential rotation command.
    #[error("credential rotation is not supported for engine '{0}'")]
    RotationUnsupported(String),

    /// The operation is not available for this engine (e.g. embedded engines).
    #[error("operation not supported: {0}")]
    UnsupportedOperation(String),

    /// An external call exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Reconcile detected drift between persisted state and the runtime.
    #[error("state drift detected: {0}")]
    Consistency(String),

    /// An internal invariant was violated; the transition was refused.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// An error from the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error from the persistence store.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// An error applying schema migrations.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// An error serializing or deserializing JSON.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// An error parsing the YAML configuration file.
    #[error(transparent)]
    SerdeYaml(#[from] serde_yaml::Error),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodbaseError {
    /// Whether the error should be reported to the API caller as a bad
    /// request rather than a server-side failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PodbaseError::EngineUnknown(_)
                | PodbaseError::SkuUnknown(_)
                | PodbaseError::Validation(_)
                | PodbaseError::ConfigInvalid { .. }
                | PodbaseError::InvalidTransition { .. }
                | PodbaseError::UnsupportedOperation(_)
                | PodbaseError::RotationUnsupported(_)
        )
    }

    /// Whether the error is a resource collision the caller can act on.
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            PodbaseError::NameInUse(_)
                | PodbaseError::PortInUse(_)
                | PodbaseError::PortExhausted { .. }
                | PodbaseError::VnetExhausted(_)
        )
    }

    /// Whether the error means the referenced resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PodbaseError::InstanceNotFound(_)
                | PodbaseError::SnapshotNotFound(_)
                | PodbaseError::ContainerNotFound(_)
        )
    }
}
