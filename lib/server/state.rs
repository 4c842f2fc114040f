//! Server state management.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::health::HealthMonitor;
use crate::lifecycle::LifecycleManager;
use crate::metrics::MetricsSampler;
use crate::snapshot::SnapshotService;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Header the embedding host sets to the authenticated caller identity
/// after its own authentication layer runs.
pub const SUBJECT_HEADER: &str = "x-dbaas-subject";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A permission the host is asked to grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// `dbaas:read` - list and inspect resources.
    Read,
    /// `dbaas:write` - mutate resources.
    Write,
}

impl Permission {
    /// The permission string handed to the host predicate.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "dbaas:read",
            Permission::Write => "dbaas:write",
        }
    }
}

/// The caller identity a request carries, taken from the host-set subject
/// header. Empty when the host attached none.
#[derive(Debug, Clone)]
pub struct Subject(pub String);

/// The host-supplied permission predicate: `check(permission, subject)`.
/// The subject string lets hosts scope authorization to the caller, e.g.
/// granting writes only on a caller's own instances.
pub type PermissionCheck = Arc<dyn Fn(Permission, &str) -> bool + Send + Sync>;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct ServerState {
    /// The lifecycle manager.
    pub manager: Arc<LifecycleManager>,
    /// The snapshot service.
    pub snapshots: Arc<SnapshotService>,
    /// The health monitor.
    pub health: Arc<HealthMonitor>,
    /// The metrics sampler.
    pub metrics: Arc<MetricsSampler>,
    /// The host's permission predicate.
    pub permission: PermissionCheck,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Creates server state over the control-plane services.
    pub fn new(
        manager: Arc<LifecycleManager>,
        snapshots: Arc<SnapshotService>,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsSampler>,
        permission: PermissionCheck,
    ) -> Self {
        Self {
            manager,
            snapshots,
            health,
            metrics,
            permission,
        }
    }

    /// A state whose predicate grants everything to every subject, for
    /// single-operator deployments and tests.
    pub fn allow_all(
        manager: Arc<LifecycleManager>,
        snapshots: Arc<SnapshotService>,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsSampler>,
    ) -> Self {
        Self::new(manager, snapshots, health, metrics, Arc::new(|_, _| true))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<S> FromRequestParts<S> for Subject
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = parts
            .headers
            .get(SUBJECT_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Subject(subject))
    }
}
