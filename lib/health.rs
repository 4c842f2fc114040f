//! The health monitor.
//!
//! Probes every running instance on a jittered interval through the
//! adapter's health command, classifies the outcome, appends history, and
//! keeps an in-memory current-status index. Sustained flips between healthy
//! and unhealthy emit a status-change event; the daemon restarts the
//! instance only when the operator opted in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_HEALTH_RETENTION_SAMPLES, DEFAULT_PROBE_POOL_SIZE};
use crate::engine;
use crate::lifecycle::LifecycleManager;
use crate::models::{HealthSample, HealthState, InstanceStatus};
use crate::store::{self, UptimeStats};
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A sustained health flip reported to the daemon.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    /// Instance whose health changed.
    pub instance_id: i64,
    /// The state it settled into.
    pub state: HealthState,
}

/// Current health served by the API without running a new probe.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCurrent {
    /// Latest classification, `unknown` when never probed.
    pub status: HealthState,
    /// Latest probe round trip in milliseconds.
    pub response_time_ms: i64,
    /// Latest adapter detail fields.
    pub details: Option<serde_json::Value>,
    /// When the latest probe ran.
    pub checked_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Availability aggregates over the last 24 hours.
    pub uptime: UptimeStats,
}

#[derive(Debug, Default, Clone)]
struct Streak {
    state: Option<HealthState>,
    count: u32,
    reported: bool,
}

/// The periodic health prober.
pub struct HealthMonitor {
    manager: Arc<LifecycleManager>,
    events: mpsc::Sender<HealthEvent>,
    current: RwLock<HashMap<i64, (HealthState, i64)>>,
    streaks: RwLock<HashMap<i64, Streak>>,
    pool: Arc<Semaphore>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HealthMonitor {
    /// Creates a monitor reporting status changes over `events`.
    pub fn new(manager: Arc<LifecycleManager>, events: mpsc::Sender<HealthEvent>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            events,
            current: RwLock::new(HashMap::new()),
            streaks: RwLock::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(DEFAULT_PROBE_POOL_SIZE)),
        })
    }

    /// Runs the probe loop until the process exits.
    pub async fn run(self: Arc<Self>) {
        let base = *self.manager.config().get_health_interval_s();
        loop {
            // Jitter the tick by +/-10% to de-synchronize with other hosts.
            let jitter = rand::thread_rng().gen_range(-(base as i64) / 10..=(base as i64) / 10);
            let tick = Duration::from_secs((base as i64 + jitter).max(1) as u64);
            tokio::time::sleep(tick).await;

            if let Err(e) = self.probe_all().await {
                error!(error = %e, "health sweep failed");
            }
        }
    }

    /// Probes every running instance once, bounded by the probe pool.
    /// Instances that cannot get a slot are skipped this tick rather than
    /// queued.
    pub async fn probe_all(self: &Arc<Self>) -> PodbaseResult<()> {
        let instances = store::list_instances(
            self.manager.pool(),
            None,
            Some(InstanceStatus::Running),
        )
        .await?;

        let mut handles = Vec::new();
        for instance in instances {
            let Ok(permit) = Arc::clone(&self.pool).try_acquire_owned() else {
                debug!(instance_id = instance.id, "probe pool full, skipping tick");
                continue;
            };
            let monitor = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = monitor.probe_one(instance.id).await {
                    warn!(instance_id = instance.id, error = %e, "probe failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Probes one instance and records the outcome.
    pub async fn probe_one(self: &Arc<Self>, instance_id: i64) -> PodbaseResult<()> {
        let pool = self.manager.pool();
        let Some(instance) = store::get_instance(pool, instance_id).await? else {
            return Ok(());
        };
        let adapter = engine::get_adapter(&instance.engine)?;
        if adapter.supports.embedded {
            return Ok(());
        }

        let probe_timeout =
            Duration::from_secs((*self.manager.config().get_health_interval_s() / 2).max(1));
        let container = instance.container_ref();

        let started = Instant::now();
        let (state, details) = match self.manager.orchestrator().inspect(&container).await {
            Err(PodbaseError::ContainerNotFound(_)) => (HealthState::Unhealthy, None),
            Err(_) => (HealthState::Unknown, None),
            Ok(container_state) if !container_state.running => (HealthState::Unhealthy, None),
            Ok(_) => {
                let ctx = instance.engine_ctx();
                let command = (adapter.health_cmd)(&ctx);
                match self
                    .manager
                    .orchestrator()
                    .exec(&container, &command, probe_timeout)
                    .await
                {
                    Ok(out) => {
                        let report = (adapter.parse_health)(out.exit_code, &out.stdout, &out.stderr);
                        let state = if report.healthy {
                            HealthState::Healthy
                        } else {
                            // The container runs but the engine says no.
                            HealthState::Degraded
                        };
                        let details = report.details.or_else(|| {
                            Some(serde_json::json!({ "message": report.message }))
                        });
                        (state, details)
                    }
                    Err(PodbaseError::Timeout(_)) => (HealthState::Unknown, None),
                    Err(_) => (HealthState::Unknown, None),
                }
            }
        };
        let response_time_ms = started.elapsed().as_millis() as i64;

        let details_json = details.as_ref().map(|d| d.to_string());
        store::insert_health_sample(
            pool,
            instance_id,
            state,
            response_time_ms,
            details_json.as_deref(),
        )
        .await?;
        store::trim_health_samples(pool, instance_id, DEFAULT_HEALTH_RETENTION_SAMPLES).await?;

        self.current
            .write()
            .await
            .insert(instance_id, (state, response_time_ms));
        self.track_streak(instance_id, state).await;

        debug!(instance_id, state = %state, response_time_ms, "health probe");
        Ok(())
    }

    /// Current health for the API: the in-memory index answers the status
    /// without a probe; the stored sample supplies details and timestamps,
    /// and the history supplies the uptime aggregates.
    pub async fn current(&self, instance_id: i64) -> PodbaseResult<HealthCurrent> {
        let indexed = self.current.read().await.get(&instance_id).copied();
        let latest: Option<HealthSample> =
            store::latest_health_sample(self.manager.pool(), instance_id).await?;
        let uptime = store::uptime_stats(self.manager.pool(), instance_id, 24).await?;

        let (status, response_time_ms) = indexed
            .or_else(|| latest.as_ref().map(|s| (s.status, s.response_time_ms)))
            .unwrap_or((HealthState::Unknown, 0));

        Ok(HealthCurrent {
            status,
            response_time_ms,
            details: latest
                .as_ref()
                .and_then(|s| s.details.as_deref())
                .and_then(|d| serde_json::from_str(d).ok()),
            checked_at: latest.map(|s| s.checked_at),
            uptime,
        })
    }

    /// Recent probe history, newest first.
    pub async fn history(&self, instance_id: i64, limit: i64) -> PodbaseResult<Vec<HealthSample>> {
        store::list_health_samples(self.manager.pool(), instance_id, limit).await
    }

    /// Counts consecutive same-state probes and emits one event per
    /// sustained healthy<->unhealthy flip.
    async fn track_streak(&self, instance_id: i64, state: HealthState) {
        let threshold = *self.manager.config().get_health_failure_threshold();
        let mut streaks = self.streaks.write().await;
        let streak = streaks.entry(instance_id).or_default();

        if streak.state == Some(state) {
            streak.count += 1;
        } else {
            *streak = Streak {
                state: Some(state),
                count: 1,
                reported: false,
            };
        }

        let flip_worthy = matches!(state, HealthState::Healthy | HealthState::Unhealthy);
        if flip_worthy && streak.count >= threshold && !streak.reported {
            streak.reported = true;
            info!(instance_id, state = %state, count = streak.count, "sustained health change");
            let _ = self
                .events
                .send(HealthEvent { instance_id, state })
                .await;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_counts_reset_on_state_change() {
        let mut streak = Streak::default();
        for state in [
            HealthState::Healthy,
            HealthState::Healthy,
            HealthState::Unhealthy,
        ] {
            if streak.state == Some(state) {
                streak.count += 1;
            } else {
                streak = Streak {
                    state: Some(state),
                    count: 1,
                    reported: false,
                };
            }
        }
        assert_eq!(streak.state, Some(HealthState::Unhealthy));
        assert_eq!(streak.count, 1);
    }
}
