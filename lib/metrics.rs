//! The metrics sampler.
//!
//! Fuses container-runtime stats (CPU, memory) with adapter in-engine
//! metrics (connections, cache hit ratio, ...) into one sample per running
//! instance per tick. Engine fields the adapter did not report stay null so
//! consumers can distinguish "no data yet" from a real zero.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::{DEFAULT_EXEC_TIMEOUT_S, DEFAULT_METRICS_HISTORY_LIMIT, DEFAULT_PROBE_POOL_SIZE};
use crate::engine;
use crate::lifecycle::LifecycleManager;
use crate::models::{InstanceStatus, MetricsSample};
use crate::store::{self, NewMetricsSample};
use crate::PodbaseResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Current and recent samples served by the metrics endpoint.
#[derive(Debug, Serialize)]
pub struct MetricsView {
    /// The most recent sample, absent before the first tick.
    pub current: Option<MetricsSample>,
    /// Bounded recent history, oldest first.
    pub history: Vec<MetricsSample>,
}

/// The periodic metrics sampler.
pub struct MetricsSampler {
    manager: Arc<LifecycleManager>,
    pool: Arc<Semaphore>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MetricsSampler {
    /// Creates a sampler sharing the lifecycle manager's handles.
    pub fn new(manager: Arc<LifecycleManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            pool: Arc::new(Semaphore::new(DEFAULT_PROBE_POOL_SIZE)),
        })
    }

    /// Runs the sampling loop plus an hourly retention sweep until the
    /// process exits.
    pub async fn run(self: Arc<Self>) {
        let base = *self.manager.config().get_metrics_interval_s();
        let mut last_sweep = tokio::time::Instant::now();

        loop {
            let jitter = rand::thread_rng().gen_range(-(base as i64) / 10..=(base as i64) / 10);
            let tick = Duration::from_secs((base as i64 + jitter).max(1) as u64);
            tokio::time::sleep(tick).await;

            if let Err(e) = self.sample_all().await {
                error!(error = %e, "metrics sweep failed");
            }

            if last_sweep.elapsed() >= Duration::from_secs(3600) {
                last_sweep = tokio::time::Instant::now();
                let retention = *self.manager.config().get_metrics_retention_days();
                match store::sweep_metrics(self.manager.pool(), retention).await {
                    Ok(deleted) if deleted > 0 => {
                        debug!(deleted, retention_days = retention, "metrics retention sweep");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "metrics retention sweep failed"),
                }
            }
        }
    }

    /// Samples every running instance once; one sample per instance per
    /// tick regardless of how long individual probes take.
    pub async fn sample_all(self: &Arc<Self>) -> PodbaseResult<()> {
        let instances = store::list_instances(
            self.manager.pool(),
            None,
            Some(InstanceStatus::Running),
        )
        .await?;

        let mut handles = Vec::new();
        for instance in instances {
            let Ok(permit) = Arc::clone(&self.pool).try_acquire_owned() else {
                debug!(instance_id = instance.id, "sampler pool full, skipping tick");
                continue;
            };
            let sampler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = sampler.sample_one(instance.id).await {
                    warn!(instance_id = instance.id, error = %e, "metrics sample failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Collects and stores one fused sample for an instance.
    pub async fn sample_one(self: &Arc<Self>, instance_id: i64) -> PodbaseResult<()> {
        let pool = self.manager.pool();
        let Some(instance) = store::get_instance(pool, instance_id).await? else {
            return Ok(());
        };
        let adapter = engine::get_adapter(&instance.engine)?;
        if adapter.supports.embedded {
            return Ok(());
        }

        let container = instance.container_ref();
        let stats = self.manager.orchestrator().stats(&container).await?;

        let mut sample = NewMetricsSample {
            cpu_percent: stats.cpu_percent,
            memory_used_mb: stats.memory_used_mb,
            memory_limit_mb: stats.memory_limit_mb,
            memory_percent: stats.memory_percent,
            ..Default::default()
        };

        if adapter.supports.metrics {
            let ctx = instance.engine_ctx();
            let command = (adapter.metrics_cmd)(&ctx);
            if !command.is_empty() {
                match self
                    .manager
                    .orchestrator()
                    .exec(&container, &command, Duration::from_secs(DEFAULT_EXEC_TIMEOUT_S))
                    .await
                {
                    Ok(out) if out.exit_code == 0 => {
                        let engine_metrics = (adapter.parse_metrics)(&out.stdout);
                        sample.connections = engine_metrics.connections;
                        sample.active_queries = engine_metrics.active_queries;
                        sample.queries_per_sec = engine_metrics.queries_per_sec;
                        sample.cache_hit_ratio = engine_metrics.cache_hit_ratio;
                        sample.uptime_seconds = engine_metrics.uptime_seconds;
                        sample.storage_used_mb = engine_metrics.storage_used_mb;
                        if !engine_metrics.extra.is_empty() {
                            sample.extra =
                                serde_json::to_string(&engine_metrics.extra).ok();
                        }
                    }
                    Ok(out) => {
                        warn!(
                            instance_id,
                            exit_code = out.exit_code,
                            "engine metrics command failed"
                        );
                    }
                    Err(e) => {
                        warn!(instance_id, error = %e, "engine metrics collection failed");
                    }
                }
            }
        }

        store::insert_metrics_sample(pool, instance_id, &sample).await?;
        debug!(
            instance_id,
            cpu = sample.cpu_percent,
            mem = sample.memory_percent,
            "metrics sample stored"
        );
        Ok(())
    }

    /// Current + bounded history for the metrics endpoint.
    pub async fn view(&self, instance_id: i64) -> PodbaseResult<MetricsView> {
        let pool = self.manager.pool();
        let current = store::latest_metrics_sample(pool, instance_id).await?;
        let history =
            store::list_metrics_history(pool, instance_id, DEFAULT_METRICS_HISTORY_LIMIT).await?;
        Ok(MetricsView { current, history })
    }
}
