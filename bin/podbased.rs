use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use podbase::config::PodbaseConfig;
use podbase::health::{HealthEvent, HealthMonitor};
use podbase::lifecycle::LifecycleManager;
use podbase::metrics::MetricsSampler;
use podbase::models::HealthState;
use podbase::orchestrator::Orchestrator;
use podbase::server::{self, ServerState};
use podbase::snapshot::SnapshotService;
use podbase::store;
use podbase::vnet::VnetAllocator;
use podbase::PodbaseResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `podbased` is the podbase control-plane daemon.
#[derive(Debug, Parser)]
#[command(name = "podbased", author, version)]
struct PodbasedArgs {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "podbase.yaml")]
    config: PathBuf,

    /// The subcommand to run; defaults to serve
    #[command(subcommand)]
    subcommand: Option<PodbasedSubcommand>,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
enum PodbasedSubcommand {
    /// Run migrations, reconcile state, start monitors, and serve the API
    Serve,

    /// Apply pending schema migrations and exit
    Migrate,

    /// Roll the schema back to a target ordinal and exit
    Rollback {
        /// Target migration ordinal; 0 drops everything
        #[arg(long, default_value_t = 0)]
        to: i64,
    },

    /// Run one reconcile pass and exit
    Reconcile,
}

//--------------------------------------------------------------------------------------------------
// Main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PodbaseResult<()> {
    tracing_subscriber::fmt::init();

    let args = PodbasedArgs::parse();
    let config = PodbaseConfig::load(&args.config).await?;
    config.ensure_layout().await?;

    match args.subcommand.unwrap_or(PodbasedSubcommand::Serve) {
        PodbasedSubcommand::Migrate => {
            store::init_store(config.store_path()).await?;
            info!("migrations applied");
        }
        PodbasedSubcommand::Rollback { to } => {
            let pool = store::get_store_pool(config.store_path()).await?;
            store::rollback(&pool, to).await?;
            info!(target = to, "schema rolled back");
        }
        PodbasedSubcommand::Reconcile => {
            let manager = build_manager(&config).await?;
            manager.reconcile().await?;
            info!("reconcile pass complete");
        }
        PodbasedSubcommand::Serve => serve(config).await?,
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn build_manager(config: &PodbaseConfig) -> PodbaseResult<Arc<LifecycleManager>> {
    let pool = store::init_store(config.store_path()).await?;
    let orchestrator = Orchestrator::new(config.get_runtime_bin().clone());

    match orchestrator.runtime_version().await {
        Ok(version) => info!(%version, "container runtime detected"),
        Err(e) => warn!(error = %e, "container runtime unavailable; lifecycle calls will fail"),
    }

    let used = store::used_vnet_octets(&pool, config.get_vnet_subnet_base()).await?;
    let vnet = Arc::new(VnetAllocator::new(
        config.get_vnet_default_name().clone(),
        config.get_vnet_subnet_base().clone(),
        used,
    ));

    Ok(LifecycleManager::new(pool, config.clone(), orchestrator, vnet))
}

async fn serve(config: PodbaseConfig) -> PodbaseResult<()> {
    let manager = build_manager(&config).await?;

    // Bring persisted state back into agreement with the runtime before
    // accepting requests.
    manager.reconcile().await?;

    let snapshots = Arc::new(SnapshotService::new(Arc::clone(&manager)));
    match snapshots.reconcile_orphans().await {
        Ok(0) => {}
        Ok(dropped) => info!(dropped, "cleared orphan snapshot rows"),
        Err(e) => error!(error = %e, "snapshot reconcile failed"),
    }

    let (health_tx, mut health_rx) = mpsc::channel::<HealthEvent>(64);
    let health = HealthMonitor::new(Arc::clone(&manager), health_tx);
    let metrics = MetricsSampler::new(Arc::clone(&manager));

    tokio::spawn(Arc::clone(&health).run());
    tokio::spawn(Arc::clone(&metrics).run());

    // Sustained health flips trigger a restart only when the operator
    // enabled the policy.
    let auto_restart = *config.get_auto_restart();
    let restart_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Some(event) = health_rx.recv().await {
            if event.state == HealthState::Unhealthy {
                if !auto_restart {
                    warn!(
                        instance_id = event.instance_id,
                        "instance unhealthy; auto_restart is disabled"
                    );
                    continue;
                }
                info!(instance_id = event.instance_id, "auto-restarting unhealthy instance");
                if let Err(e) = restart_manager.restart(event.instance_id).await {
                    error!(instance_id = event.instance_id, error = %e, "auto-restart failed");
                }
            }
        }
    });

    let listen_addr = *config.get_listen_addr();
    let state = ServerState::allow_all(manager, snapshots, health, metrics);
    server::serve(state, listen_addr).await
}
