// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `kiln serve` command implementation.
//!
//! Wires the full pool manager: SQLite store, allocation, warmup, health,
//! rotation and tier services, the cron-driven maintenance runner, the
//! Prometheus recorder, and the HTTP gateway. Supports graceful shutdown
//! via signal handlers.

use std::sync::Arc;
use std::time::Duration;

use kiln_config::model::KilnConfig;
use kiln_core::error::Result;
use kiln_core::types::{FollowupStatus, LifecycleState, PoolSummary};
use kiln_core::IdentityStore;
use kiln_gateway::{AuthConfig, GatewayState, HealthState, ServerConfig, Services};
use kiln_metrics::PrometheusExporter;
use kiln_pool::{
    install_signal_handler, Allocator, EventIngestor, HealthChecker, MaintenanceRunner, Rotator,
    TierManager, WarmupRunner,
};
use kiln_storage::SqliteStore;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cadence of the pool composition gauge export.
const GAUGE_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the `kiln serve` command.
pub async fn run(config: KilnConfig) -> Result<()> {
    init_tracing(&config.service.log_level);

    info!(name = config.service.name.as_str(), "starting kiln serve");

    // Storage.
    let store: Arc<dyn IdentityStore> = {
        let store = SqliteStore::new(config.storage.clone());
        store.initialize().await?;
        Arc::new(store)
    };

    // Requeue follow-ups a previous process left locked (crash recovery).
    let requeued = store.requeue_stale_followups().await?;
    if requeued > 0 {
        info!(count = requeued, "requeued stale follow-ups");
    }

    // Install the Prometheus recorder. Metrics are optional; the pool
    // keeps running without them.
    let exporter = match PrometheusExporter::new() {
        Ok(exporter) => Some(exporter),
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    };
    let prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>> =
        exporter.as_ref().map(|exporter| {
            let handle = exporter.handle().clone();
            Arc::new(move || handle.render()) as Arc<dyn Fn() -> String + Send + Sync>
        });

    // Service graph.
    let allocator = Allocator::new(config.pool.clone(), store.clone());
    let rotator = Arc::new(Rotator::new(config.pool.clone(), store.clone()));
    let checker = Arc::new(HealthChecker::new(store.clone(), rotator.clone()));
    let ingestor = EventIngestor::new(store.clone(), checker.clone());
    let warmups = Arc::new(WarmupRunner::new(store.clone()));
    let tiers = Arc::new(TierManager::new(store.clone()));

    let runner = MaintenanceRunner::new(
        &config.maintenance,
        &config.pool,
        store.clone(),
        checker.clone(),
        warmups.clone(),
        tiers.clone(),
    )?;

    if config.gateway.auth_token.is_none() {
        warn!(
            "gateway.auth_token is not set -- /v1 requests are rejected until one is configured"
        );
    }

    // Install signal handler.
    let cancel = install_signal_handler();

    // Spawn the pool gauge monitor.
    {
        let monitor_store = store.clone();
        let monitor_cancel = cancel.clone();
        tokio::spawn(async move {
            pool_gauge_monitor(monitor_store, monitor_cancel).await;
        });
    }

    // Spawn the maintenance scheduler.
    let maintenance_handle = {
        let maintenance_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(maintenance_cancel).await {
                error!(error = %e, "maintenance runner stopped with error");
            }
        })
    };

    let services = Arc::new(Services {
        store: store.clone(),
        allocator,
        events: ingestor,
        warmups,
        tiers,
        rotator,
    });
    let state = GatewayState {
        services,
        auth: AuthConfig {
            auth_token: config.gateway.auth_token.clone(),
        },
        health: HealthState {
            start_time: std::time::Instant::now(),
            prometheus_render,
        },
    };
    let server_config = ServerConfig {
        bind_address: config.gateway.bind_address.clone(),
        port: config.gateway.port,
    };

    // Serves until the cancellation token fires.
    kiln_gateway::start_server(&server_config, state, cancel.clone()).await?;

    // The maintenance task watches the same token; wait for its current
    // tick to finish.
    if let Err(e) = maintenance_handle.await {
        warn!(error = %e, "maintenance task join failed");
    }

    info!("kiln serve shutdown complete");
    Ok(())
}

/// Periodically export pool composition gauges for Prometheus.
async fn pool_gauge_monitor(store: Arc<dyn IdentityStore>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(GAUGE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = export_pool_gauges(store.as_ref()).await {
                    debug!(error = %e, "pool gauge export failed");
                }
            }
            _ = cancel.cancelled() => {
                debug!("pool gauge monitor shutting down");
                break;
            }
        }
    }
}

async fn export_pool_gauges(store: &dyn IdentityStore) -> Result<()> {
    let records = store.list_identities(None).await?;
    let summary = PoolSummary::from_records(&records);
    // Every state is written each pass so a count that drops to zero does
    // not leave a stale gauge behind.
    for state in LifecycleState::iter() {
        let count = summary.by_state.get(&state).copied().unwrap_or(0);
        kiln_metrics::set_pool_state(&state.to_string(), count as f64);
    }
    kiln_metrics::set_pool_available(summary.available as f64);
    kiln_metrics::set_pool_assigned(summary.assigned as f64);
    let pending = store.count_followups(FollowupStatus::Pending).await?;
    kiln_metrics::set_followup_backlog(pending as f64);
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,kiln={log_level},kiln_config={log_level},kiln_core={log_level},\
             kiln_storage={log_level},kiln_pool={log_level},kiln_gateway={log_level},\
             kiln_metrics={log_level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
