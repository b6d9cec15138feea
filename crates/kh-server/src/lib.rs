//! The KrakenHashes server process: binds the HTTP/WebSocket edge
//! (`kh-bridge::http_api`) and, in the same process, drives the background
//! components that need the live [`GatewayRegistry`] an agent's WebSocket
//! connection lives in — the task scheduler's dispatch loop, the recovery
//! sweep, and the progress/crack ingestor.
//!
//! Modeled on the teacher daemon's `run_loops`: one struct owning the wiring,
//! one `ShutdownSignal` threaded through every loop, `tokio::select!` over
//! interval ticks plus the shutdown receiver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use kh_agents::recovery::RecoveryController;
use kh_bridge::event_bus::EventBus;
use kh_bridge::gateway::GatewayRegistry;
use kh_bridge::http_api::{api_router_with_auth, ApiState};
use kh_bridge::ingest::{self, IngestReceiver};
use kh_core::config::Config;
use kh_core::store::Store;
use kh_harness::shutdown::ShutdownSignal;
use kh_ingest::ProgressIngestor;
use kh_planner::JobPlanner;
use kh_scheduler::TaskScheduler;

pub struct Server {
    config: Config,
    store: Store,
    gateway: GatewayRegistry,
    event_bus: EventBus,
    shutdown: ShutdownSignal,
    api_state: Arc<ApiState>,
    ingest_rx: IngestReceiver,
}

impl Server {
    /// Connect to Postgres, run pending migrations, and assemble the shared
    /// state every component below is built from.
    pub async fn connect(config: Config) -> Result<Self> {
        let store = Store::connect(&config.database.url, config.database.max_connections)
            .await
            .context("failed to connect to the database")?;
        store.migrate().await.context("failed to run migrations")?;

        let gateway = GatewayRegistry::new(config.gateway.clone());
        let event_bus = EventBus::new();
        let (ingest_tx, ingest_rx) = ingest::channel();

        let api_state = Arc::new(
            ApiState::new(store.clone(), gateway.clone(), event_bus.clone(), config.clone()).with_ingest(ingest_tx),
        );

        Ok(Self {
            config,
            store,
            gateway,
            event_bus,
            shutdown: ShutdownSignal::new(),
            api_state,
            ingest_rx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the HTTP listener and run every loop until `shutdown` fires.
    pub async fn run(self, api_key: Option<String>) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.server.http_host, self.config.server.http_port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        info!(%bind_addr, "API server listening");

        let allowed_origins = self.config.security.allowed_origins.clone();
        let router = api_router_with_auth(self.api_state.clone(), api_key, allowed_origins);

        let api_shutdown = self.shutdown.clone();
        let api_handle = tokio::spawn(async move {
            let mut rx = api_shutdown.subscribe();
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });

        let planner = JobPlanner::new(self.store.clone(), self.config.planner.clone());
        let scheduler = Arc::new(TaskScheduler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.config.scheduler.clone(),
            planner,
        ));
        let scheduler_handle = tokio::spawn(kh_scheduler::run(scheduler, self.shutdown.clone()));

        let recovery = RecoveryController::new(self.store.clone(), self.config.recovery.clone());
        let sweep_interval = Duration::from_secs(self.config.recovery.task_processing_timeout_secs.max(30) / 4);
        let recovery_handle = tokio::spawn(run_recovery_loop(recovery, sweep_interval, self.shutdown.clone()));

        let ingestor = ProgressIngestor::new(self.store.clone(), self.gateway.clone(), self.event_bus.clone(), self.config.recovery.clone());
        let ingest_handle = tokio::spawn(ingestor.run(self.ingest_rx, self.shutdown.clone()));

        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("shutdown signal received, draining loops");

        let _ = tokio::join!(api_handle, scheduler_handle, recovery_handle, ingest_handle);
        info!("server stopped");
        Ok(())
    }
}

/// Recovery sweeps run on a fraction of the processing timeout so overdue
/// tasks and stale agents are reclaimed well before the next one piles up.
async fn run_recovery_loop(controller: RecoveryController, sweep_every: Duration, shutdown: ShutdownSignal) {
    let mut interval = tokio::time::interval(sweep_every.max(Duration::from_secs(15)));
    interval.tick().await;
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match controller.sweep().await {
                    Ok(report) if !report.is_empty() => info!(
                        reconnects_expired = report.reconnects_expired.len(),
                        stale_agents_cleared = report.stale_agents_cleared.len(),
                        tasks_force_completed = report.tasks_force_completed.len(),
                        "recovery sweep reclaimed work"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "recovery sweep failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("recovery loop shutting down");
                break;
            }
        }
    }
}
