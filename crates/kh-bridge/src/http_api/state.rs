//! Shared state handed to every HTTP/WebSocket handler.

use std::sync::Arc;
use std::time::Instant;

use kh_core::config::Config;
use kh_core::store::Store;
use kh_harness::rate_limiter::{MultiKeyRateLimiter, RateLimitConfig};

use crate::event_bus::EventBus;
use crate::filesync::FileSyncController;
use crate::gateway::GatewayRegistry;
use crate::ingest::IngestSender;

/// Everything a handler needs: the persistent store, the live agent
/// connection registry, the admin event-stream bus, and the loaded config.
pub struct ApiState {
    pub store: Store,
    pub gateway: GatewayRegistry,
    pub event_bus: EventBus,
    pub config: Config,
    pub started_at: Instant,
    pub rate_limiter: Arc<MultiKeyRateLimiter>,
    pub filesync: Arc<FileSyncController>,
    /// Set by the process wiring the ingest worker in; `None` leaves
    /// progress/crack-batch frames logged but not persisted (e.g. in tests).
    pub ingest_tx: Option<IngestSender>,
}

impl ApiState {
    pub fn new(store: Store, gateway: GatewayRegistry, event_bus: EventBus, config: Config) -> Self {
        let rate_limiter = Arc::new(MultiKeyRateLimiter::new(
            RateLimitConfig::per_minute(1000),
            RateLimitConfig::per_minute(120),
            RateLimitConfig::per_minute(60),
        ));
        let base_url = format!("http://{}:{}/resources", config.server.http_host, config.server.http_port);
        let filesync = Arc::new(FileSyncController::new(base_url, config.gateway.max_concurrent_downloads));
        Self {
            store,
            gateway,
            event_bus,
            config,
            started_at: Instant::now(),
            rate_limiter,
            filesync,
            ingest_tx: None,
        }
    }

    pub fn with_ingest(mut self, ingest_tx: IngestSender) -> Self {
        self.ingest_tx = Some(ingest_tx);
        self
    }
}
