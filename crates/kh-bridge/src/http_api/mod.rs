// ---------------------------------------------------------------------------
// HTTP API module directory
// ---------------------------------------------------------------------------
//
// Domain-oriented submodules, one router built from all of them. This file
// wires the handlers together, owns the Axum router, and layers on the
// cross-cutting middleware (metrics, request IDs, auth, rate limiting, CORS).

mod agents;
mod hashlists;
mod jobs;
mod metrics;
mod settings;
pub mod state;
mod websocket;

pub use state::ApiState;
pub use self::router::{api_router, api_router_with_auth};

mod router {
    use std::sync::Arc;

    use axum::{
        routing::{get, post, put},
        Router,
    };
    use axum::middleware as axum_middleware;
    use tower_http::cors::CorsLayer;

    use kh_telemetry::middleware::metrics_middleware;
    use kh_telemetry::tracing_setup::request_id_middleware;

    use crate::auth::AuthLayer;
    use crate::rate_limit_middleware::RateLimitLayer;

    use super::{agents, hashlists, jobs, metrics, settings, websocket, ApiState};

    /// Build the full API router with all REST and WebSocket routes, no
    /// operator auth required (development mode).
    pub fn api_router(state: Arc<ApiState>) -> Router {
        api_router_with_auth(state, None, vec![])
    }

    /// Build the API router with an optional operator API key and an allowed
    /// CORS origin list.
    ///
    /// When `api_key` is `Some`, every request under the operator REST
    /// surface must carry a matching key; agent registration, the agent
    /// WebSocket, and the agent hashlist download are exempt since they
    /// authenticate with their own `(X-API-Key, X-Agent-ID)` credentials.
    pub fn api_router_with_auth(state: Arc<ApiState>, api_key: Option<String>, allowed_origins: Vec<String>) -> Router {
        let rate_limiter = state.rate_limiter.clone();

        let public_agent_routes = Router::new()
            .route("/agent/register", post(agents::register_agent))
            .route("/agent/hashlists/{id}", get(hashlists::download_uncracked_hashlist))
            .route("/ws/agent", get(websocket::agent_ws_handler));

        let operator_routes = Router::new()
            // Agents
            .route("/api/agents", get(agents::list_agents))
            .route("/api/agents/{id}", get(agents::get_agent))
            .route("/api/agents/{id}/disable", post(agents::disable_agent))
            .route("/api/agents/{id}/enable", post(agents::enable_agent))
            .route("/api/agents/{id}/devices", get(agents::list_agent_devices))
            .route("/api/agents/{id}/devices/{device_index}", put(agents::update_agent_device))
            .route(
                "/api/agents/{id}/benchmarks/{attack_mode}/{hash_type_id}",
                get(agents::get_agent_benchmark),
            )
            // Claim vouchers
            .route("/api/vouchers", post(agents::create_voucher))
            // Hashlists
            .route("/api/hashlists", get(hashlists::list_hashlists))
            .route("/api/hashlists", post(hashlists::create_hashlist))
            .route("/api/hashlists/{id}", get(hashlists::get_hashlist))
            .route("/api/hashlists/{a}/link/{b}", post(hashlists::link_hashlists))
            // Presets + job executions
            .route("/api/presets", get(jobs::list_presets))
            .route("/api/presets", post(jobs::create_preset))
            .route("/api/presets/{id}", get(jobs::get_preset))
            .route("/api/jobs", get(jobs::list_job_executions))
            .route("/api/jobs", post(jobs::create_job_execution))
            .route("/api/jobs/{id}", get(jobs::get_job_execution))
            .route("/api/jobs/{id}/tasks", get(jobs::list_job_tasks))
            .route("/api/jobs/{id}/cancel", post(jobs::cancel_job_execution))
            // Settings
            .route("/api/settings/{key}", get(settings::get_setting))
            .route("/api/settings/{key}", put(settings::put_setting))
            // Metrics
            .route("/api/metrics", get(metrics::get_metrics_prometheus))
            .route("/api/metrics/json", get(metrics::get_metrics_json))
            // Dashboard event stream
            .route("/api/events/ws", get(websocket::events_ws_handler))
            .layer(AuthLayer::new(api_key));

        public_agent_routes
            .merge(operator_routes)
            .layer(axum_middleware::from_fn(metrics_middleware))
            .layer(axum_middleware::from_fn(request_id_middleware))
            .layer(RateLimitLayer::new(rate_limiter))
            .layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::AllowOrigin::predicate(
                        move |origin: &axum::http::HeaderValue, _parts: &axum::http::request::Parts| {
                            if let Ok(origin_str) = origin.to_str() {
                                if origin_str.starts_with("http://localhost")
                                    || origin_str.starts_with("http://127.0.0.1")
                                    || origin_str.starts_with("https://localhost")
                                    || origin_str.starts_with("https://127.0.0.1")
                                {
                                    return true;
                                }
                                allowed_origins.iter().any(|allowed| origin_str == allowed)
                            } else {
                                false
                            }
                        },
                    ))
                    .allow_methods([
                        axum::http::Method::GET,
                        axum::http::Method::POST,
                        axum::http::Method::PUT,
                        axum::http::Method::DELETE,
                        axum::http::Method::PATCH,
                        axum::http::Method::OPTIONS,
                    ])
                    .allow_headers([
                        axum::http::header::CONTENT_TYPE,
                        axum::http::header::AUTHORIZATION,
                        axum::http::HeaderName::from_static("x-api-key"),
                        axum::http::HeaderName::from_static("x-agent-id"),
                    ])
                    .allow_credentials(true),
            )
            .with_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use kh_core::config::Config;
    use kh_core::store::Store;

    use crate::event_bus::EventBus;
    use crate::gateway::GatewayRegistry;

    async fn test_state() -> Arc<ApiState> {
        let config = Config::default();
        let store = Store::connect(&config.database.url, config.database.max_connections)
            .await
            .expect("test database must be reachable");
        let gateway = GatewayRegistry::new(config.gateway.clone());
        let event_bus = EventBus::new();
        Arc::new(ApiState::new(store, gateway, event_bus, config))
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres instance"]
    async fn metrics_endpoint_is_public_and_returns_ok() {
        let state = test_state().await;
        let app = api_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres instance"]
    async fn unknown_route_returns_not_found() {
        let state = test_state().await;
        let app = api_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
