//! Axum router assembly for the admin HTTP surface.
//!
//! Grounded on the teacher's `HttpApiServer` (config struct, `create_router`,
//! conditional CORS/trace layers, graceful `TcpListener::bind` + `axum::serve`)
//! with the agent/schedule/channel surface replaced by §6's five endpoints
//! and OpenAPI/Swagger dropped — nothing here calls for a generated schema
//! document.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::OrchestratorError;
use crate::Orchestrator;

use super::middleware::{auth_middleware, security_headers_middleware};
use super::routes;

/// HTTP API server configuration.
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
    /// Require a bearer token (`CADENCE_API_TOKEN`) on the mutating routes.
    pub require_auth: bool,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            enable_tracing: true,
            require_auth: true,
        }
    }
}

/// Owns the router configuration and binds it to a listener on [`start`](Self::start).
pub struct HttpApiServer {
    config: HttpApiConfig,
    orchestrator: Arc<Orchestrator>,
}

impl HttpApiServer {
    pub fn new(config: HttpApiConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self { config, orchestrator }
    }

    /// Binds and serves until the process is killed; callers that need
    /// graceful shutdown should race this against [`Orchestrator::shutdown`]
    /// at a higher level (the listener itself has no shutdown signal here,
    /// matching the teacher's `start()` shape).
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("failed to bind {addr}: {e}")))?;

        if self.config.require_auth && std::env::var("CADENCE_API_TOKEN").is_err() {
            tracing::error!(
                "require_auth is set but CADENCE_API_TOKEN is unset — all \
                 mutating admin endpoints will reject requests"
            );
        }

        tracing::info!(%addr, "admin HTTP surface listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("server error: {e}")))?;
        Ok(())
    }

    /// Builds the router without binding — used directly by tests that drive
    /// requests through `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        let read_only = Router::new()
            .route("/cadence/status", get(routes::cadence_status))
            .route("/reviewer/config", get(routes::get_reviewer_config))
            .route("/production/status", get(routes::production_status))
            .route("/queue/status", get(routes::queue_status))
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .with_state(self.orchestrator.clone());

        let mut mutating = Router::new()
            .route("/generate-episode", post(routes::generate_episode))
            .route("/reviewer/config", put(routes::put_reviewer_config))
            .route("/production/pause", post(routes::pause_production))
            .route("/production/resume", post(routes::resume_production))
            .with_state(self.orchestrator.clone());

        if self.config.require_auth {
            mutating = mutating.layer(axum::middleware::from_fn(auth_middleware));
        }

        let mut router = read_only.merge(mutating);

        router = router.layer(axum::middleware::from_fn(security_headers_middleware));

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::config::OrchestratorConfig;
    use crate::store::{SqliteStore, Store};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn setup_server() -> HttpApiServer {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = OrchestratorConfig::default();
        let capabilities = Arc::new(CapabilitySet::mock());
        let orchestrator = Orchestrator::new(config, store, capabilities);
        HttpApiServer::new(HttpApiConfig { require_auth: false, ..Default::default() }, orchestrator)
    }

    #[tokio::test]
    async fn health_route_responds_ok() {
        let server = setup_server().await;
        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn mutating_route_requires_auth_when_enabled() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = OrchestratorConfig::default();
        let capabilities = Arc::new(CapabilitySet::mock());
        let orchestrator = Orchestrator::new(config, store, capabilities);
        let server = HttpApiServer::new(HttpApiConfig { require_auth: true, ..Default::default() }, orchestrator);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/production/pause")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
