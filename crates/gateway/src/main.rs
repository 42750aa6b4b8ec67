//! GeoResolve HTTP Gateway
//!
//! Accepts execution requests and runs each one with its own engine session.
//! Handles:
//! - Argument validation
//! - Rate limiting and execution concurrency limits
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    error_handling::HandleErrorLayer,
    middleware::from_fn_with_state,
    routing::{get, post},
    BoxError, Router,
};
use georesolve_common::{
    config::{AppConfig, ObservabilityConfig},
    errors::AppError,
    metrics::{self, RESOLUTION_BUCKETS},
    ModelRunner,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use middleware::rate_limit::{rate_limit_middleware, RateLimit};
use std::net::SocketAddr;
use tokio::signal;
use tower::{limit::GlobalConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runner: ModelRunner,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!("Starting GeoResolve Gateway v{}", georesolve_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let rate_limit = if config.rate_limit.enabled {
        Some(RateLimit::from_config(&config.rate_limit)?)
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let runner = ModelRunner::from_config(config).map_err(|e| {
        tracing::error!(error = %e, "Failed to initialise engine client");
        e
    })?;

    // Build the router
    let app = create_router(AppState { runner }, rate_limit);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            RESOLUTION_BUCKETS,
        )?
        .install()?;
    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState, rate_limit: Option<RateLimit>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let server = &state.runner.config().server;
    let executions = post(handlers::executions::create_execution).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_overload))
            .timeout(server.request_timeout())
            .layer(GlobalConcurrencyLimitLayer::new(
                server.max_concurrent_executions.max(1),
            )),
    );

    // API routes
    let mut api_routes = Router::new()
        .route("/validate", post(handlers::executions::validate_execution))
        .route("/executions", executions);

    if let Some(limit) = rate_limit {
        api_routes = api_routes.layer(from_fn_with_state(limit, rate_limit_middleware));
    }

    // Compose the app
    Router::new()
        // Health endpoints (never rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

async fn handle_overload(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::ServiceUnavailable {
            message: "execution did not finish within the request timeout".to_string(),
        }
    } else {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use georesolve_common::config::RateLimitConfig;
    use georesolve_common::engine::mock::MockEngine;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(engine: &MockEngine, rate_limit: Option<RateLimit>) -> Router {
        let runner = ModelRunner::new(AppConfig::default(), Arc::new(engine.clone()));
        create_router(AppState { runner }, rate_limit)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn execution(workspace: &std::path::Path, year: i32) -> Value {
        json!({
            "workspace_dir": workspace,
            "semantic_query": "im:Nature",
            "spatial_context": "EPSG:4326 POLYGON((10 45, 11 45, 11 46, 10 46, 10 45))",
            "year": year
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(&MockEngine::default(), None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_lists_candidates() {
        let response = app(&MockEngine::default(), None)
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["candidates"], json!(["remote", "local"]));
    }

    #[tokio::test]
    async fn test_validate_reports_issues() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&MockEngine::default(), None)
            .oneshot(post_json("/v1/validate", execution(dir.path(), 1899)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["valid"], false);
        assert_eq!(body["issues"][0]["field"], "year");
    }

    #[tokio::test]
    async fn test_execution_writes_result() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::default();

        let response = app(&engine, None)
            .oneshot(post_json("/v1/executions", execution(dir.path(), 2020)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["candidate"], "remote");
        assert!(dir.path().join("result.tif").exists());
        assert_eq!(engine.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_invalid_execution_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::default();

        let response = app(&engine, None)
            .oneshot(post_json("/v1/executions", execution(dir.path(), 1899)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(engine.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_maps_to_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::default();
        engine.fail_observable("no model for im:Nature");

        let response = app(&engine, None)
            .oneshot(post_json("/v1/executions", execution(dir.path(), 2020)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "OBSERVABLE_RESOLUTION_ERROR");
        assert_eq!(engine.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_only() {
        let limit = RateLimit::from_config(&RateLimitConfig {
            requests_per_second: 1,
            burst: 1,
            enabled: true,
        })
        .unwrap();
        let app = app(&MockEngine::default(), Some(limit));
        let dir = tempfile::tempdir().unwrap();

        let first = app
            .clone()
            .oneshot(post_json("/v1/validate", execution(dir.path(), 2020)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(post_json("/v1/validate", execution(dir.path(), 2020)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
