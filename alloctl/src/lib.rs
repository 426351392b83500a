//! # alloctl: priority allocation of scarce resources
//!
//! `alloctl` matches prioritized requests (an ICU patient, a job, a ticket) against a pool of
//! typed resources (beds, ventilators, GPUs) and serves the matching state over a small JSON API.
//!
//! ## Overview
//!
//! A request names a resource type, a priority from 1 (most urgent) to 5 and an estimated holding
//! time. If a resource of that type is available the request is allocated on intake; otherwise it
//! waits in a per-type priority queue. Releasing an allocation frees its resource and hands it to
//! the most urgent waiter of the same type, oldest first within a priority. A background
//! scheduler ages long waiters one priority step per interval and retries matching for anything
//! a concurrent pass left behind.
//!
//! ## Architecture
//!
//! - **[`engine`]**: the concurrent core. Resource pool, priority queue, allocation ledger,
//!   request lifecycle and the matcher that binds them. All state is in memory.
//! - **[`api`]**: axum handlers and wire models for `/api`
//! - **[`scheduler`]**: periodic aging and matching sweep
//! - **[`config`]**, **[`telemetry`]**, **[`metrics`]**: ambient service plumbing
//!
//! Correctness under concurrency rests on two atomic claims: a resource moves from available to
//! allocated by compare-and-swap, and a queue entry is claimed before it is served. Each of the
//! two concurrent matcher directions (a request looking for a resource, a resource looking for a
//! request) holds at most one claim at a time, so no resource or request is ever allocated twice.
//! The only nested locking is ledger then request store, taken when an allocation is recorded or
//! closed so the two always agree.
//!
//! ## Running
//!
//! ```bash
//! alloctl -f config.yaml
//! alloctl --validate
//! ```
//!
//! API documentation is served at `/docs`, health at `/healthz` and, with `enable_metrics`,
//! Prometheus metrics at `/internal/metrics`.

pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
mod openapi;
pub mod scheduler;
pub mod telemetry;
#[cfg(test)]
mod test_utils;
pub mod types;

use std::sync::Arc;

use axum::{
    Router, http,
    http::HeaderValue,
    routing::{get, post},
};
use bon::Builder;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
use config::CorsOrigin;
use engine::AllocationEngine;
use openapi::ApiDoc;
use types::ResourceType;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .engine(engine)
///     .config(config)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub engine: Arc<AllocationEngine>,
    pub config: Config,
    /// Set when `enable_metrics` is on
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Create the engine and register the resources listed in the configuration.
pub fn seed_engine(config: &Config) -> anyhow::Result<AllocationEngine> {
    let engine = AllocationEngine::new(config.engine_config()?);
    for seed in &config.resources {
        let resource_type = ResourceType::from(seed.resource_type.as_str());
        for _ in 0..seed.count {
            engine.register_resource(resource_type.clone(), None)?;
        }
        info!(resource_type = %resource_type, count = seed.count, "Seeded resources");
    }
    Ok(engine)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: the `/api` routes, health, docs, optional metrics, CORS and
/// request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/request", post(api::handlers::requests::create_request))
        .route("/requests", get(api::handlers::requests::list_requests))
        .route("/requests/{request_id}", get(api::handlers::requests::get_request))
        .route("/requests/{request_id}/cancel", post(api::handlers::requests::cancel_request))
        .route(
            "/resources",
            get(api::handlers::resources::list_resources).post(api::handlers::resources::create_resource),
        )
        .route(
            "/resources/{resource_id}/offline",
            post(api::handlers::resources::set_resource_offline),
        )
        .route(
            "/resources/{resource_id}/online",
            post(api::handlers::resources::set_resource_online),
        )
        .route("/allocations", get(api::handlers::allocations::list_allocations))
        .route("/allocations/history", get(api::handlers::allocations::allocation_history))
        .route("/release", post(api::handlers::allocations::release_allocation))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if let Some(handle) = state.metrics_handle.clone() {
        // Gauges are refreshed on scrape too, so they are current with the scheduler disabled
        let engine = state.engine.clone();
        router = router.route(
            "/internal/metrics",
            get(move || async move {
                crate::metrics::record_engine_stats(&engine.stats());
                handle.render()
            }),
        );
    }

    let cors_layer = create_cors_layer(&state.config)?;
    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// When dropped, `drop_guard` cancels the shutdown token so tasks stop even without an explicit
/// [`shutdown`](BackgroundServices::shutdown).
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(engine: Arc<AllocationEngine>, config: &Config) -> BackgroundServices {
    let shutdown_token = CancellationToken::new();
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.scheduler.enabled {
        background_tasks.push(tokio::spawn(scheduler::run_scheduler(
            engine,
            config.scheduler.interval,
            shutdown_token.clone(),
        )));
    } else {
        info!("Allocation scheduler disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Seed the engine, start background services and build the router.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting alloctl with configuration: {:#?}", config);

        let engine = Arc::new(seed_engine(&config)?);
        let metrics_handle = config
            .enable_metrics
            .then(crate::metrics::get_or_install_prometheus_handle);

        let bg_services = setup_background_services(engine.clone(), &config);

        let app_state = AppState::builder()
            .engine(engine)
            .config(config.clone())
            .maybe_metrics_handle(metrics_handle)
            .build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "alloctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSeed;
    use crate::test_utils::*;

    #[test_log::test(tokio::test)]
    async fn test_healthz() {
        let (app, _bg_services) = create_test_app().await;
        let response = app.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[test_log::test(tokio::test)]
    async fn test_docs_are_served() {
        let (app, _bg_services) = create_test_app().await;
        app.get("/docs").await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_route_only_when_enabled() {
        let (app, _bg_services) = create_test_app().await;
        app.get("/internal/metrics").await.assert_status_not_found();

        let mut config = create_test_config();
        config.enable_metrics = true;
        let (app, _bg_services) = Application::new(config).unwrap().into_test_server();

        app.post("/api/request").json(&serde_json::json!({})).await;
        let response = app.get("/internal/metrics").await;
        response.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_scrape_reports_current_pool() {
        let mut config = create_test_config();
        config.enable_metrics = true;
        config.default_resource_type = "scrape_bed".to_string();
        config.resources = vec![ResourceSeed {
            resource_type: "scrape_bed".to_string(),
            count: 2,
        }];
        assert!(!config.scheduler.enabled);
        let (app, _bg_services) = Application::new(config).unwrap().into_test_server();

        app.post("/api/request")
            .json(&serde_json::json!({}))
            .await
            .assert_status(http::StatusCode::CREATED);

        let body = app.get("/internal/metrics").await.text();
        assert!(body.contains(r#"alloctl_resources{resource_type="scrape_bed",status="allocated"} 1"#), "{body}");
        assert!(body.contains(r#"alloctl_resources{resource_type="scrape_bed",status="available"} 1"#), "{body}");
    }

    #[test]
    fn test_seed_engine_registers_configured_resources() {
        let config = Config {
            resources: vec![
                ResourceSeed {
                    resource_type: "bed".to_string(),
                    count: 2,
                },
                ResourceSeed {
                    resource_type: "gpu".to_string(),
                    count: 1,
                },
            ],
            default_resource_type: "bed".to_string(),
            ..Default::default()
        };

        let engine = seed_engine(&config).unwrap();
        let labels: Vec<_> = engine.list_resources().into_iter().map(|r| r.label).collect();
        assert_eq!(labels, vec!["bed-1", "bed-2", "gpu-1"]);
    }

    #[test]
    fn test_cors_layer_accepts_configured_origins() {
        let mut config = Config::default();
        config.cors.allowed_origins = vec![CorsOrigin::Url("https://beds.example.com".parse().unwrap())];
        assert!(create_cors_layer(&config).is_ok());

        config.cors.allowed_origins.push(CorsOrigin::Wildcard);
        assert!(create_cors_layer(&config).is_ok());
    }

    #[tokio::test]
    async fn test_background_services_stop_on_shutdown() {
        let config = Config::default();
        let engine = Arc::new(seed_engine(&config).unwrap());
        let bg_services = setup_background_services(engine, &config);
        assert_eq!(bg_services.background_tasks.len(), 1);

        tokio::time::timeout(std::time::Duration::from_secs(5), bg_services.shutdown())
            .await
            .expect("background services did not stop");
    }
}
