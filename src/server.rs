use axum::routing::get;
use axum::{middleware, Router};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, LimiterConfig};
use crate::error::Result;
use crate::handlers::{
    handle_panic, health_check, limiter_stats, method_not_allowed, not_found, readiness_check,
    AppState,
};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the gateway edge router.
///
/// Every route, including the JSON fallbacks, passes through the rate limiter.
pub fn create_app(limiter: RateLimiter) -> Router {
    create_app_with_timeout(limiter, DEFAULT_REQUEST_TIMEOUT)
}

pub fn create_app_with_timeout(limiter: RateLimiter, request_timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/health", get(health_check).fallback(method_not_allowed))
        .route("/ready", get(readiness_check).fallback(method_not_allowed))
        .route(
            "/rate-limit/stats",
            get(limiter_stats).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(AppState::new(limiter.clone()));

    with_edge_layers(routes, limiter, request_timeout)
}

/// Wrap `routes` in the gateway middleware chain.
///
/// Outermost first: tracing, CORS, request timeout, panic recovery, request
/// logging, rate limiting.
pub fn with_edge_layers(routes: Router, limiter: RateLimiter, request_timeout: Duration) -> Router {
    routes.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(middleware::from_fn(logging_middleware))
            .layer(middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            )),
    )
}

pub struct Server {
    limits: LimiterConfig,
    bind_addr: SocketAddr,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl Server {
    /// Validate the limiter settings without starting anything yet.
    pub fn new(config: Config) -> Result<Self> {
        let limits = config.limiter().validated()?;

        Ok(Self {
            limits,
            bind_addr: config.bind_addr,
            request_timeout: config.request_timeout,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let (limiter, janitor) = RateLimiter::start(self.limits)?;
        let limits = limiter.config();

        tracing::info!(
            address = %listener.local_addr()?,
            ip_rate = limits.ip_rate,
            ip_burst = limits.ip_burst,
            global_rate = limits.global_rate,
            global_burst = limits.global_burst,
            sweep_interval_secs = limits.sweep_interval.as_secs(),
            request_timeout_secs = self.request_timeout.as_secs(),
            "Gatekeeper listening"
        );
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        let app = create_app_with_timeout(limiter.clone(), self.request_timeout);
        let (draining_tx, draining_rx) = watch::channel(false);

        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = draining_tx.send(true);
        })
        .into_future();

        let served = tokio::select! {
            served = serve => served,
            _ = drain_deadline(draining_rx, self.shutdown_grace) => {
                tracing::warn!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Connections still open after shutdown grace period, forcing exit"
                );
                Ok(())
            }
        };

        janitor.shutdown().await;
        tracing::info!("Server exited properly");

        served?;
        Ok(())
    }
}

/// Completes `grace` after draining starts; never completes before that.
async fn drain_deadline(mut draining: watch::Receiver<bool>, grace: Duration) {
    if draining.wait_for(|started| *started).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
