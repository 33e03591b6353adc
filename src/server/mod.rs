pub mod handlers;
pub mod response;
pub mod state;
mod timing;

use crate::config::Config;
use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use response::{X_CACHE, X_RESPONSE_TIME};
use state::AppState;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// How often expired entries are swept from the in-process store
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route(
            "/api/v2/recommendation/product",
            get(handlers::recommendation::product)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v2/recommendation/cart",
            post(handlers::recommendation::cart)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/storefront",
            post(handlers::storefront::storefront)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v2/funnel/upsell",
            post(handlers::upsell::funnel)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/recommendations/handle",
            get(handlers::handle::missing_segments)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/recommendations/handle/",
            get(handlers::handle::missing_segments)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/recommendations/handle/{*rest}",
            get(handlers::handle::recommendations)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(cors_layer())
        .layer(middleware::from_fn(timing::stamp_response))
        .with_state(state)
}

/// Permissive CORS: the gateway is called directly from storefront pages.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::IF_NONE_MATCH,
        ])
        .expose_headers([X_CACHE, X_RESPONSE_TIME, header::ETAG])
        .max_age(Duration::from_secs(86_400))
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState::from_config(config).await?;
    spawn_purge_task(&state);
    warn!(
        "Request coalescing is per instance: concurrent misses on different instances each reach the origin"
    );

    let gateway = state.gateway.clone();
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Edge gateway listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!(
        "Draining {} pending cache writes",
        gateway.cache().pending_writes()
    );
    gateway.drain().await;
    info!("Shutdown complete");

    Ok(())
}

fn spawn_purge_task(state: &AppState) {
    let cache = state.gateway.cache().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
