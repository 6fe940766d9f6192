pub mod builder;
pub mod dispatch;
pub mod error;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use wisp_core::Registry;

use builder::{BuildCoordinator, BuildHandle, BuildOptions};

/// Build the axum Router: a CORS layer and a single fallback handler that
/// dispatches every path against the registry. Used by `serve_on` and
/// available for integration testing.
pub fn build_router(registry: Arc<Registry>) -> Router {
    let app_state = state::AppState::new(registry);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .fallback(dispatch::dispatch)
        .layer(cors)
        .with_state(app_state)
}

/// Register every route that declares a build step with a fresh
/// coordinator. Each registration kicks off the route's initial build and
/// starts its source watcher.
pub fn start_builds(registry: &Registry) -> Vec<BuildHandle> {
    let coordinator = BuildCoordinator::new(BuildOptions::default());
    registry
        .routes()
        .iter()
        .filter_map(|route| coordinator.register(route))
        .collect()
}

/// Start the emulator on a pre-bound listener.
///
/// The caller binds the listener so startup validation (and the zero-route
/// exit path) happens before any socket is opened, and so `port = 0` works
/// for tests.
pub async fn serve_on(
    registry: Arc<Registry>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let port = listener.local_addr()?.port();

    // Kick off initial builds and watchers before accepting traffic. The
    // handles stay alive for the lifetime of the server.
    let _build_handles = start_builds(&registry);

    tracing::info!("wisp listening on http://localhost:{port}");

    let app = build_router(registry);
    axum::serve(listener, app).await?;
    Ok(())
}
