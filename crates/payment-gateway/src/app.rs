//! Router assembly and server lifecycle.

use crate::config::Config;
use crate::error::AppResult;
use axum::Router;
use payment_sessions::{build_state, create_router, AppState};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the shared state and the HTTP router from configuration.
pub fn build_app(config: &Config) -> AppResult<(Router, Arc<AppState>)> {
    let state = Arc::new(build_state(config.payments.clone())?);
    Ok((router(state.clone()), state))
}

/// Payment API router with tracing and CORS layers.
pub fn router(state: Arc<AppState>) -> Router {
    create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until `shutdown` resolves, then stop all pollers.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    state.manager.shutdown().await;
    info!("Server stopped");
    Ok(())
}
