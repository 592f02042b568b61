use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::facade::FollowGraph;

pub mod routes;

/// Server state
pub struct AppState {
    pub graph: FollowGraph,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/follow", post(routes::follow))
        .route("/unfollow", post(routes::unfollow))
        .route("/follows", get(routes::list_follows))
        .route("/followers", get(routes::list_followers))
        .route("/counts", get(routes::get_counts))
        .route("/export", get(routes::export_follows))
        .route("/export/followers", get(routes::export_followers))
        .route("/stats", get(routes::get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(port: u16, graph: FollowGraph) -> anyhow::Result<()> {
    let state = Arc::new(AppState { graph });
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on {}", addr);
    println!("🌍 Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
