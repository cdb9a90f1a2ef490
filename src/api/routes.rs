use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use super::analytics::{
    get_browsers, get_pages, get_realtime, get_referrers, get_session, get_stats, get_trends,
    get_views,
};
use super::handlers::{health_check, list_apps, my_ip, register_view, track_event, AppState};

/// Build the public router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so handlers can
/// see the socket address.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/apps", get(list_apps))
        .route("/ip", get(my_ip))
        .route("/registerView", get(register_view))
        .route("/event", post(track_event))
        .route("/stats/{app_id}", get(get_stats))
        .route("/trends/{app_id}", get(get_trends))
        .route("/referrers/{app_id}", get(get_referrers))
        .route("/browsers/{app_id}", get(get_browsers))
        .route("/pages/{app_id}", get(get_pages))
        .route("/sessions/{app_id}/{session_id}", get(get_session))
        .route("/views/{app_id}", get(get_views))
        .route("/realtime/{app_id}", get(get_realtime))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
