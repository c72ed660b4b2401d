use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{
    download_artifact, handler_404, health, list_artifacts, maintenance_status, request_snapshot,
    upload_artifact,
};
use super::middleware::throttle_middleware;
use super::state::AppState;

/// 单个构件上传的大小上限（256MB）
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Build the router with routes and middleware wired.
pub fn app_router(state: AppState) -> Router {
    // 健康检查（不参与节流）
    let public_routes = Router::new().route("/health", get(health));

    // 构件上传/下载
    let artifact_routes = Router::new()
        .route("/artifacts", get(list_artifacts))
        .route(
            "/artifacts/:name",
            get(download_artifact).put(upload_artifact),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    // 运维端点（由 RequireAdmin extractor 检查 token）
    let admin_routes = Router::new()
        .route("/admin/snapshot", post(request_snapshot))
        .route("/admin/maintenance", get(maintenance_status));

    // 每个请求先经过节流器
    Router::new()
        .merge(public_routes)
        .merge(artifact_routes)
        .merge(admin_routes)
        .fallback(handler_404)
        .layer(from_fn_with_state(state.clone(), throttle_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
