//! 运维接口：强制快照与维护状态查询。

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use depot_core::SnapshotReason;
use serde_json::{json, Value};
use tracing::info;

use crate::app::middleware::RequireAdmin;
use crate::app::AppState;

/// POST /admin/snapshot - 立即安排一次快照（绕过最小间隔）
pub async fn request_snapshot(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> (StatusCode, Json<Value>) {
    state.snapshots.trigger_forced(SnapshotReason::Operator);
    info!("forced snapshot requested by operator");
    (StatusCode::ACCEPTED, Json(json!({ "status": "scheduled" })))
}

/// GET /admin/maintenance - 维护任务统计与当前跟踪的访客数
pub async fn maintenance_status(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<Value> {
    Json(json!({
        "retention": {
            "running": state.retention.is_running(),
            "stats": state.retention.stats(),
        },
        "snapshot": {
            "running": state.snapshots.is_running(),
            "stats": state.snapshots.stats(),
        },
        "tracked_visitors": state.throttler.tracked_visitors(),
    }))
}
