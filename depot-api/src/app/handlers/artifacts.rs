//! 构件上传/下载：上传成功后触发一次（非强制的）旧构件清理。

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use depot_core::{ArtifactInfo, ArtifactStore};
use tracing::instrument;

use crate::app::{ApiError, AppState};

#[instrument(skip_all)]
pub async fn list_artifacts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ArtifactInfo>>, ApiError> {
    let artifacts = state.store.list_all_artifacts().await?;
    Ok(Json(artifacts))
}

#[instrument(skip_all, fields(name = %name, size = body.len()))]
pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ArtifactInfo>), ApiError> {
    let info = state.store.put_artifact(&name, &body).await?;
    // 清理失败不影响本次上传
    state.retention.trigger(());
    Ok((StatusCode::CREATED, Json(info)))
}

#[instrument(skip_all, fields(name = %name))]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.store.read_artifact(&name).await?;
    let disposition = format!("attachment; filename=\"{name}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}
