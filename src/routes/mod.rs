use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::AppState;
use crate::store::Store;
use crate::utils::success_to_api_response;

pub mod pins;
pub mod presence;
pub mod residents;
pub mod trust;

/// Ping响应
#[derive(Serialize)]
pub struct PingResponse {
    /// 服务状态
    pub status: String,
    /// 服务器时间
    pub timestamp: i64,
}

/// 健康检查接口
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let status = match state.store.health_check().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!("store health check failed: {}", e);
            "degraded".to_string()
        }
    };

    (
        StatusCode::OK,
        success_to_api_response(PingResponse {
            status,
            timestamp: now.timestamp(),
        }),
    )
}
