use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::store::ResidentRepo;
use crate::utils::{Claims, error_codes, error_to_api_response, success_to_api_response};

use super::model::{self, SharedResident};

#[derive(Debug, Deserialize)]
pub struct UpdateSharingRequest {
    pub share_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub badge_count: Option<i32>,
}

/// 居民更新自己的位置共享设置，只能改自己的档案
#[axum::debug_handler]
pub async fn update_sharing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSharingRequest>,
) -> impl IntoResponse {
    let location = match (req.share_enabled, req.latitude, req.longitude) {
        (true, Some(latitude), Some(longitude))
            if latitude.is_finite() && longitude.is_finite() =>
        {
            Some((latitude, longitude))
        }
        (true, _, _) => {
            return (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(
                    error_codes::INVALID_LOCATION,
                    "开启共享必须携带有效坐标".to_string(),
                ),
            )
                .into_response();
        }
        (false, _, _) => None,
    };

    match state
        .store
        .upsert_sharing(
            &claims.sub,
            &claims.name,
            req.badge_count.unwrap_or(0),
            req.share_enabled,
            location,
        )
        .await
    {
        Ok(profile) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "share_enabled": profile.share_enabled,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response::<()>(error_codes::STORE_UNAVAILABLE, e.to_string()),
        )
            .into_response(),
    }
}

#[axum::debug_handler]
pub async fn fetch_shared(State(state): State<AppState>) -> impl IntoResponse {
    match model::shared_snapshot(&state).await {
        Ok(snapshot) => (StatusCode::OK, success_to_api_response(snapshot)),
        Err(e) => {
            // 快照读取失败降级为空，由客户端缓存兜底
            tracing::warn!("shared snapshot degraded to empty: {}", e);
            (
                StatusCode::OK,
                success_to_api_response(Vec::<SharedResident>::new()),
            )
        }
    }
}
