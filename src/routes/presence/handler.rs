use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::middleware::Fingerprint;
use crate::store::{PresenceRepo, StatusChange, StoreError};
use crate::utils::{Claims, error_codes, error_to_api_response, success_to_api_response};

use super::model::{self, SellerView};

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub is_live: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct SellerQuery {
    pub seller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAck {
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_since: Option<DateTime<Utc>>,
    pub last_ping_at: DateTime<Utc>,
}

fn is_finite_coords(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite() && longitude.is_finite()
}

/// 只有摊主角色能操作自己的在线状态，subject 一律取自凭证
fn require_seller(claims: &Claims) -> Result<(), (StatusCode, Json<crate::utils::ApiResponse<()>>)> {
    if claims.role == "seller" {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            error_to_api_response(error_codes::PERMISSION_DENIED, "仅摊主可操作".to_string()),
        ))
    }
}

#[axum::debug_handler]
pub async fn set_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetStatusRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_seller(&claims) {
        return resp.into_response();
    }

    let change = if req.is_live {
        match (req.latitude, req.longitude) {
            (Some(latitude), Some(longitude)) if is_finite_coords(latitude, longitude) => {
                StatusChange::Live {
                    latitude,
                    longitude,
                }
            }
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_to_api_response::<()>(
                        error_codes::INVALID_LOCATION,
                        "上线必须携带有效坐标".to_string(),
                    ),
                )
                    .into_response();
            }
        }
    } else {
        StatusChange::Off
    };

    match state
        .store
        .set_status(&claims.sub, &claims.name, change)
        .await
    {
        Ok(record) => {
            model::invalidate_live_cache(&state.redis).await;
            (
                StatusCode::OK,
                success_to_api_response(StatusAck {
                    is_live: record.is_live,
                    live_since: record.live_since,
                    last_ping_at: record.last_ping_at,
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response::<()>(error_codes::STORE_UNAVAILABLE, e.to_string()),
        )
            .into_response(),
    }
}

#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_seller(&claims) {
        return resp.into_response();
    }

    if !is_finite_coords(req.latitude, req.longitude) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response::<()>(
                error_codes::INVALID_LOCATION,
                "心跳坐标无效".to_string(),
            ),
        )
            .into_response();
    }

    match state
        .store
        .record_ping(&claims.sub, req.latitude, req.longitude)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            success_to_api_response(StatusAck {
                is_live: record.is_live,
                live_since: record.live_since,
                last_ping_at: record.last_ping_at,
            }),
        )
            .into_response(),
        // 服务端视角已经离线，客户端需要重新上线而不是继续心跳
        Err(StoreError::NotLive) => (
            StatusCode::CONFLICT,
            error_to_api_response::<()>(error_codes::NOT_LIVE, "当前不在线，请重新上线".to_string()),
        )
            .into_response(),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response::<()>(error_codes::NOT_FOUND, "摊主不存在".to_string()),
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
pub async fn list_live(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
) -> impl IntoResponse {
    let now = Utc::now();
    let window = state.config.liveness_window();

    match model::snapshot_live(&state).await {
        Ok(records) => {
            let views = records
                .iter()
                .filter(|r| model::is_live_now(r, now, window))
                .map(|r| SellerView::project(r, fingerprint.0.as_deref(), now, window))
                .collect::<Vec<_>>();
            (StatusCode::OK, success_to_api_response(views))
        }
        Err(e) => {
            // 列表是尽力而为的读取路径，失败降级为空列表
            tracing::warn!("list_live degraded to empty: {}", e);
            (
                StatusCode::OK,
                success_to_api_response(Vec::<SellerView>::new()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_seller(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
    Query(query): Query<SellerQuery>,
) -> impl IntoResponse {
    let now = Utc::now();
    let window = state.config.liveness_window();

    match state.store.get_presence(&query.seller_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            success_to_api_response(SellerView::project(
                &record,
                fingerprint.0.as_deref(),
                now,
                window,
            )),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response::<()>(error_codes::NOT_FOUND, "摊主不存在".to_string()),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response::<()>(error_codes::STORE_UNAVAILABLE, e.to_string()),
        )
            .into_response(),
    }
}
