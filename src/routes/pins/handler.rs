use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::AppState;
use crate::middleware::Fingerprint;
use crate::store::{PinRepo, StoreError};
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

use super::model::{self, PIN_BODY_MAX_CHARS, PinView};

#[derive(Debug, Deserialize)]
pub struct CreatePinRequest {
    pub body: String,
    pub latitude: f64,
    pub longitude: f64,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VotePinRequest {
    pub pin_id: String,
    pub upvote: bool,
}

fn require_fingerprint(fingerprint: &Fingerprint) -> Result<String, axum::response::Response> {
    match fingerprint.0.as_deref() {
        Some(fp) if !fp.is_empty() => Ok(fp.to_string()),
        _ => Err((
            StatusCode::BAD_REQUEST,
            error_to_api_response::<()>(
                error_codes::MISSING_FINGERPRINT,
                "缺少请求指纹".to_string(),
            ),
        )
            .into_response()),
    }
}

#[axum::debug_handler]
pub async fn create_pin(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
    Json(req): Json<CreatePinRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_fingerprint(&fingerprint) {
        return resp;
    }

    let body = req.body.trim().to_string();
    if body.is_empty() || body.chars().count() > PIN_BODY_MAX_CHARS {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response::<()>(
                error_codes::VALIDATION_ERROR,
                format!("留言内容必须为1到{}个字符", PIN_BODY_MAX_CHARS),
            ),
        )
            .into_response();
    }

    if !(req.latitude.is_finite() && req.longitude.is_finite()) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response::<()>(error_codes::INVALID_LOCATION, "坐标无效".to_string()),
        )
            .into_response();
    }

    match model::create_pin(&state, body, req.latitude, req.longitude, req.ttl_secs).await {
        Ok(pin) => (
            StatusCode::CREATED,
            success_to_api_response(PinView::project(&pin, fingerprint.0.as_deref())),
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
pub async fn list_pins(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
) -> impl IntoResponse {
    // 过期判定在读取侧惰性完成，与在线判定同一套做法
    match state.store.list_open_pins(Utc::now()).await {
        Ok(pins) => {
            let views = pins
                .iter()
                .map(|p| PinView::project(p, fingerprint.0.as_deref()))
                .collect::<Vec<_>>();
            (StatusCode::OK, success_to_api_response(views))
        }
        Err(e) => {
            tracing::warn!("list_pins degraded to empty: {}", e);
            (
                StatusCode::OK,
                success_to_api_response(Vec::<PinView>::new()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn vote_pin(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
    Json(req): Json<VotePinRequest>,
) -> impl IntoResponse {
    let fingerprint = match require_fingerprint(&fingerprint) {
        Ok(fp) => fp,
        Err(resp) => return resp,
    };

    match state
        .store
        .vote_pin(&req.pin_id, &fingerprint, req.upvote)
        .await
    {
        Ok(pin) => (
            StatusCode::OK,
            success_to_api_response(PinView::project(&pin, Some(fingerprint.as_str()))),
        )
            .into_response(),
        Err(StoreError::AlreadyVoted) => (
            StatusCode::CONFLICT,
            error_to_api_response::<()>(error_codes::ALREADY_VOTED, "已经投过票".to_string()),
        )
            .into_response(),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response::<()>(error_codes::NOT_FOUND, "留言钉不存在".to_string()),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response::<()>(error_codes::STORE_UNAVAILABLE, e.to_string()),
        )
            .into_response(),
    }
}
