use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::middleware::Fingerprint;
use crate::store::StoreError;
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

use super::model;

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub seller_id: String,
}

#[axum::debug_handler]
pub async fn cast_vote(
    State(state): State<AppState>,
    Extension(fingerprint): Extension<Fingerprint>,
    Json(req): Json<CastVoteRequest>,
) -> impl IntoResponse {
    // 指纹是唯一的防滥用信号，没有指纹的请求直接拒绝
    let fingerprint = match fingerprint.0.as_deref() {
        Some(fp) if !fp.is_empty() => fp.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(
                    error_codes::MISSING_FINGERPRINT,
                    "缺少请求指纹".to_string(),
                ),
            )
                .into_response();
        }
    };

    match model::submit_vote(&state, &req.seller_id, &fingerprint).await {
        Ok(receipt) => (StatusCode::OK, success_to_api_response(receipt)).into_response(),
        Err(StoreError::AlreadyVoted) => (
            StatusCode::CONFLICT,
            error_to_api_response::<()>(error_codes::ALREADY_VOTED, "已经投过票".to_string()),
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
