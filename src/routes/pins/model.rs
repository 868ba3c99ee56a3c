use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::store::{Pin, PinRepo, StoreError};

pub const PIN_BODY_MAX_CHARS: usize = 500;
const PIN_MIN_TTL_SECS: u64 = 60;

/// 对外展示的留言钉视图，带请求方自己的投票方向
#[derive(Debug, Serialize, Deserialize)]
pub struct PinView {
    pub pin_id: String,
    pub body: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub upvotes: i32,
    pub downvotes: i32,
    /// "up" / "down"，未投过为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_vote: Option<String>,
}

impl PinView {
    pub fn project(pin: &Pin, fingerprint: Option<&str>) -> Self {
        let my_vote = fingerprint.and_then(|fp| pin.vote_of(fp)).map(|up| {
            if up {
                "up".to_string()
            } else {
                "down".to_string()
            }
        });
        Self {
            pin_id: pin.pin_id.clone(),
            body: pin.body.clone(),
            latitude: pin.latitude,
            longitude: pin.longitude,
            created_at: pin.created_at,
            expires_at: pin.expires_at,
            upvotes: pin.upvotes,
            downvotes: pin.downvotes,
            my_vote,
        }
    }
}

/// 生存时间夹到允许区间内
pub fn clamp_ttl_secs(requested: Option<u64>, default_secs: u64, max_secs: u64) -> u64 {
    requested
        .unwrap_or(default_secs)
        .clamp(PIN_MIN_TTL_SECS, max_secs)
}

pub async fn create_pin(
    state: &AppState,
    body: String,
    latitude: f64,
    longitude: f64,
    ttl_secs: Option<u64>,
) -> Result<Pin, StoreError> {
    let now = Utc::now();
    let ttl = clamp_ttl_secs(
        ttl_secs,
        state.config.pin_default_ttl_secs,
        state.config.pin_max_ttl_secs,
    );

    let pin = Pin {
        pin_id: Uuid::new_v4().to_string(),
        body,
        latitude,
        longitude,
        created_at: now,
        expires_at: now + chrono::Duration::seconds(ttl as i64),
        upvotes: 0,
        downvotes: 0,
        up_voters: Vec::new(),
        down_voters: Vec::new(),
    };

    state.store.insert_pin(pin).await
}
