use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::store::{PresenceRepo, SellerPresence, StoreError};

// 缓存相关常量
const LIVE_LIST_CACHE_KEY: &str = "presence:live"; // 在线列表缓存键
const LIVE_LIST_CACHE_EXPIRE: u64 = 30; // 必须小于 liveness 窗口，否则会把过期在线状态缓存过头

/// 在线判定，读取时惰性求值。
/// 没有后台任务翻转 is_live：断线的摊主超出窗口后自然从读取结果消失，
/// 存储里的 is_live 可能一直是 true，以这里的判定为准。
/// 所有读取路径（列表、单查）都必须走同一个判定。
pub fn is_live_now(record: &SellerPresence, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    record.is_live && now - record.last_ping_at <= window
}

/// 对外展示的摊主视图
#[derive(Debug, Serialize, Deserialize)]
pub struct SellerView {
    pub seller_id: String,
    pub display_name: String,
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_since: Option<DateTime<Utc>>,
    pub votes: i32,
    pub is_community_verified: bool,
    pub has_voted: bool,
}

impl SellerView {
    /// 按在线判定投影；判定不通过时位置和会话开始时间一并隐藏，
    /// 避免把超窗记录里残留的字段当成在线信息泄露出去
    pub fn project(
        record: &SellerPresence,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        let live = is_live_now(record, now, window);
        Self {
            seller_id: record.seller_id.clone(),
            display_name: record.display_name.clone(),
            is_live: live,
            latitude: if live { record.latitude } else { None },
            longitude: if live { record.longitude } else { None },
            live_since: if live { record.live_since } else { None },
            votes: record.votes,
            is_community_verified: record.votes > 0,
            has_voted: fingerprint.map(|fp| record.has_voted(fp)).unwrap_or(false),
        }
    }
}

/// 在线记录快照，redis 短时缓存，去重注记留到每个请求自己算
pub async fn snapshot_live(state: &AppState) -> Result<Vec<SellerPresence>, StoreError> {
    if let Ok(mut conn) = state.redis.get_multiplexed_async_connection().await {
        let cached: redis::RedisResult<String> = conn.get(LIVE_LIST_CACHE_KEY).await;
        if let Ok(json_str) = cached {
            if let Ok(records) = serde_json::from_str::<Vec<SellerPresence>>(&json_str) {
                tracing::debug!("Get live snapshot from cache");
                return Ok(records);
            }
        }
    }

    let records = state.store.list_presence().await?;

    if let Ok(mut conn) = state.redis.get_multiplexed_async_connection().await {
        if let Ok(json_str) = serde_json::to_string(&records) {
            let _: Result<(), redis::RedisError> = conn
                .set_ex(LIVE_LIST_CACHE_KEY, json_str, LIVE_LIST_CACHE_EXPIRE)
                .await;
            tracing::debug!("Set live snapshot to cache");
        }
    }

    Ok(records)
}

/// 状态或票数变更后清掉列表缓存
pub async fn invalidate_live_cache(redis: &Arc<RedisClient>) {
    if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
        let _: Result<(), redis::RedisError> = conn.del(LIVE_LIST_CACHE_KEY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_live: bool, ping_age_secs: i64) -> SellerPresence {
        let now = Utc::now();
        SellerPresence {
            seller_id: "s1".into(),
            display_name: "烤红薯".into(),
            is_live,
            latitude: is_live.then_some(31.23),
            longitude: is_live.then_some(121.47),
            live_since: is_live.then(|| now - chrono::Duration::hours(1)),
            last_ping_at: now - chrono::Duration::seconds(ping_age_secs),
            votes: 0,
            voter_fingerprints: vec![],
            verified_at: None,
        }
    }

    #[test]
    fn live_within_window() {
        let window = chrono::Duration::minutes(3);
        assert!(is_live_now(&record(true, 120), Utc::now(), window));
    }

    #[test]
    fn lapsed_heartbeat_is_not_live_even_if_stored_live() {
        let window = chrono::Duration::minutes(3);
        assert!(!is_live_now(&record(true, 240), Utc::now(), window));
    }

    #[test]
    fn stored_offline_is_never_live() {
        let window = chrono::Duration::minutes(3);
        assert!(!is_live_now(&record(false, 0), Utc::now(), window));
    }

    #[test]
    fn lapsed_projection_hides_location_and_since() {
        let window = chrono::Duration::minutes(3);
        let view = SellerView::project(&record(true, 240), Some("fp"), Utc::now(), window);
        assert!(!view.is_live);
        assert!(view.latitude.is_none());
        assert!(view.longitude.is_none());
        assert!(view.live_since.is_none());
    }
}
