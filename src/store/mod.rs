// 持久层接口：每条记录单文档原子更新，按ID点查
// 业务层只依赖这里的 trait，Postgres 与内存实现语义一致

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// 摊主在线状态记录，每个摊主一条
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SellerPresence {
    pub seller_id: String,
    pub display_name: String,
    pub is_live: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 本次在线会话的开始时间，心跳不重置，只有离线转在线才重置
    pub live_since: Option<DateTime<Utc>>,
    pub last_ping_at: DateTime<Utc>,
    /// 票数恒等于指纹集合大小，只增不减
    pub votes: i32,
    pub voter_fingerprints: Vec<String>,
    /// 首次收到投票时写入，之后不再变化
    pub verified_at: Option<DateTime<Utc>>,
}

impl SellerPresence {
    pub fn has_voted(&self, fingerprint: &str) -> bool {
        self.voter_fingerprints.iter().any(|fp| fp == fingerprint)
    }
}

/// 居民位置共享档案，username 小写存储
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResidentProfile {
    pub username: String,
    pub display_name: String,
    pub badge_count: i32,
    pub share_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// 匿名留言钉，到期后只在读取侧过滤
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pin {
    pub pin_id: String,
    pub body: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub upvotes: i32,
    pub downvotes: i32,
    pub up_voters: Vec<String>,
    pub down_voters: Vec<String>,
}

impl Pin {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// 该指纹投过的方向，未投过为 None
    pub fn vote_of(&self, fingerprint: &str) -> Option<bool> {
        if self.up_voters.iter().any(|fp| fp == fingerprint) {
            Some(true)
        } else if self.down_voters.iter().any(|fp| fp == fingerprint) {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("记录不存在")]
    NotFound,
    #[error("该指纹已经投过票")]
    AlreadyVoted,
    #[error("对方当前不在线")]
    NotLive,
    #[error("存储暂时不可用: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// 状态切换的目标：上线必须带位置，类型上排除"在线但无位置"
#[derive(Debug, Clone, Copy)]
pub enum StatusChange {
    Live { latitude: f64, longitude: f64 },
    Off,
}

#[async_trait]
pub trait PresenceRepo: Send + Sync {
    async fn get_presence(&self, seller_id: &str) -> Result<Option<SellerPresence>, StoreError>;

    async fn list_presence(&self) -> Result<Vec<SellerPresence>, StoreError>;

    /// 设置在线状态。记录不存在时隐式建档。
    /// 在线转在线保留 live_since（视为一次心跳），离线转在线重置为当前时间；
    /// 转离线清空位置与 live_since。last_ping_at 无条件更新。
    async fn set_status(
        &self,
        seller_id: &str,
        display_name: &str,
        change: StatusChange,
    ) -> Result<SellerPresence, StoreError>;

    /// 心跳：只更新位置和 last_ping_at。
    /// 以存储中的 is_live 为准，不在线返回 NotLive，不存在返回 NotFound。
    async fn record_ping(
        &self,
        seller_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<SellerPresence, StoreError>;

    /// 追加信任票：指纹入集合并加一，必须是同一条记录上的单次原子更新。
    /// 首票写入 verified_at。重复指纹返回 AlreadyVoted。
    async fn append_vote(
        &self,
        seller_id: &str,
        fingerprint: &str,
    ) -> Result<SellerPresence, StoreError>;
}

#[async_trait]
pub trait ResidentRepo: Send + Sync {
    async fn upsert_sharing(
        &self,
        username: &str,
        display_name: &str,
        badge_count: i32,
        share_enabled: bool,
        location: Option<(f64, f64)>,
    ) -> Result<ResidentProfile, StoreError>;

    /// 所有开启共享且有位置的居民
    async fn list_shared(&self) -> Result<Vec<ResidentProfile>, StoreError>;
}

#[async_trait]
pub trait PinRepo: Send + Sync {
    async fn insert_pin(&self, pin: Pin) -> Result<Pin, StoreError>;

    /// 未过期的留言钉
    async fn list_open_pins(&self, now: DateTime<Utc>) -> Result<Vec<Pin>, StoreError>;

    /// 每个指纹对每个钉只能投一票，方向一经投出不可更改
    async fn vote_pin(
        &self,
        pin_id: &str,
        fingerprint: &str,
        upvote: bool,
    ) -> Result<Pin, StoreError>;
}

/// 组合存储接口
#[async_trait]
pub trait Store: PresenceRepo + ResidentRepo + PinRepo + Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;
}
