use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::store::{PresenceRepo, SellerPresence, StoreError};

/// 投票结果回执
#[derive(Debug, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub votes: i32,
    pub is_community_verified: bool,
}

impl From<&SellerPresence> for VoteReceipt {
    fn from(record: &SellerPresence) -> Self {
        Self {
            votes: record.votes,
            is_community_verified: record.votes > 0,
        }
    }
}

/// 给摊主追加一张信任票。
/// 去重以存储里的最新状态为准而不是任何缓存，重试不会重复计票；
/// 集合追加与计数加一由存储层在同一条记录上原子完成。
pub async fn submit_vote(
    state: &AppState,
    seller_id: &str,
    fingerprint: &str,
) -> Result<VoteReceipt, StoreError> {
    let record = state.store.append_vote(seller_id, fingerprint).await?;

    // 票数出现在在线列表里，变更后清缓存
    crate::routes::presence::invalidate_live_cache(&state.redis).await;

    Ok(VoteReceipt::from(&record))
}
