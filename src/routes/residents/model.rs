use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::store::{ResidentProfile, ResidentRepo, StoreError};

/// 共享位置快照里的一条居民记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedResident {
    pub username: String,
    pub display_name: String,
    pub badge_count: i32,
    pub latitude: f64,
    pub longitude: f64,
}

impl SharedResident {
    /// 没有有效坐标或未开启共享的档案不会出现在快照里
    pub fn from_profile(profile: &ResidentProfile) -> Option<Self> {
        if !profile.share_enabled {
            return None;
        }
        match (profile.latitude, profile.longitude) {
            (Some(latitude), Some(longitude))
                if latitude.is_finite() && longitude.is_finite() =>
            {
                Some(Self {
                    username: profile.username.clone(),
                    display_name: profile.display_name.clone(),
                    badge_count: profile.badge_count,
                    latitude,
                    longitude,
                })
            }
            _ => None,
        }
    }
}

pub async fn shared_snapshot(state: &AppState) -> Result<Vec<SharedResident>, StoreError> {
    let profiles = state.store.list_shared().await?;
    Ok(profiles
        .iter()
        .filter_map(SharedResident::from_profile)
        .collect())
}
