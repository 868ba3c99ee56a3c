use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Pin, PinRepo, PresenceRepo, ResidentProfile, ResidentRepo, SellerPresence, StatusChange, Store,
    StoreError,
};

/// 内存实现，语义与 Postgres 实现一致。
/// 每个操作在一次持锁期间完成，对应单文档原子更新。
#[derive(Default)]
pub struct MemoryStore {
    presence: Mutex<HashMap<String, SellerPresence>>,
    residents: Mutex<HashMap<String, ResidentProfile>>,
    pins: Mutex<HashMap<String, Pin>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned(what: &str) -> StoreError {
        StoreError::Unavailable(format!("{} lock poisoned", what))
    }
}

#[async_trait]
impl PresenceRepo for MemoryStore {
    async fn get_presence(&self, seller_id: &str) -> Result<Option<SellerPresence>, StoreError> {
        let map = self
            .presence
            .lock()
            .map_err(|_| Self::lock_poisoned("presence"))?;
        Ok(map.get(seller_id).cloned())
    }

    async fn list_presence(&self) -> Result<Vec<SellerPresence>, StoreError> {
        let map = self
            .presence
            .lock()
            .map_err(|_| Self::lock_poisoned("presence"))?;
        Ok(map.values().filter(|r| r.is_live).cloned().collect())
    }

    async fn set_status(
        &self,
        seller_id: &str,
        display_name: &str,
        change: StatusChange,
    ) -> Result<SellerPresence, StoreError> {
        let now = Utc::now();
        let mut map = self
            .presence
            .lock()
            .map_err(|_| Self::lock_poisoned("presence"))?;

        let record = map
            .entry(seller_id.to_string())
            .or_insert_with(|| SellerPresence {
                seller_id: seller_id.to_string(),
                display_name: String::new(),
                is_live: false,
                latitude: None,
                longitude: None,
                live_since: None,
                last_ping_at: now,
                votes: 0,
                voter_fingerprints: Vec::new(),
                verified_at: None,
            });

        record.display_name = display_name.to_string();
        match change {
            StatusChange::Live {
                latitude,
                longitude,
            } => {
                // 离线转在线才开启新会话
                if !record.is_live {
                    record.live_since = Some(now);
                }
                record.is_live = true;
                record.latitude = Some(latitude);
                record.longitude = Some(longitude);
            }
            StatusChange::Off => {
                record.is_live = false;
                record.latitude = None;
                record.longitude = None;
                record.live_since = None;
            }
        }
        record.last_ping_at = now;

        Ok(record.clone())
    }

    async fn record_ping(
        &self,
        seller_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<SellerPresence, StoreError> {
        let mut map = self
            .presence
            .lock()
            .map_err(|_| Self::lock_poisoned("presence"))?;

        let record = map.get_mut(seller_id).ok_or(StoreError::NotFound)?;
        if !record.is_live {
            return Err(StoreError::NotLive);
        }
        record.latitude = Some(latitude);
        record.longitude = Some(longitude);
        record.last_ping_at = Utc::now();

        Ok(record.clone())
    }

    async fn append_vote(
        &self,
        seller_id: &str,
        fingerprint: &str,
    ) -> Result<SellerPresence, StoreError> {
        let mut map = self
            .presence
            .lock()
            .map_err(|_| Self::lock_poisoned("presence"))?;

        let record = map.get_mut(seller_id).ok_or(StoreError::NotFound)?;
        if record.has_voted(fingerprint) {
            return Err(StoreError::AlreadyVoted);
        }
        record.voter_fingerprints.push(fingerprint.to_string());
        record.votes += 1;
        if record.verified_at.is_none() {
            record.verified_at = Some(Utc::now());
        }

        Ok(record.clone())
    }
}

#[async_trait]
impl ResidentRepo for MemoryStore {
    async fn upsert_sharing(
        &self,
        username: &str,
        display_name: &str,
        badge_count: i32,
        share_enabled: bool,
        location: Option<(f64, f64)>,
    ) -> Result<ResidentProfile, StoreError> {
        let mut map = self
            .residents
            .lock()
            .map_err(|_| Self::lock_poisoned("residents"))?;

        let profile = ResidentProfile {
            username: username.to_lowercase(),
            display_name: display_name.to_string(),
            badge_count,
            share_enabled,
            latitude: location.map(|(lat, _)| lat),
            longitude: location.map(|(_, lng)| lng),
            updated_at: Utc::now(),
        };
        map.insert(profile.username.clone(), profile.clone());

        Ok(profile)
    }

    async fn list_shared(&self) -> Result<Vec<ResidentProfile>, StoreError> {
        let map = self
            .residents
            .lock()
            .map_err(|_| Self::lock_poisoned("residents"))?;
        Ok(map
            .values()
            .filter(|p| p.share_enabled && p.latitude.is_some() && p.longitude.is_some())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PinRepo for MemoryStore {
    async fn insert_pin(&self, pin: Pin) -> Result<Pin, StoreError> {
        let mut map = self.pins.lock().map_err(|_| Self::lock_poisoned("pins"))?;
        map.insert(pin.pin_id.clone(), pin.clone());
        Ok(pin)
    }

    async fn list_open_pins(&self, now: DateTime<Utc>) -> Result<Vec<Pin>, StoreError> {
        let map = self.pins.lock().map_err(|_| Self::lock_poisoned("pins"))?;
        Ok(map.values().filter(|p| p.is_open(now)).cloned().collect())
    }

    async fn vote_pin(
        &self,
        pin_id: &str,
        fingerprint: &str,
        upvote: bool,
    ) -> Result<Pin, StoreError> {
        let mut map = self.pins.lock().map_err(|_| Self::lock_poisoned("pins"))?;

        let pin = map.get_mut(pin_id).ok_or(StoreError::NotFound)?;
        if pin.vote_of(fingerprint).is_some() {
            return Err(StoreError::AlreadyVoted);
        }
        if upvote {
            pin.up_voters.push(fingerprint.to_string());
            pin.upvotes += 1;
        } else {
            pin.down_voters.push(fingerprint.to_string());
            pin.downvotes += 1;
        }

        Ok(pin.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
