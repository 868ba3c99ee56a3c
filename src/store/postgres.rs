use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Executor;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{
    Pin, PinRepo, PresenceRepo, ResidentProfile, ResidentRepo, SellerPresence, StatusChange, Store,
    StoreError,
};

/// Postgres 实现。所有写操作都是同一行上的单条语句，
/// 依赖行级原子性，不做读出整行再写回。
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET application_name = 'placeboard_backend';")
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PresenceRepo for PgStore {
    async fn get_presence(&self, seller_id: &str) -> Result<Option<SellerPresence>, StoreError> {
        let record = sqlx::query_as::<_, SellerPresence>(
            r#"
            SELECT seller_id, display_name, is_live, latitude, longitude,
                   live_since, last_ping_at, votes, voter_fingerprints, verified_at
            FROM seller_presence
            WHERE seller_id = $1
            "#,
        )
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_presence(&self) -> Result<Vec<SellerPresence>, StoreError> {
        let records = sqlx::query_as::<_, SellerPresence>(
            r#"
            SELECT seller_id, display_name, is_live, latitude, longitude,
                   live_since, last_ping_at, votes, voter_fingerprints, verified_at
            FROM seller_presence
            WHERE is_live
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_status(
        &self,
        seller_id: &str,
        display_name: &str,
        change: StatusChange,
    ) -> Result<SellerPresence, StoreError> {
        let record = if let StatusChange::Live {
            latitude,
            longitude,
        } = change
        {
            // 在线转在线保留 live_since，离线转在线重置为 NOW()
            sqlx::query_as::<_, SellerPresence>(
                r#"
                INSERT INTO seller_presence
                    (seller_id, display_name, is_live, latitude, longitude, live_since, last_ping_at)
                VALUES ($1, $2, TRUE, $3, $4, NOW(), NOW())
                ON CONFLICT (seller_id) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    is_live = TRUE,
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    live_since = CASE WHEN seller_presence.is_live
                                      THEN seller_presence.live_since
                                      ELSE NOW() END,
                    last_ping_at = NOW()
                RETURNING seller_id, display_name, is_live, latitude, longitude,
                          live_since, last_ping_at, votes, voter_fingerprints, verified_at
                "#,
            )
            .bind(seller_id)
            .bind(display_name)
            .bind(latitude)
            .bind(longitude)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, SellerPresence>(
                r#"
                INSERT INTO seller_presence
                    (seller_id, display_name, is_live, latitude, longitude, live_since, last_ping_at)
                VALUES ($1, $2, FALSE, NULL, NULL, NULL, NOW())
                ON CONFLICT (seller_id) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    is_live = FALSE,
                    latitude = NULL,
                    longitude = NULL,
                    live_since = NULL,
                    last_ping_at = NOW()
                RETURNING seller_id, display_name, is_live, latitude, longitude,
                          live_since, last_ping_at, votes, voter_fingerprints, verified_at
                "#,
            )
            .bind(seller_id)
            .bind(display_name)
            .fetch_one(&self.pool)
            .await?
        };

        Ok(record)
    }

    async fn record_ping(
        &self,
        seller_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<SellerPresence, StoreError> {
        // 条件更新：以存储中的 is_live 为准，而不是客户端自以为的状态
        let updated = sqlx::query_as::<_, SellerPresence>(
            r#"
            UPDATE seller_presence
            SET latitude = $2, longitude = $3, last_ping_at = NOW()
            WHERE seller_id = $1 AND is_live
            RETURNING seller_id, display_name, is_live, latitude, longitude,
                      live_since, last_ping_at, votes, voter_fingerprints, verified_at
            "#,
        )
        .bind(seller_id)
        .bind(latitude)
        .bind(longitude)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => match self.get_presence(seller_id).await? {
                Some(_) => Err(StoreError::NotLive),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn append_vote(
        &self,
        seller_id: &str,
        fingerprint: &str,
    ) -> Result<SellerPresence, StoreError> {
        // 集合追加、计数加一、首票时间戳必须在一条语句里完成，
        // 并发投票下才能保证 votes == |voter_fingerprints|
        let updated = sqlx::query_as::<_, SellerPresence>(
            r#"
            UPDATE seller_presence
            SET voter_fingerprints = array_append(voter_fingerprints, $2),
                votes = votes + 1,
                verified_at = COALESCE(verified_at, NOW())
            WHERE seller_id = $1 AND NOT ($2 = ANY(voter_fingerprints))
            RETURNING seller_id, display_name, is_live, latitude, longitude,
                      live_since, last_ping_at, votes, voter_fingerprints, verified_at
            "#,
        )
        .bind(seller_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => match self.get_presence(seller_id).await? {
                Some(_) => Err(StoreError::AlreadyVoted),
                None => Err(StoreError::NotFound),
            },
        }
    }
}

#[async_trait]
impl ResidentRepo for PgStore {
    async fn upsert_sharing(
        &self,
        username: &str,
        display_name: &str,
        badge_count: i32,
        share_enabled: bool,
        location: Option<(f64, f64)>,
    ) -> Result<ResidentProfile, StoreError> {
        let (latitude, longitude) = match location {
            Some((lat, lng)) => (Some(lat), Some(lng)),
            None => (None, None),
        };

        let profile = sqlx::query_as::<_, ResidentProfile>(
            r#"
            INSERT INTO resident_profiles
                (username, display_name, badge_count, share_enabled, latitude, longitude, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (username) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                badge_count = EXCLUDED.badge_count,
                share_enabled = EXCLUDED.share_enabled,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                updated_at = NOW()
            RETURNING username, display_name, badge_count, share_enabled,
                      latitude, longitude, updated_at
            "#,
        )
        .bind(username.to_lowercase())
        .bind(display_name)
        .bind(badge_count)
        .bind(share_enabled)
        .bind(latitude)
        .bind(longitude)
        .fetch_one(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn list_shared(&self) -> Result<Vec<ResidentProfile>, StoreError> {
        let profiles = sqlx::query_as::<_, ResidentProfile>(
            r#"
            SELECT username, display_name, badge_count, share_enabled,
                   latitude, longitude, updated_at
            FROM resident_profiles
            WHERE share_enabled AND latitude IS NOT NULL AND longitude IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }
}

#[async_trait]
impl PinRepo for PgStore {
    async fn insert_pin(&self, pin: Pin) -> Result<Pin, StoreError> {
        let created = sqlx::query_as::<_, Pin>(
            r#"
            INSERT INTO pins
                (pin_id, body, latitude, longitude, created_at, expires_at,
                 upvotes, downvotes, up_voters, down_voters)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, '{}', '{}')
            RETURNING pin_id, body, latitude, longitude, created_at, expires_at,
                      upvotes, downvotes, up_voters, down_voters
            "#,
        )
        .bind(&pin.pin_id)
        .bind(&pin.body)
        .bind(pin.latitude)
        .bind(pin.longitude)
        .bind(pin.created_at)
        .bind(pin.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn list_open_pins(&self, now: DateTime<Utc>) -> Result<Vec<Pin>, StoreError> {
        let pins = sqlx::query_as::<_, Pin>(
            r#"
            SELECT pin_id, body, latitude, longitude, created_at, expires_at,
                   upvotes, downvotes, up_voters, down_voters
            FROM pins
            WHERE expires_at > $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(pins)
    }

    async fn vote_pin(
        &self,
        pin_id: &str,
        fingerprint: &str,
        upvote: bool,
    ) -> Result<Pin, StoreError> {
        // 两个方向共用一次去重判断，指纹在任一集合中都算已投
        let updated = sqlx::query_as::<_, Pin>(
            r#"
            UPDATE pins
            SET up_voters = CASE WHEN $3 THEN array_append(up_voters, $2) ELSE up_voters END,
                down_voters = CASE WHEN $3 THEN down_voters ELSE array_append(down_voters, $2) END,
                upvotes = upvotes + CASE WHEN $3 THEN 1 ELSE 0 END,
                downvotes = downvotes + CASE WHEN $3 THEN 0 ELSE 1 END
            WHERE pin_id = $1 AND NOT ($2 = ANY(up_voters || down_voters))
            RETURNING pin_id, body, latitude, longitude, created_at, expires_at,
                      upvotes, downvotes, up_voters, down_voters
            "#,
        )
        .bind(pin_id)
        .bind(fingerprint)
        .bind(upvote)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(pin) => Ok(pin),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM pins WHERE pin_id = $1)",
                )
                .bind(pin_id)
                .fetch_one(&self.pool)
                .await?;

                if exists {
                    Err(StoreError::AlreadyVoted)
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
