//! 共享位置缓存测试：TTL、强制刷新、并发合并、乐观写入

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backend::client::{BoardApi, ClientError, Coordinates, LocalShare, SharedLocationCache};
use backend::routes::presence::StatusAck;
use backend::routes::residents::SharedResident;

/// 桩 API：fetch_shared_locations 计数并带可配置延迟
struct SnapshotApi {
    snapshot: Mutex<Vec<SharedResident>>,
    fetch_count: AtomicU32,
    delay: Duration,
}

impl SnapshotApi {
    fn new(snapshot: Vec<SharedResident>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            fetch_count: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(snapshot: Vec<SharedResident>, delay: Duration) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            fetch_count: AtomicU32::new(0),
            delay,
        }
    }

    fn fetches(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn replace(&self, snapshot: Vec<SharedResident>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

#[async_trait]
impl BoardApi for SnapshotApi {
    fn authenticated(&self) -> bool {
        true
    }

    async fn set_status(
        &self,
        _live: bool,
        _location: Option<Coordinates>,
    ) -> Result<StatusAck, ClientError> {
        unreachable!("缓存测试不会调状态接口")
    }

    async fn heartbeat(&self, _location: Coordinates) -> Result<StatusAck, ClientError> {
        unreachable!("缓存测试不会调心跳接口")
    }

    async fn fetch_shared_locations(&self) -> Result<Vec<SharedResident>, ClientError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

fn resident(username: &str, badge_count: i32) -> SharedResident {
    SharedResident {
        username: username.to_string(),
        display_name: format!("{}的家", username),
        badge_count,
        latitude: 31.23,
        longitude: 121.47,
    }
}

#[tokio::test(start_paused = true)]
async fn cached_snapshot_served_within_ttl() {
    let api = Arc::new(SnapshotApi::new(vec![resident("ayi", 2)]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);

    let first = cache.fetch(false).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(api.fetches(), 1);

    // TTL 内重复取不会再打网络
    tokio::time::sleep(Duration::from_secs(5)).await;
    cache.fetch(false).await.unwrap();
    assert_eq!(api.fetches(), 1);

    // 过期后才刷新
    tokio::time::sleep(Duration::from_secs(11)).await;
    cache.fetch(false).await.unwrap();
    assert_eq!(api.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn force_bypasses_ttl() {
    let api = Arc::new(SnapshotApi::new(vec![resident("ayi", 2)]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);

    cache.fetch(false).await.unwrap();
    api.replace(vec![resident("ayi", 3)]);

    let refreshed = cache.fetch(true).await.unwrap();
    assert_eq!(api.fetches(), 2);
    assert_eq!(refreshed[0].badge_count, 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_coalesce_into_one_request() {
    let api = Arc::new(SnapshotApi::with_delay(
        vec![resident("ayi", 2)],
        Duration::from_secs(1),
    ));
    let cache = Arc::new(SharedLocationCache::new(
        Arc::clone(&api) as Arc<dyn BoardApi>
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.fetch(false).await }));
    }

    for result in futures_util::future::join_all(handles).await {
        let snapshot = result.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].username, "ayi");
    }
    // 五个并发请求合并成一次网络调用
    assert_eq!(api.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_replaces_snapshot_wholesale() {
    let api = Arc::new(SnapshotApi::new(vec![
        resident("ayi", 2),
        resident("shushu", 0),
    ]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);

    cache.fetch(false).await.unwrap();
    assert!(cache.get("SHUSHU").is_some());

    // 服务端快照不再包含的条目在下次刷新后消失
    api.replace(vec![resident("ayi", 2)]);
    let refreshed = cache.fetch(true).await.unwrap();
    assert_eq!(refreshed.len(), 1);
    assert!(cache.get("shushu").is_none());
}

#[tokio::test(start_paused = true)]
async fn upsert_local_overrides_until_next_refresh() {
    let api = Arc::new(SnapshotApi::new(vec![resident("ayi", 2)]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);

    cache.fetch(false).await.unwrap();

    // 自己刚提交的状态先乐观反映到本地
    cache.upsert_local(LocalShare {
        username: "Me".to_string(),
        display_name: "我".to_string(),
        badge_count: 1,
        share_enabled: true,
        latitude: 30.0,
        longitude: 120.0,
    });
    assert!(cache.get("me").is_some());

    // 下次权威刷新整体覆盖，本地写入是后写赢但只赢到刷新为止
    cache.fetch(true).await.unwrap();
    assert!(cache.get("me").is_none());
}

#[tokio::test(start_paused = true)]
async fn disabled_or_invalid_entries_never_surface() {
    let api = Arc::new(SnapshotApi::new(vec![resident("ayi", 2)]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);
    cache.fetch(false).await.unwrap();

    // 关闭共享的条目被移除而不是保留
    cache.upsert_local(LocalShare {
        username: "ayi".to_string(),
        display_name: "阿姨".to_string(),
        badge_count: 2,
        share_enabled: false,
        latitude: 31.23,
        longitude: 121.47,
    });
    assert!(cache.get("ayi").is_none());

    // 坐标无效的条目同样不允许出现
    cache.upsert_local(LocalShare {
        username: "broken".to_string(),
        display_name: "坏坐标".to_string(),
        badge_count: 0,
        share_enabled: true,
        latitude: f64::NAN,
        longitude: 121.47,
    });
    assert!(cache.get("broken").is_none());
}

#[tokio::test(start_paused = true)]
async fn invalidate_clears_cache_on_logout() {
    let api = Arc::new(SnapshotApi::new(vec![resident("ayi", 2)]));
    let cache = SharedLocationCache::new(Arc::clone(&api) as Arc<dyn BoardApi>);

    cache.fetch(false).await.unwrap();
    cache.invalidate();
    assert!(cache.get("ayi").is_none());

    // 失效后下一次取必须重新走网络
    cache.fetch(false).await.unwrap();
    assert_eq!(api.fetches(), 2);
}
