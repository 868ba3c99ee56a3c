use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::ClientError;
use super::transport::BoardApi;
use crate::routes::residents::SharedResident;

/// 快照的本地有效期，过期后下次 fetch 触发刷新
pub const SHARED_CACHE_TTL: Duration = Duration::from_secs(15);

/// 居民共享位置的客户端缓存，多个界面组件共用一份，
/// 避免各自重复拉取同一个快照。
pub struct SharedLocationCache {
    api: Arc<dyn BoardApi>,
    state: Mutex<CacheState>,
    /// 刷新串行化：并发 fetch 合并成一次网络请求
    refresh_guard: tokio::sync::Mutex<()>,
}

struct CacheState {
    /// 键是小写 username，整体在每次成功刷新时替换
    snapshot: HashMap<String, SharedResident>,
    fetched_at: Option<Instant>,
    generation: u64,
}

/// 本地乐观写入用的条目：自己刚提交的共享状态先反映到界面，
/// 下一次权威刷新会整体覆盖（以刷新结果为准）
#[derive(Debug, Clone)]
pub struct LocalShare {
    pub username: String,
    pub display_name: String,
    pub badge_count: i32,
    pub share_enabled: bool,
    pub latitude: f64,
    pub longitude: f64,
}

impl SharedLocationCache {
    pub fn new(api: Arc<dyn BoardApi>) -> Self {
        Self {
            api,
            state: Mutex::new(CacheState {
                snapshot: HashMap::new(),
                fetched_at: None,
                generation: 0,
            }),
            refresh_guard: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("shared cache lock")
    }

    /// 取快照。没过期且不强制时直接用缓存；
    /// 需要刷新时并发调用方合并到同一次请求上，拿到同一份结果。
    pub async fn fetch(&self, force: bool) -> Result<Vec<SharedResident>, ClientError> {
        let start_generation = {
            let state = self.lock_state();
            let fresh = state
                .fetched_at
                .map(|at| at.elapsed() < SHARED_CACHE_TTL)
                .unwrap_or(false);
            if fresh && !force {
                return Ok(state.snapshot.values().cloned().collect());
            }
            state.generation
        };

        let _guard = self.refresh_guard.lock().await;

        // 排队期间别人已经刷新过，直接复用那次的结果
        {
            let state = self.lock_state();
            if state.generation != start_generation {
                return Ok(state.snapshot.values().cloned().collect());
            }
        }

        let list = self.api.fetch_shared_locations().await?;

        let mut state = self.lock_state();
        state.snapshot = list
            .into_iter()
            .filter(|r| r.latitude.is_finite() && r.longitude.is_finite())
            .map(|r| (r.username.to_lowercase(), r))
            .collect();
        state.fetched_at = Some(Instant::now());
        state.generation += 1;
        Ok(state.snapshot.values().cloned().collect())
    }

    /// 按用户名取单条，大小写不敏感
    pub fn get(&self, username: &str) -> Option<SharedResident> {
        self.lock_state()
            .snapshot
            .get(&username.to_lowercase())
            .cloned()
    }

    /// 本地乐观写入。关闭共享或坐标无效的条目从快照移除，
    /// 不允许出现在快照里。
    pub fn upsert_local(&self, entry: LocalShare) {
        let key = entry.username.to_lowercase();
        let mut state = self.lock_state();

        if !entry.share_enabled
            || !(entry.latitude.is_finite() && entry.longitude.is_finite())
        {
            state.snapshot.remove(&key);
            return;
        }

        state.snapshot.insert(
            key.clone(),
            SharedResident {
                username: key,
                display_name: entry.display_name,
                badge_count: entry.badge_count,
                latitude: entry.latitude,
                longitude: entry.longitude,
            },
        );
    }

    /// 登出时本地失效
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        state.snapshot.clear();
        state.fetched_at = None;
    }
}
