use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ClientError;
use super::location::{LocationProvider, acquire_location};
use super::transport::BoardApi;

/// 心跳间隔
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// 连续失败到这个次数会话自行终止
pub const MAX_HEARTBEAT_FAILURES: u32 = 3;

/// 会话状态机：Idle → Activating → Live → Deactivating → Idle，
/// 心跳连续失败时从 Live 直接退回 Idle
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Activating,
    Live { since: DateTime<Utc> },
    Deactivating,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { since: DateTime<Utc> },
    HeartbeatFailed { consecutive: u32, reason: String },
    /// 终止通知：连续失败或服务端判定离线后发出，订阅方必须能收到，
    /// 不能只写进日志
    Terminated { reason: String },
    Stopped,
}

type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct SessionInner {
    api: Arc<dyn BoardApi>,
    location: Arc<dyn LocationProvider>,
    /// start/stop 串行化：同一会话不允许两个操作并发跑在同一条记录上
    op_guard: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    observers: Mutex<HashMap<u64, Observer>>,
    next_observer_id: AtomicU64,
}

impl SessionInner {
    fn set_state(&self, next: SessionState) {
        *self.state.lock().expect("session state lock") = next;
    }

    fn emit(&self, event: SessionEvent) {
        // 先把回调拷出来再调用，回调里允许再订阅或退订
        let observers = self
            .observers
            .lock()
            .expect("session observers lock")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for observer in observers {
            observer(&event);
        }
    }

    /// 心跳循环，跑在独立任务里，只在网络和定位 I/O 上挂起
    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的第一个 tick 立即完成，消费掉，首次心跳在一个间隔之后
        interval.tick().await;

        let mut consecutive_failures: u32 = 0;
        loop {
            interval.tick().await;

            let outcome = match acquire_location(self.location.as_ref()).await {
                Ok(coords) => self.api.heartbeat(coords).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                // 服务端已判定离线，继续心跳没有意义，必须重新上线
                Err(ClientError::NotLive) => {
                    self.set_state(SessionState::Idle);
                    self.emit(SessionEvent::Terminated {
                        reason: "服务端已判定离线".to_string(),
                    });
                    return;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.emit(SessionEvent::HeartbeatFailed {
                        consecutive: consecutive_failures,
                        reason: e.to_string(),
                    });
                    tracing::warn!(
                        "heartbeat failed ({}/{}): {}",
                        consecutive_failures,
                        MAX_HEARTBEAT_FAILURES,
                        e
                    );
                    if consecutive_failures >= MAX_HEARTBEAT_FAILURES {
                        self.set_state(SessionState::Idle);
                        self.emit(SessionEvent::Terminated {
                            reason: format!("连续{}次心跳失败: {}", consecutive_failures, e),
                        });
                        return;
                    }
                }
            }
        }
    }
}

/// 摊主端的在线会话。一个摊主同时只有一个有意义的会话实例。
pub struct PresenceSession {
    inner: Arc<SessionInner>,
}

impl PresenceSession {
    pub fn new(api: Arc<dyn BoardApi>, location: Arc<dyn LocationProvider>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                location,
                op_guard: tokio::sync::Mutex::new(()),
                state: Mutex::new(SessionState::Idle),
                heartbeat_task: Mutex::new(None),
                observers: Mutex::new(HashMap::new()),
                next_observer_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().expect("session state lock").clone()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state(), SessionState::Live { .. })
    }

    /// 订阅会话事件，返回的句柄负责退订
    pub fn subscribe(
        &self,
        observer: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .expect("session observers lock")
            .insert(id, Arc::new(observer));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// 上线。前置条件：持有凭证、限定时间内能定位。
    /// 成功后进入 Live 并开始周期心跳；since 以服务端返回为准。
    /// 已经在线时视为无操作，返回当前会话的开始时间。
    pub async fn start(&self) -> Result<DateTime<Utc>, ClientError> {
        let _guard = self.inner.op_guard.lock().await;

        if let SessionState::Live { since } = self.state() {
            return Ok(since);
        }

        self.inner.set_state(SessionState::Activating);

        if !self.inner.api.authenticated() {
            self.inner.set_state(SessionState::Idle);
            return Err(ClientError::Unauthenticated);
        }

        let coords = match acquire_location(self.inner.location.as_ref()).await {
            Ok(coords) => coords,
            Err(e) => {
                self.inner.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let ack = match self.inner.api.set_status(true, Some(coords)).await {
            Ok(ack) => ack,
            Err(e) => {
                self.inner.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let since = ack.live_since.unwrap_or_else(Utc::now);
        self.inner.set_state(SessionState::Live { since });

        let task = tokio::spawn(Arc::clone(&self.inner).heartbeat_loop());
        *self
            .inner
            .heartbeat_task
            .lock()
            .expect("session task lock") = Some(task);

        self.inner.emit(SessionEvent::Started { since });
        Ok(since)
    }

    /// 下线。幂等：已经 Idle 时是无操作。
    /// 先取消心跳任务再通知服务端，stop 返回后不会再有心跳发出。
    pub async fn stop(&self) -> Result<(), ClientError> {
        let _guard = self.inner.op_guard.lock().await;

        let was_live = match self.state() {
            SessionState::Idle => return Ok(()),
            SessionState::Live { .. } => true,
            _ => false,
        };

        self.inner.set_state(SessionState::Deactivating);

        if let Some(task) = self
            .inner
            .heartbeat_task
            .lock()
            .expect("session task lock")
            .take()
        {
            task.abort();
        }

        let result = if was_live {
            self.inner.api.set_status(false, None).await.map(|_| ())
        } else {
            Ok(())
        };

        self.inner.set_state(SessionState::Idle);
        self.inner.emit(SessionEvent::Stopped);
        result
    }
}

/// 订阅句柄，drop 或显式 cancel 都会退订
pub struct Subscription {
    inner: Weak<SessionInner>,
    id: u64,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut observers) = inner.observers.lock() {
                observers.remove(&self.id);
            }
        }
    }
}
