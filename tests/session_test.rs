//! 在线会话状态机测试：桩网络 + 暂停时钟，不碰真实 I/O

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backend::client::{
    BoardApi, ClientError, Coordinates, LocationProvider, PresenceSession, SessionEvent,
    SessionState,
};
use backend::routes::presence::StatusAck;
use backend::routes::residents::SharedResident;
use chrono::Utc;

/// 桩 API：set_status 记录调用，heartbeat 按脚本返回
struct ScriptedApi {
    authenticated: bool,
    /// 每次心跳弹出一个结果，弹完后默认成功
    heartbeat_script: Mutex<VecDeque<Result<(), ClientError>>>,
    heartbeat_count: AtomicU32,
    status_calls: Mutex<Vec<bool>>,
}

impl ScriptedApi {
    fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            heartbeat_script: Mutex::new(VecDeque::new()),
            heartbeat_count: AtomicU32::new(0),
            status_calls: Mutex::new(Vec::new()),
        }
    }

    fn script_failures(&self, n: usize) {
        let mut script = self.heartbeat_script.lock().unwrap();
        for _ in 0..n {
            script.push_back(Err(ClientError::Transport("连接被拒绝".to_string())));
        }
    }

    fn script(&self, result: Result<(), ClientError>) {
        self.heartbeat_script.lock().unwrap().push_back(result);
    }

    fn heartbeats(&self) -> u32 {
        self.heartbeat_count.load(Ordering::SeqCst)
    }

    fn status_calls(&self) -> Vec<bool> {
        self.status_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BoardApi for ScriptedApi {
    fn authenticated(&self) -> bool {
        self.authenticated
    }

    async fn set_status(
        &self,
        live: bool,
        _location: Option<Coordinates>,
    ) -> Result<StatusAck, ClientError> {
        self.status_calls.lock().unwrap().push(live);
        let now = Utc::now();
        Ok(StatusAck {
            is_live: live,
            live_since: live.then_some(now),
            last_ping_at: now,
        })
    }

    async fn heartbeat(&self, _location: Coordinates) -> Result<StatusAck, ClientError> {
        self.heartbeat_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.heartbeat_script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(e)) => Err(e),
            _ => {
                let now = Utc::now();
                Ok(StatusAck {
                    is_live: true,
                    live_since: Some(now),
                    last_ping_at: now,
                })
            }
        }
    }

    async fn fetch_shared_locations(&self) -> Result<Vec<SharedResident>, ClientError> {
        Ok(Vec::new())
    }
}

/// 立即返回固定坐标的定位源
struct FixedLocation;

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Coordinates, ClientError> {
        Ok(Coordinates {
            latitude: 31.23,
            longitude: 121.47,
        })
    }
}

/// 永远不返回的定位源，用来触发限时失败
struct StuckLocation;

#[async_trait]
impl LocationProvider for StuckLocation {
    async fn current_location(&self) -> Result<Coordinates, ClientError> {
        std::future::pending().await
    }
}

fn session_with(api: Arc<ScriptedApi>) -> PresenceSession {
    PresenceSession::new(api, Arc::new(FixedLocation))
}

#[tokio::test(start_paused = true)]
async fn start_requires_credential() {
    let api = Arc::new(ScriptedApi::new(false));
    let session = session_with(Arc::clone(&api));

    match session.start().await {
        Err(ClientError::Unauthenticated) => {}
        other => panic!("expected Unauthenticated, got {:?}", other.is_ok()),
    }
    assert_eq!(session.state(), SessionState::Idle);
    assert!(api.status_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_location_times_out() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = PresenceSession::new(Arc::clone(&api) as Arc<dyn BoardApi>, Arc::new(StuckLocation));

    match session.start().await {
        Err(ClientError::LocationUnavailable) => {}
        other => panic!("expected LocationUnavailable, got {:?}", other.is_ok()),
    }
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_fire_on_interval() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    session.start().await.unwrap();
    assert!(session.is_live());
    assert_eq!(api.heartbeats(), 0);

    // 两个完整间隔过去，应该正好两次心跳
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(api.heartbeats(), 2);
    assert!(session.is_live());
}

#[tokio::test(start_paused = true)]
async fn three_consecutive_failures_terminate_session() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _sub = session.subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    api.script_failures(3);
    session.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(46)).await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(api.heartbeats(), 3);

    // 终止后不再有任何心跳
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.heartbeats(), 3);

    // 终止必须以事件形式通知订阅方
    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Terminated { .. })));
    let failed = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::HeartbeatFailed { .. }))
        .count();
    assert_eq!(failed, 3);
}

#[tokio::test(start_paused = true)]
async fn single_failure_recovers_without_termination() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    api.script(Err(ClientError::Transport("超时".to_string())));
    api.script(Ok(()));
    api.script(Err(ClientError::Transport("超时".to_string())));
    api.script(Err(ClientError::Transport("超时".to_string())));

    session.start().await.unwrap();

    // 失败、成功、失败、失败：计数器被成功重置过，没到连续3次
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(session.is_live());
    assert_eq!(api.heartbeats(), 4);
}

#[tokio::test(start_paused = true)]
async fn not_live_from_server_terminates_immediately() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _sub = session.subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    api.script(Err(ClientError::NotLive));
    session.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(api.heartbeats(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.heartbeats(), 1);

    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SessionEvent::Terminated { .. })));
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_cancels_heartbeats() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    session.start().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    // 再停一次是无操作，不会重复通知服务端
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(api.status_calls(), vec![true, false]);

    // stop 返回后心跳任务已经取消
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.heartbeats(), 0);
}

#[tokio::test(start_paused = true)]
async fn overlapping_starts_share_one_session() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = Arc::new(session_with(Arc::clone(&api)));

    let a = Arc::clone(&session);
    let b = Arc::clone(&session);
    let (since_a, since_b) = tokio::join!(a.start(), b.start());

    // 串行化之后只有一次真正的上线调用，两个调用方看到同一个会话
    assert_eq!(since_a.unwrap(), since_b.unwrap());
    assert_eq!(api.status_calls(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_opens_new_session() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    let first = session.start().await.unwrap();
    session.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = session.start().await.unwrap();
    assert!(second >= first);
    assert!(session.is_live());
    assert_eq!(api.status_calls(), vec![true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_subscription_stops_receiving_events() {
    let api = Arc::new(ScriptedApi::new(true));
    let session = session_with(Arc::clone(&api));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let sub = session.subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    session.start().await.unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);

    sub.cancel();
    session.stop().await.unwrap();
    // 退订之后 Stopped 事件不再送达
    assert_eq!(events.lock().unwrap().len(), 1);
}
