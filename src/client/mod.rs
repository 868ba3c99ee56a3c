// 客户端侧组件：在线会话状态机与共享位置缓存。
// 服务端无推送能力，全部是拉取式，客户端自己负责心跳和缓存节流。

pub mod location;
pub mod session;
pub mod shared_locations;
pub mod transport;

pub use location::{LocationProvider, acquire_location};
pub use session::{PresenceSession, SessionEvent, SessionState, Subscription};
pub use shared_locations::{LocalShare, SharedLocationCache};
pub use transport::{BoardApi, Coordinates, HttpBoardApi};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("未登录或凭证失效")]
    Unauthenticated,
    #[error("限定时间内未能获取定位")]
    LocationUnavailable,
    #[error("服务端视角已离线，需要重新上线")]
    NotLive,
    #[error("接口错误 {code}: {msg}")]
    Api { code: i32, msg: String },
    #[error("网络错误: {0}")]
    Transport(String),
}
