use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::ClientError;
use crate::routes::presence::StatusAck;
use crate::routes::residents::SharedResident;
use crate::utils::{ApiResponse, error_codes};

/// 一对坐标，客户端内部传递用
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// 客户端对服务端的访问面。会话状态机和缓存只依赖这个 trait，
/// 测试里用桩实现替换网络。
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// 当前是否持有凭证
    fn authenticated(&self) -> bool;

    async fn set_status(
        &self,
        live: bool,
        location: Option<Coordinates>,
    ) -> Result<StatusAck, ClientError>;

    async fn heartbeat(&self, location: Coordinates) -> Result<StatusAck, ClientError>;

    async fn fetch_shared_locations(&self) -> Result<Vec<SharedResident>, ClientError>;
}

/// 走 HTTP 的实现，说的是服务端的 ApiResponse 信封
pub struct HttpBoardApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBoardApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let envelope = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if envelope.code == error_codes::SUCCESS {
            envelope
                .resp_data
                .ok_or_else(|| ClientError::Transport("响应缺少数据".to_string()))
        } else {
            Err(match envelope.code {
                error_codes::AUTH_FAILED => ClientError::Unauthenticated,
                error_codes::NOT_LIVE => ClientError::NotLive,
                code => ClientError::Api {
                    code,
                    msg: envelope.msg,
                },
            })
        }
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    fn authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn set_status(
        &self,
        live: bool,
        location: Option<Coordinates>,
    ) -> Result<StatusAck, ClientError> {
        let body = serde_json::json!({
            "is_live": live,
            "latitude": location.map(|c| c.latitude),
            "longitude": location.map(|c| c.longitude),
        });

        let response = self
            .authorize(self.http.post(self.url("/presence/status")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Self::unwrap_envelope(response).await
    }

    async fn heartbeat(&self, location: Coordinates) -> Result<StatusAck, ClientError> {
        let body = serde_json::json!({
            "latitude": location.latitude,
            "longitude": location.longitude,
        });

        let response = self
            .authorize(self.http.post(self.url("/presence/heartbeat")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Self::unwrap_envelope(response).await
    }

    async fn fetch_shared_locations(&self) -> Result<Vec<SharedResident>, ClientError> {
        let response = self
            .authorize(self.http.get(self.url("/residents/shared")))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Self::unwrap_envelope(response).await
    }
}
