use std::time::Duration;

use async_trait::async_trait;

use super::ClientError;
use super::transport::Coordinates;

/// 定位获取的超时上限
pub const LOCATION_TIMEOUT: Duration = Duration::from_secs(7);

/// 定位来源。平台相关，由调用方注入实现。
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Coordinates, ClientError>;
}

/// 限时获取当前定位，超时按定位不可用处理
pub async fn acquire_location(
    provider: &dyn LocationProvider,
) -> Result<Coordinates, ClientError> {
    match tokio::time::timeout(LOCATION_TIMEOUT, provider.current_location()).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::LocationUnavailable),
    }
}
