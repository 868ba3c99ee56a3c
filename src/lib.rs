use config::Config;
use redis::Client as RedisClient;
use std::sync::Arc;
use store::Store;

pub mod client;
pub mod config;
pub mod middleware;
pub mod store;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub redis: Arc<RedisClient>,
}
