mod handler;
mod model;

pub use handler::{StatusAck, get_seller, heartbeat, list_live, set_status};
pub use model::{SellerView, invalidate_live_cache, is_live_now};
