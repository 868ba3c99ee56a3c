mod handler;
mod model;

pub use handler::{fetch_shared, update_sharing};
pub use model::{SharedResident, shared_snapshot};
