mod handler;
mod model;

pub use handler::cast_vote;
pub use model::{VoteReceipt, submit_vote};
