mod handler;
mod model;

pub use handler::{create_pin, list_pins, vote_pin};
pub use model::PinView;
