mod auth;
mod error_handler;
mod fingerprint;
mod rate_limit;

pub use auth::auth_middleware;
pub use error_handler::log_errors;
pub use fingerprint::{Fingerprint, client_fingerprint, fingerprint_middleware};
pub use rate_limit::{RateLimiter, rate_limit};
