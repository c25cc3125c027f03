//! Rate limiting logic and state management.

mod bucket;
mod key;
mod limiter;

pub use key::ClientKey;
pub use limiter::RateLimiter;
