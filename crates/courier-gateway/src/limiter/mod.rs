//! Per-user, per-event-type admission control

mod bucket;
mod rate_limiter;

pub use bucket::TokenBucket;
pub use rate_limiter::RateLimiter;
