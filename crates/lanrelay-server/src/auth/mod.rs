//! Admission control: origin whitelist, address extraction, rate limiting.

pub mod origin;
pub mod rate_limit;

pub use origin::{request_origin, AddressResolver, OriginPolicy};
pub use rate_limit::{RateLimit, RelayRateLimits};
