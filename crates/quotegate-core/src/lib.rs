pub mod dispatch;
pub mod error;
pub mod market;
pub mod ratelimit;

pub use dispatch::{DispatchPolicy, Fallback, OpFuture};
pub use error::{OperationError, Result};
pub use market::{FixedClock, MarketClock, SessionClock};
pub use ratelimit::{Admission, ClientKey, HealthCheckGate, RateLimitMeta, RateLimiter};
