//! Quotegate HTTP/WebSocket gateway.
//!
//! Request flow for metered routes:
//!
//! ```text
//! request → request_id → rate_limit ─ refused ──► 429 (operation never runs)
//!                            │ admitted
//!                            ▼
//!                 handler → OperationDescriptor::invoke
//!                            → CacheManager::cached → DispatchPolicy::call
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod operations;
pub mod server;
pub mod upstream;
pub mod ws;

pub use config::AppConfig;
pub use error::ApiError;
pub use operations::{HistoryArgs, OperationDescriptor, Operations, QuoteArgs};
pub use server::{AppState, QuotegateServer, ServerBuilder, build_app};
pub use upstream::{Candle, Quote, UpstreamClient};
