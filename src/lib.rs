pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod janitor;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod token_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, LimiterConfig};
pub use error::{ConfigError, GatekeeperError, Result};
pub use janitor::Janitor;
pub use rate_limiter::{LimiterStats, RateLimiter};
pub use server::{create_app, create_app_with_timeout, with_edge_layers, Server};
pub use token_bucket::TokenBucket;
